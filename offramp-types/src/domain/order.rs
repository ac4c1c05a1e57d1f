//! Sell order domain model and its status state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::destination::{PayoutDestination, Provider};
use super::listing::TokenSymbol;
use super::money::{Money, quote_eur};
use crate::error::DomainError;

/// Unique identifier for an Order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    /// Creates a new random OrderId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an OrderId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Deterministic UUID naming payout attempt `attempt` of this order.
    pub fn attempt_uuid(&self, attempt: u32) -> Uuid {
        Uuid::new_v5(&self.0, &attempt.to_be_bytes())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for OrderId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of a sell order.
///
/// ```text
/// created -> queued -> payout_pending -> processing -> completed
///               \            \               \
///                +-> failed / manual_review <-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Priced and persisted, no payout requested yet
    Created,
    /// Claimed for payout; the provider call is in flight
    Queued,
    /// Provider accepted the payout
    PayoutPending,
    /// Provider reports the payout is moving
    Processing,
    Completed,
    /// Payout failed; may be re-triggered
    Failed,
    /// Outcome unknown, needs an operator
    ManualReview,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Created,
        OrderStatus::Queued,
        OrderStatus::PayoutPending,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::ManualReview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Queued => "queued",
            OrderStatus::PayoutPending => "payout_pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::ManualReview => "manual_review",
        }
    }

    /// Whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Created, Queued)
                | (Queued, PayoutPending | Failed | ManualReview)
                | (PayoutPending, Processing | Completed | Failed | ManualReview)
                | (Processing, Completed | Failed | ManualReview)
                | (Failed, Queued)
                | (ManualReview, Completed | Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed)
    }

    /// Payout accepted by the provider but not settled; candidates for polling.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, OrderStatus::PayoutPending | OrderStatus::Processing)
    }

    /// Statuses from which a payout may be (re)triggered.
    pub fn is_payable(&self) -> bool {
        matches!(self, OrderStatus::Created | OrderStatus::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("Unknown order status: {}", s)))
    }
}

/// A sell order: tokens in, fiat out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub token_symbol: TokenSymbol,
    pub amount_tokens: Decimal,
    /// Listing price captured when the order was created
    pub price_eur: Decimal,
    pub amount_eur: Money,
    pub destination: PayoutDestination,
    pub provider: Provider,
    pub status: OrderStatus,
    /// Identifier assigned by the provider once a payout exists
    pub provider_payout_id: Option<String>,
    /// Number of times the order was claimed for payout
    pub payout_attempts: u32,
    pub last_error: Option<String>,
    pub idempotency_key: Option<String>,
    pub redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a fresh order in `created`, priced at `price_eur` per token.
    pub fn price(new: NewOrder, price_eur: Decimal) -> Result<Self, DomainError> {
        let amount_eur = quote_eur(new.amount_tokens, price_eur)?;
        let now = Utc::now();
        Ok(Self {
            id: OrderId::new(),
            token_symbol: new.token_symbol,
            amount_tokens: new.amount_tokens,
            price_eur,
            amount_eur,
            destination: new.destination,
            provider: new.provider,
            status: OrderStatus::Created,
            provider_payout_id: None,
            payout_attempts: 0,
            last_error: None,
            idempotency_key: new.idempotency_key,
            redirect_url: new.redirect_url,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a guarded status change in memory.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), DomainError> {
        if self.status != update.next && !self.status.can_transition_to(update.next) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: update.next,
            });
        }
        if update.claims_payout(self.status) {
            self.payout_attempts += 1;
        }
        self.status = update.next;
        if let Some(payout_id) = &update.provider_payout_id {
            self.provider_payout_id = Some(payout_id.clone());
        }
        self.last_error = update.last_error.clone();
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Validated input for persisting a new order.
///
/// Priced from the listing inside the same transaction that
/// reserves the inventory.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub token_symbol: TokenSymbol,
    pub amount_tokens: Decimal,
    pub destination: PayoutDestination,
    pub provider: Provider,
    pub idempotency_key: Option<String>,
    pub redirect_url: Option<String>,
}

/// A compare-and-set status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub next: OrderStatus,
    /// Overwrites the stored payout id only when `Some`
    pub provider_payout_id: Option<String>,
    /// Written verbatim; `None` clears a previous error
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn to(next: OrderStatus) -> Self {
        Self {
            next,
            provider_payout_id: None,
            last_error: None,
        }
    }

    pub fn with_payout_id(mut self, payout_id: impl Into<String>) -> Self {
        self.provider_payout_id = Some(payout_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Whether applying this update to an order in `from` starts a new
    /// payout attempt.
    pub fn claims_payout(&self, from: OrderStatus) -> bool {
        self.next == OrderStatus::Queued && from != OrderStatus::Queued
    }
}
