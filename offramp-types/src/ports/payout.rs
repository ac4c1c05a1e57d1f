//! Payout provider port.
//!
//! Implemented by the HTTP adapters in `offramp-providers` and by fakes in
//! tests.

use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Money, OrderId, OrderStatus, PayoutDestination, Provider, TokenSymbol};

/// Error type for payout provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    MissingConfig(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The request never reached the provider.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request was sent but no answer came back; the provider may
    /// have acted on it.
    #[error("No response from provider: {0}")]
    NoResponse(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider cannot pay out to a {0} destination")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Whether the same call may succeed if repeated, and repeating it
    /// cannot double a side effect.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => {
                matches!(status, 408 | 425 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Whether the provider may have processed the request without us
    /// learning the outcome.
    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, ProviderError::NoResponse(_))
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ProviderError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            ProviderError::Http { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// What to pay and where.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub order_id: OrderId,
    pub token_symbol: TokenSymbol,
    pub amount: Money,
    pub destination: PayoutDestination,
    /// Payout attempt this request belongs to, starting at 1
    pub attempt: u32,
}

impl PayoutRequest {
    pub fn description(&self) -> String {
        format!("Off-ramp {} order {}", self.token_symbol, self.order_id)
    }

    /// Provider-side deduplication key. Stable across retries of one
    /// attempt, distinct for every re-trigger.
    pub fn idempotency_key(&self) -> String {
        format!("{}-{}", self.order_id, self.attempt)
    }

    /// The same key as a UUID, for providers that require one.
    pub fn idempotency_uuid(&self) -> Uuid {
        self.order_id.attempt_uuid(self.attempt)
    }
}

/// Provider answer to a payout request.
#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    /// `None` when the provider answered 2xx without an identifier
    pub payout_id: Option<String>,
    pub raw_status: Option<String>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPayoutStatus {
    pub payout_id: String,
    pub raw_status: String,
}

/// Port trait for outbound payout providers.
#[async_trait::async_trait]
pub trait PayoutProvider: Send + Sync {
    fn kind(&self) -> Provider;

    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError>;

    async fn payout_status(&self, payout_id: &str) -> Result<ProviderPayoutStatus, ProviderError>;

    /// Whether `create_payout` sends `PayoutRequest::idempotency_key`, so a
    /// request that got no answer can be sent again safely.
    fn deduplicates_payouts(&self) -> bool {
        false
    }

    /// Translates a provider status string; `None` for unknown values.
    fn map_status(&self, raw_status: &str) -> Option<OrderStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Transport("reset".into()).is_transient());
        for status in [408, 425, 429, 500, 502, 503] {
            let err = ProviderError::Http {
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        for status in [400, 401, 403, 404, 422] {
            let err = ProviderError::Http {
                status,
                body: String::new(),
            };
            assert!(!err.is_transient(), "{status} should be permanent");
        }
        assert!(!ProviderError::MissingConfig("key".into()).is_transient());
        assert!(!ProviderError::InvalidResponse("not json".into()).is_transient());
    }

    #[test]
    fn timeouts_after_sending_are_unconfirmed_not_transient() {
        let err = ProviderError::NoResponse("read timed out".into());
        assert!(!err.is_transient());
        assert!(err.is_unconfirmed());
        assert!(!ProviderError::Transport("refused".into()).is_unconfirmed());
    }

    #[test]
    fn idempotency_key_changes_per_attempt() {
        let mut request = PayoutRequest {
            order_id: OrderId::new(),
            token_symbol: TokenSymbol::parse("NENO").unwrap(),
            amount: Money::new(100, crate::domain::Currency::EUR).unwrap(),
            destination: PayoutDestination::Card {
                token: "tok_visa".into(),
            },
            attempt: 1,
        };
        let first = request.idempotency_key();
        assert_eq!(first, format!("{}-1", request.order_id));

        let first_uuid = request.idempotency_uuid();
        assert_eq!(first_uuid, request.idempotency_uuid());

        request.attempt = 2;
        assert_ne!(request.idempotency_key(), first);
        assert_ne!(request.idempotency_uuid(), first_uuid);
    }
}
