//! Stripe Connect instant card payouts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{info, instrument};

use offramp_types::{
    OrderStatus, PayoutDestination, PayoutProvider, PayoutReceipt, PayoutRequest, Provider,
    ProviderError, ProviderPayoutStatus,
};

use crate::http::{build_client, find_id, find_str, join, send_json};

pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayoutMethod {
    #[default]
    Instant,
    Standard,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Instant => "instant",
            PayoutMethod::Standard => "standard",
        }
    }
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutMethod {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "instant" => Ok(PayoutMethod::Instant),
            "standard" => Ok(PayoutMethod::Standard),
            other => Err(ProviderError::MissingConfig(format!(
                "STRIPE_PAYOUT_METHOD must be instant or standard, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub base_url: String,
    pub api_key: String,
    /// Connected account the card is attached to
    pub connect_account: String,
    pub method: PayoutMethod,
    pub timeout: Duration,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>, connect_account: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            connect_account: connect_account.into(),
            method: PayoutMethod::default(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct StripeClient {
    config: StripeConfig,
    http: Client,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingConfig("STRIPE_API_KEY is required".into()));
        }
        if !config.connect_account.starts_with("acct_") {
            return Err(ProviderError::MissingConfig(
                "STRIPE_CONNECT_ACCOUNT must be an acct_ id".into(),
            ));
        }
        let http = build_client(config.timeout)?;
        Ok(Self { config, http })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.config.api_key)
            .header("Stripe-Account", &self.config.connect_account)
    }

    /// Form fields of the payout for `request` sent to `destination`.
    pub fn payout_form(&self, request: &PayoutRequest, destination: &str) -> Vec<(String, String)> {
        vec![
            ("amount".into(), request.amount.amount().to_string()),
            ("currency".into(), request.amount.currency().code_lower().into()),
            ("method".into(), self.config.method.to_string()),
            ("destination".into(), destination.to_string()),
            ("description".into(), request.description()),
            ("metadata[order_id]".into(), request.order_id.to_string()),
        ]
    }
}

#[async_trait]
impl PayoutProvider for StripeClient {
    fn kind(&self) -> Provider {
        Provider::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError> {
        let PayoutDestination::Card { token } = &request.destination else {
            return Err(ProviderError::Unsupported(request.destination.kind()));
        };
        let account = &self.config.connect_account;

        let path = format!("/v1/accounts/{account}/external_accounts");
        let attached = send_json(
            self.request(self.http.post(join(&self.config.base_url, &path)))
                .form(&[("external_account", token.as_str())]),
            &format!("POST {path}"),
        )
        .await?;
        let card_id = find_id(&attached, &["/id"]).ok_or_else(|| {
            ProviderError::InvalidResponse("external account response has no id".into())
        })?;

        let raw = send_json(
            self.request(self.http.post(join(&self.config.base_url, "/v1/payouts")))
                .header("Idempotency-Key", request.idempotency_key())
                .form(&self.payout_form(request, &card_id)),
            "POST /v1/payouts",
        )
        .await?;

        let payout_id = find_id(&raw, &["/id"]);
        let raw_status = find_str(&raw, &["/status"]);
        info!(payout_id = ?payout_id, raw_status = ?raw_status, "Stripe payout created");

        Ok(PayoutReceipt {
            payout_id,
            raw_status,
            raw,
        })
    }

    #[instrument(skip(self))]
    async fn payout_status(&self, payout_id: &str) -> Result<ProviderPayoutStatus, ProviderError> {
        let path = format!("/v1/payouts/{payout_id}");
        let raw = send_json(
            self.request(self.http.get(join(&self.config.base_url, &path))),
            &format!("GET {path}"),
        )
        .await?;

        let raw_status = find_str(&raw, &["/status"])
            .ok_or_else(|| ProviderError::InvalidResponse("payout status missing".into()))?;
        Ok(ProviderPayoutStatus {
            payout_id: payout_id.to_string(),
            raw_status,
        })
    }

    fn deduplicates_payouts(&self) -> bool {
        true
    }

    fn map_status(&self, raw_status: &str) -> Option<OrderStatus> {
        map_status(raw_status)
    }
}

pub fn map_status(raw_status: &str) -> Option<OrderStatus> {
    match raw_status.trim().to_ascii_lowercase().as_str() {
        "pending" => Some(OrderStatus::PayoutPending),
        "in_transit" => Some(OrderStatus::Processing),
        "paid" => Some(OrderStatus::Completed),
        "failed" | "canceled" => Some(OrderStatus::Failed),
        _ => None,
    }
}

/// Order status implied by a Stripe event type, given the payout's own status.
pub fn map_event(event_type: &str, object_status: Option<&str>) -> Option<OrderStatus> {
    match event_type {
        "payout.paid" => Some(OrderStatus::Completed),
        "payout.failed" | "payout.canceled" => Some(OrderStatus::Failed),
        "payout.updated" if object_status == Some("in_transit") => Some(OrderStatus::Processing),
        _ => None,
    }
}
