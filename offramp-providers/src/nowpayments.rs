//! NOWPayments mass-payout adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

use offramp_types::{
    OrderStatus, PayoutDestination, PayoutProvider, PayoutReceipt, PayoutRequest, Provider,
    ProviderError, ProviderPayoutStatus,
};

use crate::http::{build_client, find_id, find_str, join, send_json};

pub const DEFAULT_BASE_URL: &str = "https://api.nowpayments.io/v1";

/// Statuses on which `/payout` is retried once at `/payouts`.
const FALLBACK_STATUSES: [u16; 3] = [404, 405, 422];

#[derive(Debug, Clone)]
pub struct NowPaymentsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Bearer token for the payout API
    pub jwt: Option<String>,
    pub ipn_callback_url: Option<String>,
    /// Extra withdrawal fields some accounts need (bank_swift, bank_country, ...)
    pub bank_extra: Map<String, Value>,
    pub timeout: Duration,
}

impl Default for NowPaymentsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            jwt: None,
            ipn_callback_url: None,
            bank_extra: Map::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Parses `NOWPAYMENTS_BANK_EXTRA_JSON`; only a JSON object is accepted.
pub fn parse_bank_extra(raw: &str) -> Result<Map<String, Value>, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProviderError::MissingConfig(
            "NOWPAYMENTS_BANK_EXTRA_JSON must be a JSON object".into(),
        )),
        Err(e) => Err(ProviderError::MissingConfig(format!(
            "NOWPAYMENTS_BANK_EXTRA_JSON is not valid JSON: {e}"
        ))),
    }
}

pub struct NowPaymentsClient {
    config: NowPaymentsConfig,
    http: Client,
}

impl NowPaymentsClient {
    pub fn new(config: NowPaymentsConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_none() && config.jwt.is_none() {
            return Err(ProviderError::MissingConfig(
                "NOWPAYMENTS_API_KEY or NOWPAYMENTS_JWT is required".into(),
            ));
        }
        let http = build_client(config.timeout)?;
        Ok(Self { config, http })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(jwt) = &self.config.jwt {
            request = request.bearer_auth(jwt);
        }
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key);
        }
        request
    }

    /// The single withdrawal sent for `request`.
    pub fn withdrawal(&self, request: &PayoutRequest) -> Result<Value, ProviderError> {
        let amount = request
            .amount
            .to_major()
            .to_f64()
            .ok_or_else(|| ProviderError::InvalidResponse("amount not representable".into()))?;

        let mut withdrawal = Map::new();
        match &request.destination {
            PayoutDestination::Iban {
                iban,
                beneficiary_name,
            } => {
                withdrawal.insert("address".into(), json!(iban));
                withdrawal.insert(
                    "currency".into(),
                    json!(request.amount.currency().code_lower()),
                );
                withdrawal.insert("extra_id".into(), json!(beneficiary_name));
            }
            PayoutDestination::Wallet { address, currency } => {
                withdrawal.insert("address".into(), json!(address));
                withdrawal.insert("currency".into(), json!(currency));
            }
            other => return Err(ProviderError::Unsupported(other.kind())),
        }
        withdrawal.insert("amount".into(), json!(amount));
        withdrawal.insert(
            "unique_external_id".into(),
            json!(request.order_id.to_string()),
        );
        if let Some(url) = &self.config.ipn_callback_url {
            withdrawal.insert("ipn_callback_url".into(), json!(url));
        }
        for (key, value) in &self.config.bank_extra {
            withdrawal.insert(key.clone(), value.clone());
        }

        Ok(json!({ "withdrawals": [Value::Object(withdrawal)] }))
    }

    async fn post_payout(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let request = self.authorize(self.http.post(join(&self.config.base_url, path)).json(body));
        send_json(request, &format!("POST {path}")).await
    }
}

#[async_trait]
impl PayoutProvider for NowPaymentsClient {
    fn kind(&self) -> Provider {
        Provider::Nowpayments
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError> {
        let body = self.withdrawal(request)?;

        let raw = match self.post_payout("/payout", &body).await {
            Err(ProviderError::Http { status, body: err_body })
                if FALLBACK_STATUSES.contains(&status) =>
            {
                debug!(status, body = %err_body, "/payout rejected, trying /payouts");
                self.post_payout("/payouts", &body).await?
            }
            other => other?,
        };

        let payout_id = find_id(
            &raw,
            &["/id", "/payout_id", "/withdrawals/0/id", "/payouts/0/id"],
        );
        let raw_status = find_str(
            &raw,
            &["/status", "/withdrawals/0/status", "/payouts/0/status"],
        );
        info!(payout_id = ?payout_id, raw_status = ?raw_status, "NOWPayments payout created");

        Ok(PayoutReceipt {
            payout_id,
            raw_status,
            raw,
        })
    }

    #[instrument(skip(self))]
    async fn payout_status(&self, payout_id: &str) -> Result<ProviderPayoutStatus, ProviderError> {
        let path = format!("/payout/{payout_id}");
        let request = self.authorize(self.http.get(join(&self.config.base_url, &path)));
        let raw = send_json(request, &format!("GET {path}")).await?;

        let raw_status = find_str(&raw, &["/status", "/withdrawals/0/status", "/0/status"])
            .ok_or_else(|| ProviderError::InvalidResponse("payout status missing".into()))?;

        Ok(ProviderPayoutStatus {
            payout_id: payout_id.to_string(),
            raw_status,
        })
    }

    fn map_status(&self, raw_status: &str) -> Option<OrderStatus> {
        map_status(raw_status)
    }
}

pub fn map_status(raw_status: &str) -> Option<OrderStatus> {
    match raw_status.trim().to_ascii_lowercase().as_str() {
        "creating" | "waiting" => Some(OrderStatus::PayoutPending),
        "processing" | "sending" => Some(OrderStatus::Processing),
        "finished" => Some(OrderStatus::Completed),
        "failed" => Some(OrderStatus::Failed),
        "rejected" => Some(OrderStatus::ManualReview),
        _ => None,
    }
}
