//! Wise (TransferWise) bank transfer adapter.
//!
//! A payout is four calls: quote, recipient account, transfer, funding.
//! The transfer id is the payout id; `customerTransactionId` names the
//! payout attempt so a repeated transfer request is deduplicated by Wise
//! while a re-triggered order gets a new transfer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use offramp_types::{
    OrderStatus, PayoutDestination, PayoutProvider, PayoutReceipt, PayoutRequest, Provider,
    ProviderError, ProviderPayoutStatus,
};

use crate::http::{build_client, find_id, find_str, join, send_json};

pub const DEFAULT_BASE_URL: &str = "https://api.transferwise.com";

#[derive(Debug, Clone)]
pub struct WiseConfig {
    pub base_url: String,
    pub api_token: String,
    pub profile_id: String,
    pub timeout: Duration,
}

impl WiseConfig {
    pub fn new(api_token: impl Into<String>, profile_id: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: api_token.into(),
            profile_id: profile_id.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct WiseClient {
    config: WiseConfig,
    http: Client,
}

impl WiseClient {
    pub fn new(config: WiseConfig) -> Result<Self, ProviderError> {
        if config.api_token.trim().is_empty() {
            return Err(ProviderError::MissingConfig("WISE_API_TOKEN is required".into()));
        }
        if config.profile_id.trim().is_empty() {
            return Err(ProviderError::MissingConfig("WISE_PROFILE_ID is required".into()));
        }
        let http = build_client(config.timeout)?;
        Ok(Self { config, http })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let request = self
            .http
            .post(join(&self.config.base_url, path))
            .bearer_auth(&self.config.api_token)
            .json(body);
        send_json(request, &format!("POST {path}")).await
    }

    fn required_id(raw: &Value, what: &str) -> Result<String, ProviderError> {
        find_id(raw, &["/id"])
            .ok_or_else(|| ProviderError::InvalidResponse(format!("Wise {what} has no id")))
    }
}

#[async_trait]
impl PayoutProvider for WiseClient {
    fn kind(&self) -> Provider {
        Provider::Wise
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError> {
        let PayoutDestination::Iban {
            iban,
            beneficiary_name,
        } = &request.destination
        else {
            return Err(ProviderError::Unsupported(request.destination.kind()));
        };
        let profile = &self.config.profile_id;
        let currency = request.amount.currency().to_string();
        let amount = request
            .amount
            .to_major()
            .to_f64()
            .ok_or_else(|| ProviderError::InvalidResponse("amount not representable".into()))?;

        let quote = self
            .post(
                &format!("/v3/profiles/{profile}/quotes"),
                &json!({
                    "sourceCurrency": currency,
                    "targetCurrency": currency,
                    "targetAmount": amount,
                    "payOut": "BANK_TRANSFER",
                }),
            )
            .await?;
        let quote_id = Self::required_id(&quote, "quote")?;
        debug!(%quote_id, "Wise quote created");

        let account = self
            .post(
                "/v1/accounts",
                &json!({
                    "currency": currency,
                    "type": "iban",
                    "profile": profile,
                    "accountHolderName": beneficiary_name,
                    "details": { "legalType": "PRIVATE", "iban": iban },
                }),
            )
            .await?;
        let account_id = Self::required_id(&account, "recipient account")?;

        let transfer = self
            .post(
                "/v1/transfers",
                &json!({
                    "targetAccount": account_id,
                    "quoteUuid": quote_id,
                    "customerTransactionId": request.idempotency_uuid().to_string(),
                    "details": { "reference": request.description() },
                }),
            )
            .await?;
        let Some(transfer_id) = find_id(&transfer, &["/id"]) else {
            // No transfer id means nothing to fund; the caller decides what to do.
            return Ok(PayoutReceipt {
                payout_id: None,
                raw_status: None,
                raw: transfer,
            });
        };

        let payment = self
            .post(
                &format!("/v3/profiles/{profile}/transfers/{transfer_id}/payments"),
                &json!({ "type": "BALANCE" }),
            )
            .await?;
        let raw_status = find_str(&transfer, &["/status"]);
        info!(%transfer_id, raw_status = ?raw_status, "Wise transfer funded");

        Ok(PayoutReceipt {
            payout_id: Some(transfer_id),
            raw_status,
            raw: json!({ "transfer": transfer, "payment": payment }),
        })
    }

    #[instrument(skip(self))]
    async fn payout_status(&self, payout_id: &str) -> Result<ProviderPayoutStatus, ProviderError> {
        let path = format!("/v1/transfers/{payout_id}");
        let request = self
            .http
            .get(join(&self.config.base_url, &path))
            .bearer_auth(&self.config.api_token);
        let raw = send_json(request, &format!("GET {path}")).await?;

        let raw_status = find_str(&raw, &["/status"])
            .ok_or_else(|| ProviderError::InvalidResponse("transfer status missing".into()))?;
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
        "incoming_payment_waiting" => Some(OrderStatus::PayoutPending),
        "processing" | "funds_converted" => Some(OrderStatus::Processing),
        "outgoing_payment_sent" => Some(OrderStatus::Completed),
        "cancelled" | "funds_refunded" | "bounced_back" => Some(OrderStatus::Failed),
        "charged_back" => Some(OrderStatus::ManualReview),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_token_and_profile() {
        assert!(matches!(
            WiseClient::new(WiseConfig::new("", "42")),
            Err(ProviderError::MissingConfig(_))
        ));
        assert!(matches!(
            WiseClient::new(WiseConfig::new("token", " ")),
            Err(ProviderError::MissingConfig(_))
        ));
        assert!(WiseClient::new(WiseConfig::new("token", "42")).is_ok());
    }

    #[test]
    fn status_map() {
        assert_eq!(
            map_status("incoming_payment_waiting"),
            Some(OrderStatus::PayoutPending)
        );
        assert_eq!(map_status("funds_converted"), Some(OrderStatus::Processing));
        assert_eq!(map_status("outgoing_payment_sent"), Some(OrderStatus::Completed));
        assert_eq!(map_status("bounced_back"), Some(OrderStatus::Failed));
        assert_eq!(map_status("charged_back"), Some(OrderStatus::ManualReview));
        assert_eq!(map_status("unknown_state"), None);
    }
}
