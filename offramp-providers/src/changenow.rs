//! ChangeNOW sell flow.
//!
//! [`ChangeNowWidget`] builds a prefilled link to the hosted exchange page
//! and makes no API call. [`ChangeNowClient`] talks to the exchange API for
//! minimum amounts, estimates and sell transactions.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument};
use url::Url;

use offramp_types::ProviderError;

use crate::http::{build_client, find_decimal, find_id, find_str, join, send_json};

pub const DEFAULT_SELL_URL: &str = "https://changenow.io/exchange";
pub const DEFAULT_API_URL: &str = "https://api.changenow.io/v1";

#[derive(Debug, Clone)]
pub struct ChangeNowConfig {
    pub public_sell_url: String,
    /// Partner referral id appended as `ref_id`
    pub ref_id: Option<String>,
}

impl Default for ChangeNowConfig {
    fn default() -> Self {
        Self {
            public_sell_url: DEFAULT_SELL_URL.to_string(),
            ref_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChangeNowWidget {
    base: Url,
    ref_id: Option<String>,
}

impl ChangeNowWidget {
    pub fn new(config: ChangeNowConfig) -> Result<Self, ProviderError> {
        let base = Url::parse(&config.public_sell_url).map_err(|e| {
            ProviderError::MissingConfig(format!("CHANGENOW_PUBLIC_SELL_URL is invalid: {e}"))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ProviderError::MissingConfig(
                "CHANGENOW_PUBLIC_SELL_URL must be http(s)".into(),
            ));
        }
        let ref_id = config.ref_id.filter(|r| !r.trim().is_empty());
        Ok(Self { base, ref_id })
    }

    /// Sell-to-EUR link for `amount` of `from_symbol`.
    pub fn sell_url(&self, amount: Decimal, from_symbol: &str, redirect_url: Option<&str>) -> Url {
        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("from", &from_symbol.trim().to_ascii_lowercase())
                .append_pair("to", "eur")
                .append_pair("amount", &amount.normalize().to_string());
            if let Some(ref_id) = &self.ref_id {
                query.append_pair("ref_id", ref_id);
            }
            if let Some(redirect) = redirect_url {
                query.append_pair("redirect_url", redirect);
            }
        }
        url
    }
}

#[derive(Debug, Clone)]
pub struct ChangeNowApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Sent as `referralCode` on new transactions
    pub ref_id: Option<String>,
    pub timeout: Duration,
}

impl ChangeNowApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            ref_id: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Quote for selling a fixed amount.
#[derive(Debug, Clone, PartialEq)]
pub struct SellEstimate {
    pub estimated_amount: Decimal,
    /// Expected minutes to settle, e.g. `"10-60"`
    pub speed_forecast: Option<String>,
    pub warning: Option<String>,
}

/// Details of a sell transaction to open.
#[derive(Debug, Clone)]
pub struct SellTransactionRequest {
    pub from_ticker: String,
    pub to_currency: String,
    pub amount: Decimal,
    /// IBAN or other handle ChangeNOW pays out to
    pub payout_address: String,
    pub refund_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SellTransaction {
    pub id: String,
    /// Where the customer sends their tokens
    pub payin_address: Option<String>,
    pub status: Option<String>,
    pub raw: Value,
}

pub struct ChangeNowClient {
    config: ChangeNowApiConfig,
    http: Client,
}

impl ChangeNowClient {
    pub fn new(mut config: ChangeNowApiConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingConfig(
                "CHANGENOW_API_KEY is required".into(),
            ));
        }
        config.ref_id = config.ref_id.filter(|r| !r.trim().is_empty());
        let http = build_client(config.timeout)?;
        Ok(Self { config, http })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(join(&self.config.base_url, path))
            .header("x-changenow-api-key", &self.config.api_key)
    }

    /// Smallest amount of `from_ticker` ChangeNOW will convert to `to_currency`.
    #[instrument(skip(self))]
    pub async fn min_amount(
        &self,
        from_ticker: &str,
        to_currency: &str,
    ) -> Result<Decimal, ProviderError> {
        let path = format!("/min-amount/{}/{}", ticker(from_ticker), ticker(to_currency));
        let body = send_json(self.get(&path), "GET /min-amount").await?;
        find_decimal(&body, &["/minAmount", "/min_amount"])
            .ok_or_else(|| ProviderError::InvalidResponse("ChangeNOW returned no minAmount".into()))
    }

    /// What selling `amount` of `from_ticker` would pay out in `to_currency`.
    #[instrument(skip(self))]
    pub async fn estimate(
        &self,
        amount: Decimal,
        from_ticker: &str,
        to_currency: &str,
    ) -> Result<SellEstimate, ProviderError> {
        let path = format!(
            "/exchange-amount/{}/{}_{}",
            amount.normalize(),
            ticker(from_ticker),
            ticker(to_currency)
        );
        let body = send_json(self.get(&path), "GET /exchange-amount").await?;
        let estimated_amount = find_decimal(&body, &["/estimatedAmount", "/toAmount"])
            .ok_or_else(|| {
                ProviderError::InvalidResponse("ChangeNOW returned no estimatedAmount".into())
            })?;
        Ok(SellEstimate {
            estimated_amount,
            speed_forecast: body
                .get("transactionSpeedForecast")
                .and_then(Value::as_str)
                .map(str::to_string),
            warning: body
                .get("warningMessage")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    pub fn sell_payload(&self, request: &SellTransactionRequest) -> Value {
        let mut payload = Map::new();
        payload.insert("fromCurrency".into(), json!(ticker(&request.from_ticker)));
        payload.insert("toCurrency".into(), json!(ticker(&request.to_currency)));
        payload.insert("fromAmount".into(), json!(request.amount.normalize().to_string()));
        payload.insert("payoutAddress".into(), json!(request.payout_address));
        if let Some(refund) = &request.refund_address {
            payload.insert("refundAddress".into(), json!(refund));
        }
        if let Some(ref_id) = &self.config.ref_id {
            payload.insert("referralCode".into(), json!(ref_id));
        }
        Value::Object(payload)
    }

    /// Opens a sell transaction. Not idempotent: a lost answer must not be
    /// resent blindly.
    #[instrument(skip(self, request), fields(from = %request.from_ticker, amount = %request.amount))]
    pub async fn create_sell_transaction(
        &self,
        request: &SellTransactionRequest,
    ) -> Result<SellTransaction, ProviderError> {
        let payload = self.sell_payload(request);
        let http_request = self
            .http
            .post(join(&self.config.base_url, "/transactions"))
            .header("x-changenow-api-key", &self.config.api_key)
            .json(&payload);

        let raw = send_json(http_request, "POST /transactions")
            .await
            .inspect_err(|e| error!(error = %e, "ChangeNOW sell transaction failed"))?;
        let id = find_id(&raw, &["/id", "/transactionId"]).ok_or_else(|| {
            ProviderError::InvalidResponse("ChangeNOW returned no transaction id".into())
        })?;
        info!(transaction_id = %id, "ChangeNOW sell transaction created");

        Ok(SellTransaction {
            id,
            payin_address: raw
                .get("payinAddress")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: find_str(&raw, &["/status"]),
            raw,
        })
    }
}

fn ticker(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}
