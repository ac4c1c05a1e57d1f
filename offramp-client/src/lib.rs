//! # Off-ramp Client SDK
//!
//! A typed Rust client for the off-ramp API.

use offramp_types::{
    CreateOrderRequest, CreateSellTransactionRequest, EstimateResponse, ListingResponse,
    MinAmountResponse, OrderId, OrderResponse, OrderStatus, SellTransactionResponse,
    SetPriceRequest, SetPriceResponse, TriggerPayoutResponse, WidgetResponse,
};
use reqwest::{Client, RequestBuilder, Url};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Off-ramp API client.
pub struct OfframpClient {
    base_url: String,
    admin_token: Option<String>,
    http: Client,
}

impl OfframpClient {
    /// Creates a new client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            admin_token: None,
            http: Client::new(),
        }
    }

    /// Sets the bearer token sent to operator endpoints.
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Checks if the API is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// Sets the price and available amount of a token (admin).
    pub async fn set_price(
        &self,
        token_symbol: &str,
        price_eur: Decimal,
        available_amount: Decimal,
    ) -> Result<SetPriceResponse, ClientError> {
        let req = SetPriceRequest {
            token_symbol: token_symbol.to_string(),
            price_eur,
            available_amount,
        };
        self.send(self.http.post(self.url("/otc/set-price")).json(&req))
            .await
    }

    pub async fn list_listings(&self) -> Result<Vec<ListingResponse>, ClientError> {
        self.send(self.http.get(self.url("/otc/listings"))).await
    }

    /// Creates a sell order.
    pub async fn create_order(&self, req: &CreateOrderRequest) -> Result<OrderResponse, ClientError> {
        self.send(self.http.post(self.url("/offramp/create-order")).json(req))
            .await
    }

    pub async fn get_order(&self, id: OrderId) -> Result<OrderResponse, ClientError> {
        self.send(self.http.get(self.url(&format!("/offramp/orders/{}", id))))
            .await
    }

    /// Lists orders, optionally filtered by status (admin).
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
    ) -> Result<Vec<OrderResponse>, ClientError> {
        let mut url = self.parse_url("/offramp/orders")?;
        if let Some(status) = status {
            url.query_pairs_mut().append_pair("status", status.as_str());
        }
        self.send(self.http.get(url)).await
    }

    /// Dispatches the payout of an order (admin).
    pub async fn trigger_payout(&self, id: OrderId) -> Result<TriggerPayoutResponse, ClientError> {
        self.send(
            self.http
                .post(self.url(&format!("/offramp/trigger-payout/{}", id))),
        )
        .await
    }

    /// Asks the server for a prefilled ChangeNOW sell link.
    pub async fn widget_url(
        &self,
        amount: Decimal,
        from_symbol: &str,
        redirect_url: Option<&str>,
    ) -> Result<WidgetResponse, ClientError> {
        let mut url = self.parse_url("/changenow/widget-sell-eur")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("amount", &amount.to_string())
                .append_pair("from_symbol", from_symbol);
            if let Some(redirect) = redirect_url {
                query.append_pair("redirect_url", redirect);
            }
        }
        self.send(self.http.get(url)).await
    }

    pub async fn min_sell_amount(&self, from_symbol: &str) -> Result<MinAmountResponse, ClientError> {
        let mut url = self.parse_url("/changenow/min-amount")?;
        url.query_pairs_mut().append_pair("from_symbol", from_symbol);
        self.send(self.http.get(url)).await
    }

    /// EUR ChangeNOW expects to pay for `amount` of `from_symbol`.
    pub async fn sell_estimate(
        &self,
        amount: Decimal,
        from_symbol: &str,
    ) -> Result<EstimateResponse, ClientError> {
        let mut url = self.parse_url("/changenow/estimate")?;
        url.query_pairs_mut()
            .append_pair("amount", &amount.to_string())
            .append_pair("from_symbol", from_symbol);
        self.send(self.http.get(url)).await
    }

    /// Opens a ChangeNOW sell transaction (admin).
    pub async fn create_sell_transaction(
        &self,
        req: &CreateSellTransactionRequest,
    ) -> Result<SellTransactionResponse, ClientError> {
        self.send(self.http.post(self.url("/changenow/sell-transaction")).json(req))
            .await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse_url(&self, path: &str) -> Result<Url, ClientError> {
        Url::parse(&self.url(path)).map_err(|e| ClientError::Api {
            status: 0,
            message: format!("invalid base URL: {}", e),
        })
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let req = match &self.admin_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().await?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            Ok(serde_json::from_str(&body)?)
        } else {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or(body);
            Err(ClientError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_with_trailing_slash() {
        let client = OfframpClient::new("http://localhost:3000/");
        assert_eq!(client.base_url, "http://localhost:3000");
        assert_eq!(client.url("/health"), "http://localhost:3000/health");
    }

    #[test]
    fn test_client_with_admin_token() {
        let client = OfframpClient::new("http://localhost:3000").with_admin_token("adm");
        assert_eq!(client.admin_token.as_deref(), Some("adm"));
    }

    #[test]
    fn test_bad_base_url_is_reported() {
        let client = OfframpClient::new("not a url");
        assert!(matches!(
            client.parse_url("/offramp/orders"),
            Err(ClientError::Api { status: 0, .. })
        ));
    }
}
