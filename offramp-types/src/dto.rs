//! Data Transfer Objects (DTOs) for requests and responses.
//!
//! Token quantities and prices are `Decimal`s; they serialize as JSON
//! strings and are accepted as either strings or numbers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::domain::{
    Currency, Listing, Order, OrderId, OrderStatus, PayoutDestination, Provider,
};

// ─────────────────────────────────────────────────────────────────────────────
// Listing DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to set the OTC price of a token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetPriceRequest {
    #[schema(example = "NENO")]
    pub token_symbol: String,
    /// Price of one token in EUR, must be positive
    #[schema(value_type = String, example = "5000")]
    pub price_eur: Decimal,
    /// Tokens available for sale
    #[schema(value_type = String, example = "10")]
    pub available_amount: Decimal,
}

/// Response after setting a price.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetPriceResponse {
    pub ok: bool,
    #[schema(example = "NENO")]
    pub token: String,
    #[schema(value_type = String, example = "5000")]
    pub price_eur: Decimal,
    #[schema(value_type = String, example = "10")]
    pub available_amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<Listing> for SetPriceResponse {
    fn from(listing: Listing) -> Self {
        Self {
            ok: true,
            token: listing.token_symbol.to_string(),
            price_eur: listing.price_eur,
            available_amount: listing.available_amount,
            updated_at: listing.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListingResponse {
    #[schema(example = "NENO")]
    pub token_symbol: String,
    #[schema(value_type = String, example = "5000")]
    pub price_eur: Decimal,
    #[schema(value_type = String, example = "7.5")]
    pub available_amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<Listing> for ListingResponse {
    fn from(listing: Listing) -> Self {
        Self {
            token_symbol: listing.token_symbol.to_string(),
            price_eur: listing.price_eur,
            available_amount: listing.available_amount,
            updated_at: listing.updated_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Order DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to create a sell order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    #[schema(example = "NENO")]
    pub token_symbol: String,
    /// Tokens to sell, must be positive
    #[schema(value_type = String, example = "2.5")]
    pub amount_tokens: Decimal,
    pub destination: PayoutDestination,
    /// Defaults to nowpayments for iban/wallet and stripe for card
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    /// Repeating a request with the same key returns the first order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Where the seller is sent after checkout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "https://shop.example/thanks")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: OrderId,
    #[schema(example = "NENO")]
    pub token_symbol: String,
    #[schema(value_type = String, example = "2.5")]
    pub amount_tokens: Decimal,
    /// Listing price when the order was created
    #[schema(value_type = String, example = "5000")]
    pub price_eur: Decimal,
    /// Payout amount in EUR
    #[schema(value_type = String, example = "12500.00")]
    pub amount_eur: Decimal,
    /// Payout amount in euro cents
    #[schema(example = 1250000)]
    pub amount_eur_cents: i64,
    pub currency: Currency,
    pub destination: PayoutDestination,
    pub provider: Provider,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_payout_id: Option<String>,
    /// Times the payout was triggered
    #[serde(default)]
    pub payout_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            token_symbol: order.token_symbol.to_string(),
            amount_tokens: order.amount_tokens,
            price_eur: order.price_eur,
            amount_eur: order.amount_eur.to_major(),
            amount_eur_cents: order.amount_eur.amount(),
            currency: order.amount_eur.currency(),
            destination: order.destination,
            provider: order.provider,
            status: order.status,
            provider_payout_id: order.provider_payout_id,
            payout_attempts: order.payout_attempts,
            last_error: order.last_error,
            redirect_url: order.redirect_url,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Filter for the admin order listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListOrdersQuery {
    /// Only orders in this status
    pub status: Option<OrderStatus>,
}

/// Response after triggering a payout.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TriggerPayoutResponse {
    pub order: OrderResponse,
    /// Provider response body, present when a provider call was made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub provider_raw: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Webhook DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Acknowledgement returned to a provider webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    /// Order status after the event was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    /// The same payload was already processed
    pub duplicate: bool,
}

impl WebhookAck {
    pub fn ignored() -> Self {
        Self {
            ok: true,
            order_id: None,
            status: None,
            duplicate: false,
        }
    }

    pub fn duplicate(order_id: Option<OrderId>) -> Self {
        Self {
            ok: true,
            order_id,
            status: None,
            duplicate: true,
        }
    }

    pub fn applied(order: &Order) -> Self {
        Self {
            ok: true,
            order_id: Some(order.id),
            status: Some(order.status),
            duplicate: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChangeNOW DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WidgetQuery {
    /// Amount of `from_symbol` to sell, must be positive
    #[param(value_type = String, example = "100")]
    pub amount: Decimal,
    /// Ticker sold through the widget
    #[serde(default = "default_from_symbol")]
    #[param(example = "usdt")]
    pub from_symbol: String,
    #[serde(default)]
    pub redirect_url: Option<String>,
}

fn default_from_symbol() -> String {
    "usdt".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WidgetResponse {
    pub ok: bool,
    /// Prefilled ChangeNOW sell widget link
    #[schema(example = "https://changenow.io/exchange?from=usdt&to=eur&amount=100")]
    pub url: String,
    #[schema(value_type = String, example = "100")]
    pub amount: Decimal,
    #[schema(example = "usdt")]
    pub from_symbol: String,
    #[schema(example = "eur")]
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MinAmountQuery {
    #[serde(default = "default_from_symbol")]
    #[param(example = "usdt")]
    pub from_symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MinAmountResponse {
    pub ok: bool,
    #[schema(example = "usdt")]
    pub from_symbol: String,
    #[schema(example = "eur")]
    pub to: String,
    /// Smallest amount of `from_symbol` ChangeNOW accepts
    #[schema(value_type = String, example = "19.5")]
    pub min_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EstimateQuery {
    /// Amount of `from_symbol` to sell, must be positive
    #[param(value_type = String, example = "100")]
    pub amount: Decimal,
    #[serde(default = "default_from_symbol")]
    #[param(example = "usdt")]
    pub from_symbol: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EstimateResponse {
    pub ok: bool,
    #[schema(example = "usdt")]
    pub from_symbol: String,
    #[schema(example = "eur")]
    pub to: String,
    #[schema(value_type = String, example = "100")]
    pub amount: Decimal,
    /// EUR the sale is expected to yield
    #[schema(value_type = String, example = "92.14")]
    pub estimated_amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_forecast: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Operator request to open a ChangeNOW sell transaction.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateSellTransactionRequest {
    #[serde(default = "default_from_symbol")]
    #[schema(example = "usdt")]
    pub from_symbol: String,
    #[schema(value_type = String, example = "250")]
    pub amount: Decimal,
    /// IBAN ChangeNOW pays the EUR to
    #[schema(example = "DE89370400440532013000")]
    pub payout_address: String,
    #[serde(default)]
    pub refund_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SellTransactionResponse {
    pub ok: bool,
    /// ChangeNOW transaction id
    pub id: String,
    /// Where the tokens must be sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payin_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[schema(value_type = Object)]
    pub provider_raw: Value,
}
