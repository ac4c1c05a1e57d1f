//! OpenAPI specification and documentation.

#![allow(dead_code)] // Path functions are only used by utoipa for documentation generation

use offramp_types::domain::{Currency, OrderId, OrderStatus, PayoutDestination, Provider};
use offramp_types::dto::{
    CreateOrderRequest, CreateSellTransactionRequest, EstimateQuery, EstimateResponse,
    ListOrdersQuery, ListingResponse, MinAmountQuery, MinAmountResponse, OrderResponse,
    SellTransactionResponse, SetPriceRequest, SetPriceResponse, TriggerPayoutResponse, WebhookAck,
    WidgetQuery, WidgetResponse,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};

// Dummy functions to generate path documentation
// These are not the actual handlers, just for OpenAPI path generation

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = inline(serde_json::Value), example = json!({"status": "healthy"}))
    )
)]
async fn health() {}

/// Set the OTC price and available amount of a token
#[utoipa::path(
    post,
    path = "/otc/set-price",
    tag = "listings",
    request_body = SetPriceRequest,
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "Listing upserted", body = SetPriceResponse),
        (status = 400, description = "Invalid symbol, price or amount"),
        (status = 401, description = "Unauthorized"),
        (status = 503, description = "Admin API disabled")
    )
)]
async fn set_price() {}

/// List OTC listings
#[utoipa::path(
    get,
    path = "/otc/listings",
    tag = "listings",
    responses(
        (status = 200, description = "All listings", body = Vec<ListingResponse>)
    )
)]
async fn list_listings() {}

/// Create a sell order priced from the current listing
#[utoipa::path(
    post,
    path = "/offramp/create-order",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created (or the earlier order for a repeated idempotency key)", body = OrderResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "No listing for the token"),
        (status = 422, description = "Insufficient liquidity")
    )
)]
async fn create_order() {}

/// Dispatch the payout of an order to its provider
#[utoipa::path(
    post,
    path = "/offramp/trigger-payout/{id}",
    tag = "orders",
    security(("admin_token" = [])),
    params(
        ("id" = OrderId, Path, description = "Order ID (UUID)")
    ),
    responses(
        (status = 200, description = "Order after the payout attempt", body = TriggerPayoutResponse),
        (status = 404, description = "Order not found"),
        (status = 502, description = "Provider rejected the payout"),
        (status = 503, description = "Provider not configured")
    )
)]
async fn trigger_payout() {}

/// Get an order by ID
#[utoipa::path(
    get,
    path = "/offramp/orders/{id}",
    tag = "orders",
    params(
        ("id" = OrderId, Path, description = "Order ID (UUID)")
    ),
    responses(
        (status = 200, description = "Order details", body = OrderResponse),
        (status = 404, description = "Order not found")
    )
)]
async fn get_order() {}

/// List orders, newest first
#[utoipa::path(
    get,
    path = "/offramp/orders",
    tag = "orders",
    security(("admin_token" = [])),
    params(ListOrdersQuery),
    responses(
        (status = 200, description = "Orders", body = Vec<OrderResponse>),
        (status = 401, description = "Unauthorized")
    )
)]
async fn list_orders() {}

/// NOWPayments IPN callback, signed in `x-nowpayments-sig`
#[utoipa::path(
    post,
    path = "/webhooks/nowpayments",
    tag = "webhooks",
    request_body(content = inline(serde_json::Value), description = "Raw IPN payload"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 401, description = "Missing or invalid signature"),
        (status = 404, description = "Unknown order"),
        (status = 422, description = "No payout id or order reference")
    )
)]
async fn nowpayments_webhook() {}

/// Stripe event callback, signed in `Stripe-Signature`
#[utoipa::path(
    post,
    path = "/webhooks/stripe",
    tag = "webhooks",
    request_body(content = inline(serde_json::Value), description = "Raw Stripe event"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 401, description = "Missing, invalid or expired signature")
    )
)]
async fn stripe_webhook() {}

/// Prefilled ChangeNOW link selling tokens for EUR
#[utoipa::path(
    get,
    path = "/changenow/widget-sell-eur",
    tag = "changenow",
    params(WidgetQuery),
    responses(
        (status = 200, description = "Widget link", body = WidgetResponse),
        (status = 400, description = "Invalid amount or redirect URL")
    )
)]
async fn changenow_widget() {}

/// Smallest amount ChangeNOW converts to EUR
#[utoipa::path(
    get,
    path = "/changenow/min-amount",
    tag = "changenow",
    params(MinAmountQuery),
    responses(
        (status = 200, description = "Minimum sell amount", body = MinAmountResponse),
        (status = 400, description = "Invalid symbol"),
        (status = 502, description = "ChangeNOW error"),
        (status = 503, description = "ChangeNOW API not configured")
    )
)]
async fn changenow_min_amount() {}

/// EUR a sale is expected to yield
#[utoipa::path(
    get,
    path = "/changenow/estimate",
    tag = "changenow",
    params(EstimateQuery),
    responses(
        (status = 200, description = "Estimate", body = EstimateResponse),
        (status = 400, description = "Invalid symbol or amount"),
        (status = 502, description = "ChangeNOW error"),
        (status = 503, description = "ChangeNOW API not configured")
    )
)]
async fn changenow_estimate() {}

/// Open a ChangeNOW sell transaction paying EUR to an IBAN
#[utoipa::path(
    post,
    path = "/changenow/sell-transaction",
    tag = "changenow",
    request_body = CreateSellTransactionRequest,
    security(("admin_token" = [])),
    responses(
        (status = 201, description = "Transaction created", body = SellTransactionResponse),
        (status = 400, description = "Invalid symbol, amount or IBAN"),
        (status = 401, description = "Unauthorized"),
        (status = 502, description = "ChangeNOW rejected the transaction"),
        (status = 503, description = "ChangeNOW API not configured")
    )
)]
async fn changenow_create_sell() {}

/// OpenAPI documentation for the off-ramp API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Off-ramp Payout Service API",
        version = "1.0.0",
        description = "Sell OTC-listed tokens for EUR and pay out through NOWPayments, Wise or Stripe.\n\n## Authentication\n\nOperator endpoints require the admin token:\n\n```\nAuthorization: Bearer <OFFRAMP_ADMIN_TOKEN>\n```\n\nWebhooks are authenticated by the provider's HMAC signature.",
        license(name = "MIT"),
    ),
    paths(
        health,
        set_price,
        list_listings,
        create_order,
        trigger_payout,
        get_order,
        list_orders,
        nowpayments_webhook,
        stripe_webhook,
        changenow_widget,
        changenow_min_amount,
        changenow_estimate,
        changenow_create_sell,
    ),
    components(
        schemas(
            SetPriceRequest,
            SetPriceResponse,
            ListingResponse,
            CreateOrderRequest,
            OrderResponse,
            TriggerPayoutResponse,
            WebhookAck,
            WidgetResponse,
            MinAmountResponse,
            EstimateResponse,
            CreateSellTransactionRequest,
            SellTransactionResponse,
            PayoutDestination,
            Provider,
            OrderStatus,
            Currency,
            OrderId,
        )
    ),

    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "listings", description = "OTC price management"),
        (name = "orders", description = "Sell orders and payouts"),
        (name = "webhooks", description = "Signed provider callbacks"),
        (name = "changenow", description = "ChangeNOW sell widget and exchange API"),
    )
)]
pub struct ApiDoc;

/// Security scheme modifier for the admin bearer token.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_token",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
