//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use offramp_types::{
    AppError, CreateOrderRequest, CreateSellTransactionRequest, EstimateQuery, ListOrdersQuery,
    ListingResponse, MinAmountQuery, OrderId, OrderRepository, OrderResponse, SetPriceRequest,
    SetPriceResponse, WidgetQuery,
};

use crate::OfframpService;

/// Application state shared across handlers.
pub struct AppState<R: OrderRepository> {
    pub service: Arc<OfframpService<R>>,
    /// Bearer token for admin routes; admin routes are closed when unset
    pub admin_token: Option<String>,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) | AppError::InsufficientLiquidity { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Provider { .. } => StatusCode::BAD_GATEWAY,
            AppError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::WebhookNotConfigured(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "code": status.as_u16()
        });
        if let AppError::Provider {
            status: provider_status,
            body: provider_body,
            ..
        } = &self.0
        {
            body["provider_status"] = serde_json::json!(provider_status);
            body["provider_body"] = serde_json::json!(provider_body);
        }

        (status, Json(body)).into_response()
    }
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest("Invalid order ID".into()).into())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[tracing::instrument(skip(state, req), fields(token = %req.token_symbol))]
pub async fn set_price<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<SetPriceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = state.service.set_price(req).await?;
    Ok(Json(SetPriceResponse::from(listing)))
}

#[tracing::instrument(skip(state))]
pub async fn list_listings<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
) -> Result<impl IntoResponse, ApiError> {
    let listings = state.service.list_listings().await?;
    let body: Vec<ListingResponse> = listings.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

#[tracing::instrument(skip(state, req), fields(token = %req.token_symbol))]
pub async fn create_order<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.service.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(order))))
}

#[tracing::instrument(skip(state), fields(order_id = %id))]
pub async fn trigger_payout<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = parse_order_id(&id)?;
    let response = state.service.trigger_payout(order_id).await?;
    Ok(Json(response))
}

#[tracing::instrument(skip(state), fields(order_id = %id))]
pub async fn get_order<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.service.get_order(order_id).await?;
    Ok(Json(OrderResponse::from(order)))
}

#[tracing::instrument(skip(state))]
pub async fn list_orders<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state.service.list_orders(query.status).await?;
    let body: Vec<OrderResponse> = orders.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

/// NOWPayments IPN callback; the body is read raw for signature checks.
#[tracing::instrument(skip_all)]
pub async fn nowpayments_webhook<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = header(&headers, "x-nowpayments-sig");
    let ack = state.service.handle_nowpayments_ipn(&body, signature).await?;
    Ok(Json(ack))
}

#[tracing::instrument(skip_all)]
pub async fn stripe_webhook<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let signature = header(&headers, "stripe-signature");
    let now = chrono::Utc::now().timestamp();
    let ack = state
        .service
        .handle_stripe_event(&body, signature, now)
        .await?;
    Ok(Json(ack))
}

#[tracing::instrument(skip(state))]
pub async fn changenow_widget<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<WidgetQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let widget = state.service.changenow_widget_url(query)?;
    Ok(Json(widget))
}

#[tracing::instrument(skip(state))]
pub async fn changenow_min_amount<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<MinAmountQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let min = state.service.changenow_min_amount(query).await?;
    Ok(Json(min))
}

#[tracing::instrument(skip(state))]
pub async fn changenow_estimate<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<EstimateQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let estimate = state.service.changenow_estimate(query).await?;
    Ok(Json(estimate))
}

#[tracing::instrument(skip(state, req))]
pub async fn changenow_create_sell<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<CreateSellTransactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tx = state.service.changenow_create_sell(req).await?;
    Ok((StatusCode::CREATED, Json(tx)))
}
