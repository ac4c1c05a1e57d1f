//! Off-ramp Application Service
//!
//! Orchestrates listings, orders, payouts and provider reconciliation
//! through the repository port and the provider registry.

use offramp_providers::http::{find_id, find_str};
use offramp_providers::nowpayments;
use offramp_providers::stripe::map_event;
use offramp_providers::{
    ChangeNowClient, ChangeNowWidget, ProviderRegistry, RetryPolicy, SellTransactionRequest,
    retry_idempotent, retry_transient,
};
use offramp_repo::security::{self, IpnScheme, SignatureError};
use offramp_types::{
    AppError, CreateOrderRequest, CreateSellTransactionRequest, DomainError, EstimateQuery,
    EstimateResponse, Listing, MinAmountQuery, MinAmountResponse, NewOrder, NewWebhookEvent, Order, OrderId,
    OrderRepository, OrderStatus, PayoutProvider, PayoutRequest, Provider,
    ProviderError, RepoError, SetPriceRequest, StatusUpdate, TokenSymbol, TriggerPayoutResponse,
    SellTransactionResponse, WebhookAck, WidgetQuery, WidgetResponse, normalize_iban,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Secrets used to authenticate provider callbacks.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecrets {
    pub nowpayments_ipn: Option<String>,
    pub ipn_scheme: IpnScheme,
    pub stripe: Option<String>,
}

/// Application service for off-ramp operations.
///
/// Generic over `R: OrderRepository` - the adapter is injected at compile time.
pub struct OfframpService<R: OrderRepository> {
    repo: R,
    providers: ProviderRegistry,
    webhooks: WebhookSecrets,
    retry: RetryPolicy,
    widget: Option<ChangeNowWidget>,
    changenow: Option<ChangeNowClient>,
}

impl<R: OrderRepository> OfframpService<R> {
    pub fn new(repo: R, providers: ProviderRegistry) -> Self {
        Self {
            repo,
            providers,
            webhooks: WebhookSecrets::default(),
            retry: RetryPolicy::default(),
            widget: None,
            changenow: None,
        }
    }

    pub fn with_webhook_secrets(mut self, webhooks: WebhookSecrets) -> Self {
        self.webhooks = webhooks;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_widget(mut self, widget: ChangeNowWidget) -> Self {
        self.widget = Some(widget);
        self
    }

    pub fn with_changenow_api(mut self, client: ChangeNowClient) -> Self {
        self.changenow = Some(client);
        self
    }

    /// Returns a reference to the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Listings
    // ─────────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, req), fields(token = %req.token_symbol))]
    pub async fn set_price(&self, req: SetPriceRequest) -> Result<Listing, AppError> {
        let symbol = TokenSymbol::parse(&req.token_symbol)?;
        if req.price_eur <= Decimal::ZERO {
            return Err(AppError::BadRequest("price_eur must be positive".into()));
        }
        if req.available_amount.is_sign_negative() {
            return Err(AppError::BadRequest(
                "available_amount cannot be negative".into(),
            ));
        }

        let listing = self
            .repo
            .upsert_listing(&symbol, req.price_eur, req.available_amount)
            .await?;
        info!(
            token = %listing.token_symbol,
            price_eur = %listing.price_eur,
            available = %listing.available_amount,
            "listing price set"
        );
        Ok(listing)
    }

    pub async fn list_listings(&self) -> Result<Vec<Listing>, AppError> {
        self.repo.list_listings().await.map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Orders
    // ─────────────────────────────────────────────────────────────────────────────

    /// Prices and persists a sell order in `created`.
    #[instrument(skip(self, req), fields(token = %req.token_symbol, amount = %req.amount_tokens))]
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<Order, AppError> {
        let token_symbol = TokenSymbol::parse(&req.token_symbol)?;
        if req.amount_tokens <= Decimal::ZERO {
            return Err(AppError::BadRequest("amount_tokens must be positive".into()));
        }
        let destination = req.destination.normalized()?;
        let provider = req
            .provider
            .unwrap_or_else(|| Provider::default_for(&destination));
        if !provider.supports(&destination) {
            return Err(DomainError::IncompatibleProvider {
                provider,
                destination: destination.kind(),
            }
            .into());
        }
        let idempotency_key = normalize_idempotency_key(req.idempotency_key)?;
        let redirect_url = req
            .redirect_url
            .as_deref()
            .map(validate_redirect_url)
            .transpose()?;

        let new = NewOrder {
            token_symbol: token_symbol.clone(),
            amount_tokens: req.amount_tokens,
            destination,
            provider,
            idempotency_key,
            redirect_url,
        };
        let order = self.repo.create_order(new).await.map_err(|e| match e {
            RepoError::NotFound => AppError::NotFound(format!("No listing for {}", token_symbol)),
            e => e.into(),
        })?;

        info!(order_id = %order.id, eur_cents = order.amount_eur.amount(), provider = %order.provider, "order created");
        Ok(order)
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order, AppError> {
        self.repo
            .get_order(id)
            .await
            .map_err(Into::into)
            .and_then(|opt| opt.ok_or_else(|| AppError::NotFound(format!("Order {}", id))))
    }

    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, AppError> {
        self.repo.list_orders(status).await.map_err(Into::into)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Payouts
    // ─────────────────────────────────────────────────────────────────────────────

    /// Claims the order and asks its provider to pay it out.
    ///
    /// Re-triggering an order that is not `created` or `failed` returns it
    /// unchanged without calling the provider.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn trigger_payout(&self, id: OrderId) -> Result<TriggerPayoutResponse, AppError> {
        let order = self.get_order(id).await?;
        if !order.status.is_payable() {
            debug!(status = %order.status, "payout already triggered");
            return Ok(response(order, None));
        }
        let provider = self.providers.get(order.provider).ok_or_else(|| {
            AppError::ProviderUnavailable(format!("{} is not configured", order.provider))
        })?;

        let order = match self
            .repo
            .update_status(id, order.status, StatusUpdate::to(OrderStatus::Queued))
            .await
        {
            Ok(order) => order,
            Err(RepoError::Conflict(_)) => {
                debug!("lost the claim to a concurrent trigger");
                return Ok(response(self.get_order(id).await?, None));
            }
            Err(e) => return Err(e.into()),
        };

        let request = PayoutRequest {
            order_id: order.id,
            token_symbol: order.token_symbol.clone(),
            amount: order.amount_eur,
            destination: order.destination.clone(),
            attempt: order.payout_attempts,
        };
        let create = || provider.create_payout(&request);
        let result = if provider.deduplicates_payouts() {
            retry_idempotent(&self.retry, "create_payout", create).await
        } else {
            retry_transient(&self.retry, "create_payout", create).await
        };

        match result {
            Ok(receipt) => {
                let Some(payout_id) = receipt.payout_id else {
                    warn!("provider accepted the payout without an id");
                    let order = self
                        .transition(
                            &order,
                            StatusUpdate::to(OrderStatus::ManualReview)
                                .with_error("provider accepted the payout without returning an id"),
                        )
                        .await?;
                    return Ok(response(order, Some(receipt.raw)));
                };

                let mut order = self
                    .transition(
                        &order,
                        StatusUpdate::to(OrderStatus::PayoutPending).with_payout_id(&payout_id),
                    )
                    .await?;
                info!(%payout_id, provider = %order.provider, "payout submitted");

                if let Some(raw_status) = receipt.raw_status.as_deref() {
                    order = self
                        .apply_provider_status(order, None, provider.as_ref(), raw_status)
                        .await?;
                }
                Ok(response(order, Some(receipt.raw)))
            }
            Err(err) if err.is_unconfirmed() => {
                warn!(error = %err, "no answer to the payout request");
                let order = self
                    .transition(
                        &order,
                        StatusUpdate::to(OrderStatus::ManualReview).with_error(format!(
                            "payout may have been submitted: {}",
                            err
                        )),
                    )
                    .await?;
                Ok(response(order, None))
            }
            Err(err) => {
                warn!(error = %err, "payout failed");
                self.transition(
                    &order,
                    StatusUpdate::to(OrderStatus::Failed).with_error(err.to_string()),
                )
                .await?;
                Err(provider_error(err))
            }
        }
    }

    /// Asks the provider for the payout status of an in-flight order and
    /// applies it.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn reconcile_order(&self, order: Order) -> Result<Order, AppError> {
        let Some(payout_id) = order.provider_payout_id.clone() else {
            return Ok(order);
        };
        if !order.status.is_in_flight() {
            return Ok(order);
        }
        let provider = self.providers.get(order.provider).ok_or_else(|| {
            AppError::ProviderUnavailable(format!("{} is not configured", order.provider))
        })?;

        let status = retry_idempotent(&self.retry, "payout_status", || {
            provider.payout_status(&payout_id)
        })
        .await
        .map_err(provider_error)?;

        self.apply_provider_status(order, None, provider.as_ref(), &status.raw_status)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Webhooks
    // ─────────────────────────────────────────────────────────────────────────────

    /// Handles a signed NOWPayments IPN callback.
    #[instrument(skip_all)]
    pub async fn handle_nowpayments_ipn(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, AppError> {
        let secret = self.webhooks.nowpayments_ipn.as_deref().ok_or_else(|| {
            AppError::WebhookNotConfigured("NOWPAYMENTS_IPN_SECRET is not set".into())
        })?;
        security::verify_ipn(self.webhooks.ipn_scheme, secret, body, signature)
            .map_err(signature_error)?;
        let payload = parse_object(body)?;

        let payout_id = find_id(&payload, &["/payout_id", "/batch_withdrawal_id", "/id"]);
        let raw_status = find_str(&payload, &["/payout_status", "/status"]);
        let order_ref = find_id(
            &payload,
            &["/extra/order_id", "/order_id", "/unique_external_id"],
        );
        debug!(payout_id = ?payout_id, raw_status = ?raw_status, "NOWPayments IPN");

        let order = self
            .locate_order(Provider::Nowpayments, payout_id.as_deref(), order_ref.as_deref())
            .await?;
        let recorded = self
            .repo
            .record_webhook_event(NewWebhookEvent {
                provider: Provider::Nowpayments,
                signature: signature.unwrap_or_default().to_string(),
                body_hash: security::body_hash(body),
                order_id: Some(order.id),
                payout_status: raw_status.clone(),
            })
            .await?;
        if !recorded {
            info!(order_id = %order.id, "duplicate IPN ignored");
            return Ok(WebhookAck::duplicate(Some(order.id)));
        }

        let next = raw_status.as_deref().and_then(nowpayments::map_status);
        let order = self
            .apply_status(order, payout_id, next, raw_status.as_deref().unwrap_or("missing"))
            .await?;
        Ok(WebhookAck::applied(&order))
    }

    /// Handles a signed Stripe event; `now` is the current unix time.
    #[instrument(skip_all)]
    pub async fn handle_stripe_event(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<WebhookAck, AppError> {
        let secret = self.webhooks.stripe.as_deref().ok_or_else(|| {
            AppError::WebhookNotConfigured("STRIPE_WEBHOOK_SECRET is not set".into())
        })?;
        security::verify_stripe(secret, signature, body, now).map_err(signature_error)?;
        let payload = parse_object(body)?;

        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let object_status = find_str(&payload, &["/data/object/status"]);
        let Some(next) = map_event(event_type, object_status.as_deref()) else {
            debug!(event_type, "Stripe event ignored");
            return Ok(WebhookAck::ignored());
        };

        let payout_id = find_id(&payload, &["/data/object/id"]);
        let order_ref = find_id(&payload, &["/data/object/metadata/order_id"]);
        let order = self
            .locate_order(Provider::Stripe, payout_id.as_deref(), order_ref.as_deref())
            .await?;

        let recorded = self
            .repo
            .record_webhook_event(NewWebhookEvent {
                provider: Provider::Stripe,
                signature: signature.unwrap_or_default().to_string(),
                body_hash: security::body_hash(body),
                order_id: Some(order.id),
                payout_status: object_status,
            })
            .await?;
        if !recorded {
            info!(order_id = %order.id, "duplicate Stripe event ignored");
            return Ok(WebhookAck::duplicate(Some(order.id)));
        }

        let order = self
            .apply_status(order, payout_id, Some(next), event_type)
            .await?;
        Ok(WebhookAck::applied(&order))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // ChangeNOW
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn changenow_widget_url(&self, query: WidgetQuery) -> Result<WidgetResponse, AppError> {
        let widget = self
            .widget
            .as_ref()
            .ok_or_else(|| AppError::ProviderUnavailable("ChangeNOW is not configured".into()))?;
        if query.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("amount must be positive".into()));
        }
        let from_symbol = sell_ticker(&query.from_symbol)?;
        let redirect_url = query
            .redirect_url
            .as_deref()
            .map(validate_redirect_url)
            .transpose()?;

        let url = widget.sell_url(query.amount, &from_symbol, redirect_url.as_deref());
        Ok(WidgetResponse {
            ok: true,
            url: url.to_string(),
            amount: query.amount,
            from_symbol,
            to: "eur".into(),
        })
    }

    #[instrument(skip(self))]
    pub async fn changenow_min_amount(
        &self,
        query: MinAmountQuery,
    ) -> Result<MinAmountResponse, AppError> {
        let client = self.changenow_api()?;
        let from_symbol = sell_ticker(&query.from_symbol)?;

        let min_amount = retry_idempotent(&self.retry, "changenow_min_amount", || {
            client.min_amount(&from_symbol, "eur")
        })
        .await
        .map_err(provider_error)?;
        Ok(MinAmountResponse {
            ok: true,
            from_symbol,
            to: "eur".into(),
            min_amount,
        })
    }

    #[instrument(skip(self))]
    pub async fn changenow_estimate(
        &self,
        query: EstimateQuery,
    ) -> Result<EstimateResponse, AppError> {
        let client = self.changenow_api()?;
        if query.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("amount must be positive".into()));
        }
        let from_symbol = sell_ticker(&query.from_symbol)?;

        let estimate = retry_idempotent(&self.retry, "changenow_estimate", || {
            client.estimate(query.amount, &from_symbol, "eur")
        })
        .await
        .map_err(provider_error)?;
        Ok(EstimateResponse {
            ok: true,
            from_symbol,
            to: "eur".into(),
            amount: query.amount,
            estimated_amount: estimate.estimated_amount,
            speed_forecast: estimate.speed_forecast,
            warning: estimate.warning,
        })
    }

    /// Opens a sell-to-EUR transaction paying out to an IBAN.
    #[instrument(skip(self, req), fields(from = %req.from_symbol, amount = %req.amount))]
    pub async fn changenow_create_sell(
        &self,
        req: CreateSellTransactionRequest,
    ) -> Result<SellTransactionResponse, AppError> {
        let client = self.changenow_api()?;
        if req.amount <= Decimal::ZERO {
            return Err(AppError::BadRequest("amount must be positive".into()));
        }
        let request = SellTransactionRequest {
            from_ticker: sell_ticker(&req.from_symbol)?,
            to_currency: "eur".into(),
            amount: req.amount,
            payout_address: normalize_iban(&req.payout_address)?,
            refund_address: req
                .refund_address
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty()),
        };

        let tx = retry_transient(&self.retry, "changenow_create_sell", || {
            client.create_sell_transaction(&request)
        })
        .await
        .map_err(provider_error)?;
        Ok(SellTransactionResponse {
            ok: true,
            id: tx.id,
            payin_address: tx.payin_address,
            status: tx.status,
            provider_raw: tx.raw,
        })
    }

    fn changenow_api(&self) -> Result<&ChangeNowClient, AppError> {
        self.changenow
            .as_ref()
            .ok_or_else(|| AppError::ProviderUnavailable("ChangeNOW API is not configured".into()))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────────

    async fn transition(&self, order: &Order, update: StatusUpdate) -> Result<Order, AppError> {
        self.repo
            .update_status(order.id, order.status, update)
            .await
            .map_err(Into::into)
    }

    /// Finds the order a provider callback refers to: by payout id first,
    /// then by our own order id.
    async fn locate_order(
        &self,
        provider: Provider,
        payout_id: Option<&str>,
        order_ref: Option<&str>,
    ) -> Result<Order, AppError> {
        if payout_id.is_none() && order_ref.is_none() {
            return Err(AppError::Unprocessable(
                "event carries neither a payout id nor an order reference".into(),
            ));
        }
        if let Some(payout_id) = payout_id {
            if let Some(order) = self.repo.find_by_payout_id(provider, payout_id).await? {
                return Ok(order);
            }
        }
        if let Some(order_ref) = order_ref {
            if let Ok(uuid) = Uuid::parse_str(order_ref) {
                if let Some(order) = self.repo.get_order(OrderId::from_uuid(uuid)).await? {
                    if order.provider == provider {
                        return Ok(order);
                    }
                }
            }
        }
        Err(AppError::NotFound(format!(
            "No {} order for payout {:?} / reference {:?}",
            provider, payout_id, order_ref
        )))
    }

    async fn apply_provider_status(
        &self,
        order: Order,
        payout_id: Option<String>,
        provider: &dyn PayoutProvider,
        raw_status: &str,
    ) -> Result<Order, AppError> {
        let next = provider.map_status(raw_status);
        self.apply_status(order, payout_id, next, raw_status).await
    }

    /// Moves `order` to `next` when the state machine allows it, storing
    /// `payout_id` if the order has none yet. Late or out-of-order events
    /// leave the order as it is.
    async fn apply_status(
        &self,
        order: Order,
        payout_id: Option<String>,
        next: Option<OrderStatus>,
        raw: &str,
    ) -> Result<Order, AppError> {
        let new_payout_id = payout_id.filter(|_| order.provider_payout_id.is_none());

        let update = match next {
            Some(next) if next != order.status && order.status.can_transition_to(next) => {
                let update = StatusUpdate::to(next);
                if next == OrderStatus::Failed || next == OrderStatus::ManualReview {
                    update.with_error(format!("provider reported {}", raw))
                } else {
                    update
                }
            }
            other => {
                match other {
                    None => warn!(order_id = %order.id, raw_status = raw, "unknown provider status ignored"),
                    Some(next) if next != order.status => info!(
                        order_id = %order.id,
                        from = %order.status,
                        to = %next,
                        "out-of-order provider status ignored"
                    ),
                    Some(_) => {}
                }
                if new_payout_id.is_none() {
                    return Ok(order);
                }
                // Keep the status, only record the payout id.
                let mut update = StatusUpdate::to(order.status);
                update.last_error = order.last_error.clone();
                update
            }
        };
        let update = match new_payout_id {
            Some(payout_id) => update.with_payout_id(payout_id),
            None => update,
        };

        match self.transition(&order, update).await {
            Ok(updated) => {
                info!(order_id = %updated.id, from = %order.status, to = %updated.status, "order status updated");
                Ok(updated)
            }
            Err(AppError::Conflict(reason)) => {
                warn!(order_id = %order.id, %reason, "order changed concurrently");
                self.get_order(order.id).await
            }
            Err(e) => Err(e),
        }
    }
}

fn response(order: Order, provider_raw: Option<Value>) -> TriggerPayoutResponse {
    TriggerPayoutResponse {
        order: order.into(),
        provider_raw,
    }
}

fn provider_error(err: ProviderError) -> AppError {
    AppError::Provider {
        message: err.to_string(),
        status: err.http_status(),
        body: err.body().map(str::to_string),
    }
}

fn signature_error(err: SignatureError) -> AppError {
    AppError::Unauthorized(err.to_string())
}

fn parse_object(body: &[u8]) -> Result<Value, AppError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err(AppError::BadRequest("webhook body must be a JSON object".into())),
        Err(e) => Err(AppError::BadRequest(format!("webhook body is not JSON: {}", e))),
    }
}

fn normalize_idempotency_key(key: Option<String>) -> Result<Option<String>, AppError> {
    let Some(key) = key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(AppError::BadRequest(format!(
            "idempotency_key longer than {} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    Ok(Some(key))
}

fn sell_ticker(raw: &str) -> Result<String, AppError> {
    Ok(TokenSymbol::parse(raw)?.as_str().to_ascii_lowercase())
}

/// Accepts absolute http(s) URLs only.
pub fn validate_redirect_url(raw: &str) -> Result<String, AppError> {
    let url = url::Url::parse(raw.trim())
        .map_err(|e| AppError::BadRequest(format!("redirect_url is not a valid URL: {}", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::BadRequest("redirect_url must be http(s)".into()));
    }
    Ok(url.to_string())
}

