//! Repository port trait.
//!
//! Adapters (SQLite, InMemory) implement this trait.

use rust_decimal::Decimal;

use crate::domain::{
    Listing, NewOrder, NewWebhookEvent, Order, OrderId, OrderStatus, Provider, StatusUpdate,
    TokenSymbol,
};
use crate::error::RepoError;

/// Storage for listings, orders and received webhooks.
///
/// `create_order` and `update_status` MUST be atomic: the first reserves
/// listing inventory together with the insert, the second is a
/// compare-and-set on the current status.
#[async_trait::async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    // ─────────────────────────────────────────────────────────────────────────────
    // Listings
    // ─────────────────────────────────────────────────────────────────────────────

    /// Creates or replaces the listing for `symbol`.
    async fn upsert_listing(
        &self,
        symbol: &TokenSymbol,
        price_eur: Decimal,
        available_amount: Decimal,
    ) -> Result<Listing, RepoError>;

    async fn get_listing(&self, symbol: &TokenSymbol) -> Result<Option<Listing>, RepoError>;

    /// All listings, ordered by symbol.
    async fn list_listings(&self) -> Result<Vec<Listing>, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Orders (MUST be atomic)
    // ─────────────────────────────────────────────────────────────────────────────

    /// Prices and inserts an order in `created`, reserving listing inventory.
    ///
    /// A known idempotency key returns the stored order untouched.
    /// Unknown listing is `NotFound`; too little inventory is
    /// `DomainError::InsufficientLiquidity`.
    async fn create_order(&self, new: NewOrder) -> Result<Order, RepoError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, RepoError>;

    async fn find_by_payout_id(
        &self,
        provider: Provider,
        payout_id: &str,
    ) -> Result<Option<Order>, RepoError>;

    /// Orders newest first, optionally filtered by status.
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepoError>;

    /// Moves an order from `expected` to `update.next`.
    ///
    /// Fails with `Conflict` when the stored status is not `expected`, and
    /// with `DomainError::InvalidTransition` when the move is not allowed.
    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> Result<Order, RepoError>;

    // ─────────────────────────────────────────────────────────────────────────────
    // Webhooks
    // ─────────────────────────────────────────────────────────────────────────────

    /// Stores a webhook event; returns `false` when the same body was
    /// already recorded for this provider.
    async fn record_webhook_event(&self, event: NewWebhookEvent) -> Result<bool, RepoError>;
}
