//! # Off-ramp Repository
//!
//! Concrete repository implementations (adapters) for the off-ramp service.
//! This crate provides the stores that implement the `OrderRepository` port,
//! plus the webhook signature helpers shared by the service and the CLI.

#[cfg(not(any(feature = "sqlite", feature = "memory")))]
compile_error!("Enable a repo feature: `sqlite` or `memory`.");

use async_trait::async_trait;
use rust_decimal::Decimal;

use offramp_types::{
    Listing, NewOrder, NewWebhookEvent, Order, OrderId, OrderRepository, OrderStatus, Provider,
    RepoError, StatusUpdate, TokenSymbol,
};

#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
mod types;

pub mod security;



// Re-export individual repos for direct use if needed
#[cfg(feature = "memory")]
pub use memory::MemoryRepo;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteRepo;

/// Repository selected at start-up from the database URL.
pub enum Repo {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteRepo),
    #[cfg(feature = "memory")]
    Memory(memory::MemoryRepo),
}

/// Build and initialize a repository from a database URL.
///
/// `sqlite:` URLs connect and run migrations; `memory://` gives an empty
/// in-process store.
///
/// # Examples
///
/// ```ignore
/// let repo = build_repo("sqlite://data/offramp.db?mode=rwc").await?;
/// let repo = build_repo("memory://").await?;
/// ```
pub async fn build_repo(database_url: &str) -> anyhow::Result<Repo> {
    Repo::new(database_url).await
}

impl Repo {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        #[cfg(feature = "memory")]
        if database_url.starts_with("memory:") {
            tracing::warn!("using the in-memory store; orders are lost on restart");
            return Ok(Repo::Memory(memory::MemoryRepo::new()));
        }

        #[cfg(feature = "sqlite")]
        if database_url.starts_with("sqlite:") {
            let inner = sqlite::SqliteRepo::new(database_url).await?;
            return Ok(Repo::Sqlite(inner));
        }

        anyhow::bail!(
            "unsupported DATABASE_URL scheme (enabled stores: {})",
            enabled_schemes()
        )
    }
}

fn enabled_schemes() -> &'static str {
    if cfg!(all(feature = "sqlite", feature = "memory")) {
        "sqlite:, memory://"
    } else if cfg!(feature = "sqlite") {
        "sqlite:"
    } else {
        "memory://"
    }
}

macro_rules! delegate {
    ($self:ident, $repo:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "sqlite")]
            Repo::Sqlite($repo) => $call,
            #[cfg(feature = "memory")]
            Repo::Memory($repo) => $call,
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Implement OrderRepository for Repo (delegation)
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OrderRepository for Repo {
    async fn upsert_listing(
        &self,
        symbol: &TokenSymbol,
        price_eur: Decimal,
        available_amount: Decimal,
    ) -> Result<Listing, RepoError> {
        delegate!(self, r => r.upsert_listing(symbol, price_eur, available_amount).await)
    }

    async fn get_listing(&self, symbol: &TokenSymbol) -> Result<Option<Listing>, RepoError> {
        delegate!(self, r => r.get_listing(symbol).await)
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, RepoError> {
        delegate!(self, r => r.list_listings().await)
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order, RepoError> {
        delegate!(self, r => r.create_order(new).await)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        delegate!(self, r => r.get_order(id).await)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, RepoError> {
        delegate!(self, r => r.find_by_idempotency_key(key).await)
    }

    async fn find_by_payout_id(
        &self,
        provider: Provider,
        payout_id: &str,
    ) -> Result<Option<Order>, RepoError> {
        delegate!(self, r => r.find_by_payout_id(provider, payout_id).await)
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepoError> {
        delegate!(self, r => r.list_orders(status).await)
    }

    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> Result<Order, RepoError> {
        delegate!(self, r => r.update_status(id, expected, update).await)
    }

    async fn record_webhook_event(&self, event: NewWebhookEvent) -> Result<bool, RepoError> {
        delegate!(self, r => r.record_webhook_event(event).await)
    }
}
