//! SQLite repository adapter.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

use offramp_types::{
    DomainError, Listing, NewOrder, NewWebhookEvent, Order, OrderId, OrderRepository, OrderStatus,
    Provider, RepoError, StatusUpdate, TokenSymbol,
};

use crate::types::{
    DbListing, DbOrder, DbStatus, LISTING_COLUMNS, ORDER_COLUMNS, format_time, parse_status,
};

const MIGRATIONS: [&str; 2] = [
    include_str!("../migrations/0001_create_tables.sql"),
    include_str!("../migrations/0002_create_webhook_events.sql"),
];

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

fn tx_err(e: sqlx::Error) -> RepoError {
    RepoError::Transaction(e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite repository implementation.
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        // Ensure on-disk SQLite target directory exists.
        if !in_memory {
            if let Some(path) = database_url.strip_prefix("sqlite://") {
                let path = path.split('?').next().unwrap_or(path);
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // every connection to `:memory:` would otherwise see its own database
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Applies the bundled migrations; every statement is idempotent.
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        for ddl in MIGRATIONS {
            sqlx::raw_sql(ddl).execute(&self.pool).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn fetch_order(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
    ) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?;
        row.map(DbOrder::into_domain).transpose()
    }

    async fn fetch_by_key(
        tx: &mut Transaction<'_, Sqlite>,
        key: &str,
    ) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;
        row.map(DbOrder::into_domain).transpose()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Repository implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl OrderRepository for SqliteRepo {
    async fn upsert_listing(
        &self,
        symbol: &TokenSymbol,
        price_eur: Decimal,
        available_amount: Decimal,
    ) -> Result<Listing, RepoError> {
        let listing = Listing::new(symbol.clone(), price_eur, available_amount)?;

        sqlx::query(
            r#"INSERT INTO listings (token_symbol, price_eur, available_amount, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (token_symbol) DO UPDATE SET
                   price_eur = excluded.price_eur,
                   available_amount = excluded.available_amount,
                   updated_at = excluded.updated_at"#,
        )
        .bind(listing.token_symbol.as_str())
        .bind(listing.price_eur.to_string())
        .bind(listing.available_amount.to_string())
        .bind(format_time(listing.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(listing)
    }

    async fn get_listing(&self, symbol: &TokenSymbol) -> Result<Option<Listing>, RepoError> {
        let row: Option<DbListing> = sqlx::query_as(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE token_symbol = ?"
        ))
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbListing::into_domain).transpose()
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, RepoError> {
        let rows: Vec<DbListing> = sqlx::query_as(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings ORDER BY token_symbol"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbListing::into_domain).collect()
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order, RepoError> {
        let symbol = new.token_symbol.as_str().to_string();

        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        // A no-op write takes the database write lock before anything is read.
        let touched = sqlx::query(
            r#"UPDATE listings SET updated_at = updated_at WHERE token_symbol = ?"#,
        )
        .bind(&symbol)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = Self::fetch_by_key(&mut db_tx, key).await? {
                return Ok(existing);
            }
        }
        if touched.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        let row: DbListing = sqlx::query_as(&format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE token_symbol = ?"
        ))
        .bind(&symbol)
        .fetch_one(&mut *db_tx)
        .await
        .map_err(db_err)?;
        let mut listing = row.into_domain()?;

        let order = Order::price(new, listing.price_eur)?;
        listing.reserve(order.amount_tokens)?;

        sqlx::query(
            r#"UPDATE listings SET available_amount = ?, updated_at = ? WHERE token_symbol = ?"#,
        )
        .bind(listing.available_amount.to_string())
        .bind(format_time(listing.updated_at))
        .bind(&symbol)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let destination = serde_json::to_string(&order.destination)
            .map_err(|e| RepoError::Database(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(order.id.to_string())
        .bind(order.token_symbol.as_str())
        .bind(order.amount_tokens.to_string())
        .bind(order.price_eur.to_string())
        .bind(order.amount_eur.amount())
        .bind(order.amount_eur.currency().to_string())
        .bind(destination)
        .bind(order.provider.as_str())
        .bind(order.status.as_str())
        .bind(&order.provider_payout_id)
        .bind(i64::from(order.payout_attempts))
        .bind(&order.last_error)
        .bind(&order.idempotency_key)
        .bind(&order.redirect_url)
        .bind(format_time(order.created_at))
        .bind(format_time(order.updated_at))
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        db_tx.commit().await.map_err(tx_err)?;

        tracing::debug!(order_id = %order.id, symbol = %order.token_symbol, "order persisted");
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> =
            sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(DbOrder::into_domain).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbOrder::into_domain).transpose()
    }

    async fn find_by_payout_id(
        &self,
        provider: Provider,
        payout_id: &str,
    ) -> Result<Option<Order>, RepoError> {
        let row: Option<DbOrder> = sqlx::query_as(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE provider = ? AND provider_payout_id = ?"
        ))
        .bind(provider.as_str())
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(DbOrder::into_domain).transpose()
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepoError> {
        let rows: Vec<DbOrder> = match status {
            Some(status) => sqlx::query_as(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE status = ? \
                 ORDER BY created_at DESC, rowid DESC"
            ))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query_as(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, rowid DESC"
            ))
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(db_err)?;

        rows.into_iter().map(DbOrder::into_domain).collect()
    }

    async fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> Result<Order, RepoError> {
        if expected != update.next && !expected.can_transition_to(update.next) {
            return Err(DomainError::InvalidTransition {
                from: expected,
                to: update.next,
            }
            .into());
        }

        let id_str = id.to_string();
        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        let result = sqlx::query(
            r#"UPDATE orders
               SET status = ?,
                   provider_payout_id = COALESCE(?, provider_payout_id),
                   payout_attempts = payout_attempts + ?,
                   last_error = ?,
                   updated_at = ?
               WHERE id = ? AND status = ?"#,
        )
        .bind(update.next.as_str())
        .bind(&update.provider_payout_id)
        .bind(i64::from(update.claims_payout(expected)))
        .bind(&update.last_error)
        .bind(format_time(Utc::now()))
        .bind(&id_str)
        .bind(expected.as_str())
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let current: Option<DbStatus> =
                sqlx::query_as(r#"SELECT status FROM orders WHERE id = ?"#)
                    .bind(&id_str)
                    .fetch_optional(&mut *db_tx)
                    .await
                    .map_err(db_err)?;
            return match current {
                None => Err(RepoError::NotFound),
                Some(row) => Err(RepoError::Conflict(format!(
                    "order {} is {}, expected {}",
                    id,
                    parse_status(&row.status)?,
                    expected
                ))),
            };
        }

        let order = Self::fetch_order(&mut db_tx, &id_str)
            .await?
            .ok_or(RepoError::NotFound)?;
        db_tx.commit().await.map_err(tx_err)?;

        Ok(order)
    }

    async fn record_webhook_event(&self, event: NewWebhookEvent) -> Result<bool, RepoError> {
        let event = event.into_event();

        let result = sqlx::query(
            r#"INSERT INTO webhook_events (id, provider, signature, body_hash, order_id, payout_status, received_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (provider, body_hash) DO NOTHING"#,
        )
        .bind(event.id.to_string())
        .bind(event.provider.as_str())
        .bind(&event.signature)
        .bind(&event.body_hash)
        .bind(event.order_id.map(|id| id.to_string()))
        .bind(&event.payout_status)
        .bind(format_time(event.received_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }
}

impl SqliteRepo {
    /// Number of webhook events stored for `provider`.
    pub async fn count_webhook_events(&self, provider: Provider) -> Result<i64, RepoError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM webhook_events WHERE provider = ?"#)
                .bind(provider.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count)
    }
}
