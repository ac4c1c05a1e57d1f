//! SQLite row types and their conversion into domain values.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use offramp_types::{
    Currency, Listing, Money, Order, OrderId, OrderStatus, PayoutDestination, Provider, RepoError,
    TokenSymbol,
};

// ─────────────────────────────────────────────────────────────────────────────
// Database row structs (derive FromRow for automatic mapping)
// ─────────────────────────────────────────────────────────────────────────────

pub const LISTING_COLUMNS: &str = "token_symbol, price_eur, available_amount, updated_at";

pub const ORDER_COLUMNS: &str = "id, token_symbol, amount_tokens, price_eur, amount_eur_cents, \
     currency, destination, provider, status, provider_payout_id, payout_attempts, last_error, \
     idempotency_key, redirect_url, created_at, updated_at";

/// Listing row from database.
#[derive(FromRow)]
pub struct DbListing {
    pub token_symbol: String,
    pub price_eur: String,
    pub available_amount: String,
    pub updated_at: String,
}

/// Order row from database.
#[derive(FromRow)]
pub struct DbOrder {
    pub id: String,
    pub token_symbol: String,
    pub amount_tokens: String,
    pub price_eur: String,
    pub amount_eur_cents: i64,
    pub currency: String,
    /// Tagged JSON of `PayoutDestination`
    pub destination: String,
    pub provider: String,
    pub status: String,
    pub provider_payout_id: Option<String>,
    pub payout_attempts: i64,
    pub last_error: Option<String>,
    pub idempotency_key: Option<String>,
    pub redirect_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Status-only row for compare-and-set checks.
#[derive(FromRow)]
pub struct DbStatus {
    pub status: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

fn db_err(e: impl std::fmt::Display) -> RepoError {
    RepoError::Database(e.to_string())
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub fn format_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_time(s: &str) -> Result<DateTime<Utc>, RepoError> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(db_err)?
        .with_timezone(&Utc))
}

pub fn parse_decimal(s: &str) -> Result<Decimal, RepoError> {
    Decimal::from_str(s).map_err(db_err)
}

pub fn parse_status(s: &str) -> Result<OrderStatus, RepoError> {
    OrderStatus::from_str(s).map_err(db_err)
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain conversion
// ─────────────────────────────────────────────────────────────────────────────

impl DbListing {
    /// Convert database row to domain Listing.
    pub fn into_domain(self) -> Result<Listing, RepoError> {
        Ok(Listing {
            token_symbol: TokenSymbol::parse(&self.token_symbol)?,
            price_eur: parse_decimal(&self.price_eur)?,
            available_amount: parse_decimal(&self.available_amount)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

impl DbOrder {
    /// Convert database row to domain Order.
    pub fn into_domain(self) -> Result<Order, RepoError> {
        let id = uuid::Uuid::parse_str(&self.id).map_err(db_err)?;
        let currency = Currency::from_str(&self.currency)?;
        let destination: PayoutDestination =
            serde_json::from_str(&self.destination).map_err(db_err)?;

        Ok(Order {
            id: OrderId::from_uuid(id),
            token_symbol: TokenSymbol::parse(&self.token_symbol)?,
            amount_tokens: parse_decimal(&self.amount_tokens)?,
            price_eur: parse_decimal(&self.price_eur)?,
            amount_eur: Money::new(self.amount_eur_cents, currency)?,
            destination,
            provider: Provider::from_str(&self.provider)?,
            status: parse_status(&self.status)?,
            provider_payout_id: self.provider_payout_id,
            payout_attempts: u32::try_from(self.payout_attempts).map_err(db_err)?,
            last_error: self.last_error,
            idempotency_key: self.idempotency_key,
            redirect_url: self.redirect_url,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_times_sort_lexically() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = a + chrono::Duration::microseconds(1500);
        let (fa, fb) = (format_time(a), format_time(b));
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_time(&fb).unwrap(), b);
    }
}
