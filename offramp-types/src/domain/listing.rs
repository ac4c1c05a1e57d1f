//! OTC listing domain model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

const MAX_SYMBOL_LEN: usize = 16;

/// Ticker of a token offered over the counter, always upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TokenSymbol(String);

impl TokenSymbol {
    /// Normalises and validates a raw ticker (`" neno "` becomes `NENO`).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let symbol = raw.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(DomainError::InvalidSymbol(
                "token_symbol cannot be empty".into(),
            ));
        }
        if symbol.len() > MAX_SYMBOL_LEN {
            return Err(DomainError::InvalidSymbol(format!(
                "token_symbol longer than {} characters",
                MAX_SYMBOL_LEN
            )));
        }
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::InvalidSymbol(format!(
                "token_symbol must be alphanumeric: {}",
                symbol
            )));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TokenSymbol {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TokenSymbol> for String {
    fn from(symbol: TokenSymbol) -> Self {
        symbol.0
    }
}

impl std::fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current OTC price and remaining inventory for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub token_symbol: TokenSymbol,
    /// Price of one token in EUR
    pub price_eur: Decimal,
    /// Tokens still available for sale
    pub available_amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Creates a listing after checking the price and inventory bounds.
    pub fn new(
        token_symbol: TokenSymbol,
        price_eur: Decimal,
        available_amount: Decimal,
    ) -> Result<Self, DomainError> {
        if price_eur <= Decimal::ZERO {
            return Err(DomainError::InvalidAmount(
                "price_eur must be positive".into(),
            ));
        }
        if available_amount < Decimal::ZERO {
            return Err(DomainError::InvalidAmount(
                "available_amount cannot be negative".into(),
            ));
        }
        Ok(Self {
            token_symbol,
            price_eur,
            available_amount,
            updated_at: Utc::now(),
        })
    }

    /// Takes `amount` tokens out of the inventory.
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), DomainError> {
        if amount > self.available_amount {
            return Err(DomainError::InsufficientLiquidity {
                available: self.available_amount,
                requested: amount,
            });
        }
        self.available_amount -= amount;
        self.updated_at = Utc::now();
        Ok(())
    }
}
