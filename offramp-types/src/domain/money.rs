//! Type-safe monetary value with embedded currency.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::error::DomainError;

/// Fiat currencies known to the payout providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    EUR,
    USD,
    GBP,
}

impl Currency {
    /// Returns the number of decimal places for this currency.
    pub fn decimal_places(&self) -> u32 {
        match self {
            Currency::EUR | Currency::USD | Currency::GBP => 2,
        }
    }

    /// Returns the currency symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::EUR => "€",
            Currency::USD => "$",
            Currency::GBP => "£",
        }
    }

    /// Lower-case ISO code, as most provider APIs expect it.
    pub fn code_lower(&self) -> &'static str {
        match self {
            Currency::EUR => "eur",
            Currency::USD => "usd",
            Currency::GBP => "gbp",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EUR" => Ok(Currency::EUR),
            "USD" => Ok(Currency::USD),
            "GBP" => Ok(Currency::GBP),
            other => Err(DomainError::ValidationError(format!(
                "Unknown currency: {}",
                other
            ))),
        }
    }
}

/// Type-safe money representation with embedded currency.
///
/// Amount is stored in the smallest unit of the currency (cents)
/// to avoid floating-point precision issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    /// Creates a new Money value.
    pub fn new(amount: i64, currency: Currency) -> Result<Self, DomainError> {
        if amount < 0 {
            return Err(DomainError::NegativeAmount);
        }
        Ok(Self { amount, currency })
    }

    /// Converts a major-unit decimal (e.g. `12.345` EUR) into minor units,
    /// rounding half away from zero.
    pub fn from_major(major: Decimal, currency: Currency) -> Result<Self, DomainError> {
        if major.is_sign_negative() && !major.is_zero() {
            return Err(DomainError::NegativeAmount);
        }
        let scale = Decimal::from(10_i64.pow(currency.decimal_places()));
        let minor = major
            .round_dp_with_strategy(currency.decimal_places(), RoundingStrategy::MidpointAwayFromZero)
            .checked_mul(scale)
            .ok_or_else(|| DomainError::InvalidAmount("amount overflows".into()))?;
        let amount = i64::try_from(minor)
            .map_err(|_| DomainError::InvalidAmount("amount overflows".into()))?;
        Self::new(amount, currency)
    }

    /// Returns the amount in smallest currency unit.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    /// Returns the currency.
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Returns the amount in major units as an exact decimal.
    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.amount, self.currency.decimal_places())
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self.amount / 100;
        let minor = (self.amount % 100).abs();
        write!(f, "{}{}.{:02}", self.currency.symbol(), major, minor)
    }
}

/// Prices `amount_tokens` at `price_eur` per token, in euro cents.
///
/// Zero-value quotes are rejected: nothing would be paid out.
pub fn quote_eur(amount_tokens: Decimal, price_eur: Decimal) -> Result<Money, DomainError> {
    if amount_tokens <= Decimal::ZERO {
        return Err(DomainError::InvalidAmount(
            "amount_tokens must be positive".into(),
        ));
    }
    if price_eur <= Decimal::ZERO {
        return Err(DomainError::InvalidAmount("price_eur must be positive".into()));
    }
    let total = amount_tokens
        .checked_mul(price_eur)
        .ok_or_else(|| DomainError::InvalidAmount("quote overflows".into()))?;
    let money = Money::from_major(total, Currency::EUR)?;
    if money.is_zero() {
        return Err(DomainError::InvalidAmount(
            "order is worth less than one cent".into(),
        ));
    }
    Ok(money)
}
