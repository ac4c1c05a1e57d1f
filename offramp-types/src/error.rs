//! Error types for the off-ramp service.

use rust_decimal::Decimal;

use crate::domain::{OrderStatus, Provider};

/// Domain-level errors (business rule violations).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Invalid token symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid IBAN: {0}")]
    InvalidIban(String),

    #[error("Invalid payout destination: {0}")]
    InvalidDestination(String),

    #[error("Provider {provider} cannot pay out to a {destination} destination")]
    IncompatibleProvider {
        provider: Provider,
        destination: &'static str,
    },

    #[error("Insufficient liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Insufficient liquidity: available {available}, requested {requested}")]
    InsufficientLiquidity {
        available: Decimal,
        requested: Decimal,
    },

    /// The payout provider rejected the call or could not be reached.
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Webhook not configured: {0}")]
    WebhookNotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientLiquidity {
                available,
                requested,
            } => AppError::InsufficientLiquidity {
                available,
                requested,
            },
            DomainError::InvalidTransition { .. } => AppError::Conflict(err.to_string()),
            DomainError::ValidationError(msg) => AppError::BadRequest(msg),
            e => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(e) => e.into(),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::Conflict(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liquidity_error_keeps_its_numbers() {
        let err: AppError = RepoError::Domain(DomainError::InsufficientLiquidity {
            available: Decimal::new(5, 0),
            requested: Decimal::new(7, 0),
        })
        .into();

        assert!(matches!(
            err,
            AppError::InsufficientLiquidity { available, requested }
                if available == Decimal::new(5, 0) && requested == Decimal::new(7, 0)
        ));
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let err: AppError = DomainError::InvalidTransition {
            from: OrderStatus::Completed,
            to: OrderStatus::Queued,
        }
        .into();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
