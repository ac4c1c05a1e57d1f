//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The application layer depends on these traits, not concrete implementations.

mod payout;
mod repository;

pub use payout::{PayoutProvider, PayoutReceipt, PayoutRequest, ProviderError, ProviderPayoutStatus};
pub use repository::OrderRepository;
