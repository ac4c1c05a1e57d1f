//! Domain models for the off-ramp service.

pub mod destination;
pub mod listing;
pub mod money;
pub mod order;
pub mod webhook;

pub use destination::{PayoutDestination, Provider, normalize_iban};
pub use listing::{Listing, TokenSymbol};
pub use money::{Currency, Money, quote_eur};
pub use order::{NewOrder, Order, OrderId, OrderStatus, StatusUpdate};
pub use webhook::{NewWebhookEvent, WebhookEvent};
