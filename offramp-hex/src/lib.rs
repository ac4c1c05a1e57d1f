//! # Off-ramp Hex
//!
//! Application service layer, reconciliation poller and HTTP adapter for
//! the off-ramp service.
//!
//! ## Architecture
//!
//! - `service` - Application service (orders, payouts, webhooks)
//! - `poller` - Background payout status reconciliation
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! The service is generic over `R: OrderRepository`, allowing
//! different repository implementations to be injected.

pub mod inbound;
pub mod openapi;
pub mod poller;
pub mod service;


pub use poller::PayoutPoller;
pub use service::{OfframpService, WebhookSecrets};
