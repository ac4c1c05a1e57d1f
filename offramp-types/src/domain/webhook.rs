use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::destination::Provider;
use super::order::OrderId;

/// An inbound provider notification, kept for deduplication and audit.
///
/// `(provider, body_hash)` is unique: the same payload delivered twice is
/// recorded once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: Provider,
    pub signature: String,
    /// Hex SHA-256 of the raw request body
    pub body_hash: String,
    pub order_id: Option<OrderId>,
    /// Provider status string as received
    pub payout_status: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub provider: Provider,
    pub signature: String,
    pub body_hash: String,
    pub order_id: Option<OrderId>,
    pub payout_status: Option<String>,
}

impl NewWebhookEvent {
    pub fn into_event(self) -> WebhookEvent {
        WebhookEvent {
            id: Uuid::new_v4(),
            provider: self.provider,
            signature: self.signature,
            body_hash: self.body_hash,
            order_id: self.order_id,
            payout_status: self.payout_status,
            received_at: Utc::now(),
        }
    }
}

