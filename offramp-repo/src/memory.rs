//! In-memory repository adapter backed by `DashMap`.
//!
//! Used by tests and by `memory://` deployments; nothing survives a restart.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

use offramp_types::{
    DomainError, Listing, NewOrder, NewWebhookEvent, Order, OrderId, OrderRepository, OrderStatus,
    Provider, RepoError, StatusUpdate, TokenSymbol, WebhookEvent,
};

#[derive(Default)]
pub struct MemoryRepo {
    listings: DashMap<TokenSymbol, Listing>,
    orders: DashMap<OrderId, Order>,
    idempotency: DashMap<String, OrderId>,
    webhooks: DashMap<(Provider, String), WebhookEvent>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.webhooks.iter().map(|e| e.value().clone()).collect()
    }

    fn existing(&self, id: OrderId) -> Result<Order, RepoError> {
        self.orders
            .get(&id)
            .map(|o| o.clone())
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl OrderRepository for MemoryRepo {
    async fn upsert_listing(
        &self,
        symbol: &TokenSymbol,
        price_eur: Decimal,
        available_amount: Decimal,
    ) -> Result<Listing, RepoError> {
        let listing = Listing::new(symbol.clone(), price_eur, available_amount)?;
        self.listings.insert(symbol.clone(), listing.clone());
        Ok(listing)
    }

    async fn get_listing(&self, symbol: &TokenSymbol) -> Result<Option<Listing>, RepoError> {
        Ok(self.listings.get(symbol).map(|l| l.clone()))
    }

    async fn list_listings(&self) -> Result<Vec<Listing>, RepoError> {
        let mut listings: Vec<Listing> = self.listings.iter().map(|l| l.value().clone()).collect();
        listings.sort_by(|a, b| a.token_symbol.cmp(&b.token_symbol));
        Ok(listings)
    }

    async fn create_order(&self, new: NewOrder) -> Result<Order, RepoError> {
        if let Some(key) = &new.idempotency_key {
            if let Some(id) = self.idempotency.get(key).map(|id| *id) {
                return self.existing(id);
            }
        }

        // Holding the listing entry serialises orders for the same token.
        let mut listing = self
            .listings
            .get_mut(&new.token_symbol)
            .ok_or(RepoError::NotFound)?;
        let order = Order::price(new, listing.price_eur)?;

        match order.idempotency_key.clone() {
            Some(key) => match self.idempotency.entry(key) {
                Entry::Occupied(entry) => {
                    let id = *entry.get();
                    drop(entry);
                    drop(listing);
                    self.existing(id)
                }
                Entry::Vacant(entry) => {
                    listing.reserve(order.amount_tokens)?;
                    self.orders.insert(order.id, order.clone());
                    entry.insert(order.id);
                    Ok(order)
                }
            },
            None => {
                listing.reserve(order.amount_tokens)?;
                self.orders.insert(order.id, order.clone());
                Ok(order)
            }
        }
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>, RepoError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, RepoError> {
        let Some(id) = self.idempotency.get(key).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_by_payout_id(
        &self,
        provider: Provider,
        payout_id: &str,
    ) -> Result<Option<Order>, RepoError> {
        Ok(self
            .orders
            .iter()
            .find(|o| o.provider == provider && o.provider_payout_id.as_deref() == Some(payout_id))
            .map(|o| o.value().clone()))
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, RepoError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .map(|o| o.value().clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
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

        let mut order = self.orders.get_mut(&id).ok_or(RepoError::NotFound)?;
        if order.status != expected {
            return Err(RepoError::Conflict(format!(
                "order {} is {}, expected {}",
                id, order.status, expected
            )));
        }
        order.apply(&update)?;
        Ok(order.clone())
    }

    async fn record_webhook_event(&self, event: NewWebhookEvent) -> Result<bool, RepoError> {
        match self
            .webhooks
            .entry((event.provider, event.body_hash.clone()))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(event.into_event());
                Ok(true)
            }
        }
    }
}
