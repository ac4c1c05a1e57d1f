//! Outbound adapters for the payout providers.

use std::collections::HashMap;
use std::sync::Arc;

use offramp_types::{PayoutProvider, Provider};

pub mod changenow;
pub mod http;
pub mod nowpayments;
pub mod retry;
pub mod stripe;
pub mod wise;

pub use changenow::{
    ChangeNowApiConfig, ChangeNowClient, ChangeNowConfig, ChangeNowWidget, SellEstimate,
    SellTransaction, SellTransactionRequest,
};
pub use nowpayments::{NowPaymentsClient, NowPaymentsConfig};
pub use retry::{RetryPolicy, retry_idempotent, retry_transient};
pub use stripe::{PayoutMethod, StripeClient, StripeConfig};
pub use wise::{WiseClient, WiseConfig};

/// Configured providers, keyed by the provider they speak for.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Provider, Arc<dyn PayoutProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under its own kind, replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn PayoutProvider>) -> &mut Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn with(mut self, provider: Arc<dyn PayoutProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: Provider) -> Option<Arc<dyn PayoutProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<Provider> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.kinds())
            .finish()
    }
}
