//! Background reconciliation of in-flight payouts.
//!
//! Every `interval` the poller asks each provider for the status of orders
//! in `payout_pending` or `processing` and applies the answer through the
//! same guarded path as webhooks. Providers that never call back (Wise)
//! are reconciled only this way.

use std::sync::Arc;
use std::time::Duration;

use offramp_types::{AppError, OrderRepository};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::OfframpService;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Outcome of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct PayoutPoller<R: OrderRepository> {
    service: Arc<OfframpService<R>>,
    interval: Duration,
}

impl<R: OrderRepository> PayoutPoller<R> {
    pub fn new(service: Arc<OfframpService<R>>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Runs sweeps until `shutdown` is cancelled. A zero interval disables
    /// polling entirely.
    pub async fn run(self, shutdown: CancellationToken) {
        if self.interval.is_zero() {
            info!("payout poller disabled");
            return;
        }
        info!(interval_secs = self.interval.as_secs(), "payout poller starting");

        loop {
            match self.reconcile_once().await {
                Ok(report) if report.checked > 0 => info!(?report, "payout sweep finished"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "payout sweep could not list orders"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("payout poller shutting down");
                    return;
                }
            }
        }
    }

    /// One sweep over every in-flight order that has a payout id.
    pub async fn reconcile_once(&self) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        // One snapshot, so an order that moves on mid-sweep is seen once.
        let orders = self.service.list_orders(None).await?;

        for order in orders {
            if !order.status.is_in_flight() || order.provider_payout_id.is_none() {
                continue;
            }
            if self.service.providers().get(order.provider).is_none() {
                debug!(order_id = %order.id, provider = %order.provider, "provider not configured, skipping");
                continue;
            }

            report.checked += 1;
            let (id, before) = (order.id, order.status);
            match self.service.reconcile_order(order).await {
                Ok(updated) if updated.status != before => report.updated += 1,
                Ok(_) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(order_id = %id, error = %e, "payout status check failed");
                }
            }
        }

        Ok(report)
    }
}
