//! Periodic reconciliation of checkout sessions the webhook never settled.
//!
//! Sessions still `open` in the ledger after the grace period are re-fetched
//! from the provider. Paid ones go through the same reconciler as the webhook;
//! expired ones are closed in the ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use dormswap_payments::SessionStatus;

use crate::reconciler::{PaymentReconciler, ReconcileReport};
use crate::store::{CheckoutState, MarketStore, StoreError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub reconciled: usize,
    pub expired: usize,
    pub errors: usize,
}

#[derive(Clone)]
pub struct ReconciliationSweep {
    store: Arc<dyn MarketStore>,
    reconciler: PaymentReconciler,
    grace: Duration,
}

impl ReconciliationSweep {
    pub fn new(store: Arc<dyn MarketStore>, reconciler: PaymentReconciler, grace: Duration) -> Self {
        Self {
            store,
            reconciler,
            grace,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let grace = chrono::Duration::from_std(self.grace).unwrap_or(chrono::Duration::zero());
        let stale = self.store.open_checkouts(now - grace).await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for record in stale {
            match self.reconciler.reconcile_session(&record.session_id).await {
                Ok((_, ReconcileReport::Applied)) => report.reconciled += 1,
                Ok((session, _)) if session.status == SessionStatus::Expired => {
                    self.store
                        .set_checkout_state(&record.session_id, CheckoutState::Expired)
                        .await?;
                    report.expired += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(session_id = %record.session_id, error = %e, "sweep could not reconcile session");
                    report.errors += 1;
                }
            }
        }

        if report.reconciled > 0 || report.expired > 0 || report.errors > 0 {
            tracing::info!(
                examined = report.examined,
                reconciled = report.reconciled,
                expired = report.expired,
                errors = report.errors,
                "reconciliation sweep finished"
            );
        }
        Ok(report)
    }

    /// Run the sweep every `interval` until the handle is shut down.
    pub fn spawn(self, interval: Duration) -> SweepHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(Utc::now()).await {
                            tracing::error!(error = %e, "reconciliation sweep failed");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        });
        SweepHandle { shutdown, join }
    }
}

impl core::fmt::Debug for ReconciliationSweep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReconciliationSweep")
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

/// Handle to stop a spawned sweep.
#[derive(Debug)]
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}
