// ── Expiry reconciliation ──
//
// Detects prepaid subscriptions that have lapsed and reverts the
// router-side entitlement, then warns customers approaching expiry.
// Re-running a tick against already-expired rows matches nothing, so the
// whole pass is idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::JobState;
use crate::address::customer_ip;
use crate::error::CoreError;
use crate::model::{ConnectionKind, Customer, Subscription};
use crate::notify::{NotificationEvent, NotificationSink};
use crate::policy;
use crate::pool::RouterPool;
use crate::store::BillingStore;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);
const REMINDER_WINDOW_HOURS: i64 = 24;

/// Result of one reconciliation pass (also the manual-trigger reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryRunReport {
    /// Subscriptions reverted and expired in this pass.
    pub processed: usize,
    /// Reminder notifications requested in this pass.
    pub reminded: usize,
    /// `false` when any per-customer step failed (the batch continued).
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct ExpirySchedulerStatus {
    pub state: JobState,
    pub last_run: Option<ExpiryRunReport>,
}

/// Periodic job transitioning lapsed prepaid subscriptions.
pub struct ExpiryScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn BillingStore>,
    pool: Arc<RouterPool>,
    notifier: Arc<dyn NotificationSink>,
    interval: Duration,
    state: watch::Sender<JobState>,
    last_run: std::sync::Mutex<Option<ExpiryRunReport>>,
    /// Serializes the timer tick against the manual trigger.
    tick_guard: Mutex<()>,
    lifecycle: std::sync::Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiryScheduler {
    pub fn new(
        store: Arc<dyn BillingStore>,
        pool: Arc<RouterPool>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_interval(store, pool, notifier, DEFAULT_INTERVAL)
    }

    pub fn with_interval(
        store: Arc<dyn BillingStore>,
        pool: Arc<RouterPool>,
        notifier: Arc<dyn NotificationSink>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(JobState::Stopped);
        Self {
            inner: Arc::new(Inner {
                store,
                pool,
                notifier,
                interval,
                state,
                last_run: std::sync::Mutex::new(None),
                tick_guard: Mutex::new(()),
                lifecycle: std::sync::Mutex::new(Lifecycle::default()),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Arm the timer. Idempotent: starting a scheduler that is not
    /// stopped does nothing.
    pub fn start(&self) {
        let Ok(mut lifecycle) = self.inner.lifecycle.lock() else {
            return;
        };
        if *self.inner.state.borrow() != JobState::Stopped {
            return;
        }

        let cancel = CancellationToken::new();
        lifecycle.cancel = Some(cancel.clone());

        let inner = Arc::clone(&self.inner);
        lifecycle.handle = Some(tokio::spawn(run_loop(inner, cancel)));

        let _ = self.inner.state.send(JobState::Scheduled);
        info!(interval_secs = self.inner.interval.as_secs(), "expiry scheduler started");
    }

    /// Disarm the timer and wait for the loop to wind down. An in-flight
    /// tick completes; its result is discarded, not aborted.
    pub async fn stop(&self) {
        let (cancel, handle) = {
            let Ok(mut lifecycle) = self.inner.lifecycle.lock() else {
                return;
            };
            (lifecycle.cancel.take(), lifecycle.handle.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let _ = self.inner.state.send(JobState::Stopped);
        info!("expiry scheduler stopped");
    }

    /// On-demand pass for operational testing. Waits for any in-progress
    /// tick instead of overlapping it.
    pub async fn run_manually(&self) -> ExpiryRunReport {
        let _guard = self.inner.tick_guard.lock().await;
        let report = tick(&self.inner).await;
        self.inner.record(report);
        report
    }

    pub fn status(&self) -> ExpirySchedulerStatus {
        ExpirySchedulerStatus {
            state: *self.inner.state.borrow(),
            last_run: self.inner.last_run.lock().ok().and_then(|r| *r),
        }
    }

    /// Watch lifecycle transitions (tests, status UIs).
    pub fn state_stream(&self) -> watch::Receiver<JobState> {
        self.inner.state.subscribe()
    }
}

impl Inner {
    fn record(&self, report: ExpiryRunReport) {
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(report);
        }
    }
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut timer = tokio::time::interval(inner.interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    timer.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = timer.tick() => {
                // A previous tick (or a manual run) still in progress
                // means this fire is skipped, not queued.
                let Ok(_guard) = inner.tick_guard.try_lock() else {
                    debug!("expiry tick still processing, skipping this fire");
                    continue;
                };
                let _ = inner.state.send(JobState::Running);
                let report = tick(&inner).await;
                inner.record(report);
                let _ = inner.state.send(JobState::Scheduled);
            }
        }
    }
}

// ── One pass ─────────────────────────────────────────────────────────

async fn tick(inner: &Inner) -> ExpiryRunReport {
    let now = Utc::now();
    let mut processed = 0usize;
    let mut failed = 0usize;

    // Pass 1: lapsed subscriptions -> revert entitlement, expire, notify.
    match inner.store.expired_active_subscriptions(now) {
        Ok(expired) => {
            if !expired.is_empty() {
                info!(count = expired.len(), "expired subscriptions found");
            }
            for sub in expired {
                match expire_one(inner, &sub).await {
                    Ok(()) => processed += 1,
                    Err(e) => {
                        failed += 1;
                        warn!(
                            customer = %sub.customer_id,
                            subscription = %sub.id,
                            error = %e,
                            "expiry reversion failed; will retry next tick"
                        );
                    }
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "could not query expired subscriptions");
            return ExpiryRunReport {
                processed,
                reminded: 0,
                success: false,
            };
        }
    }

    // Pass 2: approaching expiry -> reminder only, no state mutation.
    let mut reminded = 0usize;
    match inner
        .store
        .subscriptions_expiring_within(now, chrono::Duration::hours(REMINDER_WINDOW_HOURS))
    {
        Ok(soon) => {
            for sub in soon {
                let hours_remaining = (sub.expires_at - now).num_hours().max(0);
                inner.notifier.notify(
                    sub.customer_id,
                    NotificationEvent::ExpiryReminder { hours_remaining },
                );
                reminded += 1;
            }
        }
        Err(e) => {
            warn!(error = %e, "could not query expiring subscriptions");
            failed += 1;
        }
    }

    ExpiryRunReport {
        processed,
        reminded,
        success: failed == 0,
    }
}

/// Revert one customer: router first, billing transition second,
/// notification last. Failure anywhere leaves the subscription active so
/// the next tick retries the whole unit.
async fn expire_one(inner: &Inner, sub: &Subscription) -> Result<(), CoreError> {
    let customer = inner
        .store
        .customer(sub.customer_id)?
        .ok_or_else(|| CoreError::not_found("customer", sub.customer_id))?;

    revert_entitlement(inner, &customer).await?;

    // Monotonic transition; `false` means another path already expired
    // the row and there is nothing further to do.
    if inner.store.mark_subscription_expired(sub.id)? {
        inner.notifier.notify(
            customer.id,
            NotificationEvent::PackageExpired {
                package: sub.package.clone(),
            },
        );
        info!(customer = %customer.id, package = %sub.package, "subscription expired and reverted");
    }
    Ok(())
}

/// Move the customer's router-side state to the no-package policy.
async fn revert_entitlement(inner: &Inner, customer: &Customer) -> Result<(), CoreError> {
    match &customer.connection {
        ConnectionKind::StaticIp { address } => {
            let ip = customer_ip(address);
            inner
                .pool
                .remove_from_address_list(policy::ACTIVE_LIST, &ip)
                .await?;
            inner
                .pool
                .add_to_address_list(
                    policy::ISOLATION_LIST,
                    &ip,
                    &policy::member_comment(&customer.name, "package expired"),
                )
                .await?;
            // The captive-portal redirect must cover isolated customers.
            inner
                .pool
                .add_to_address_list(
                    policy::PORTAL_REDIRECT_LIST,
                    &ip,
                    &policy::member_comment(&customer.name, "portal redirect"),
                )
                .await?;
        }
        ConnectionKind::Pppoe { username, .. } => {
            if !inner
                .pool
                .set_pppoe_profile(username, policy::NO_PACKAGE_PROFILE)
                .await?
            {
                return Err(CoreError::not_found("PPPoE secret", username));
            }
            // Profile change applies on reconnect; drop the live session.
            inner.pool.disconnect_pppoe_session(username).await?;
        }
    }
    Ok(())
}
