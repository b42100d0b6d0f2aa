// ── Operational monitoring jobs ──
//
// Five independently timed jobs: reachability sweep, bandwidth
// collection, SLA/incident detection, daily summary, monthly rollup.
// Jobs own disjoint trigger conditions so no two of them mutate the same
// customer's state in a tick; any one may fail without touching the
// others.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use dashmap::DashMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::schedule::Schedule;
use crate::address::customer_ip;
use crate::error::CoreError;
use crate::model::{
    BandwidthSample, ConnectionKind, Customer, DailySummary, Incident, PingStatus, Severity,
    SlaRecord,
};
use crate::pool::RouterPool;
use crate::store::BillingStore;

/// The monitoring job family.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum JobKind {
    ReachabilitySweep,
    BandwidthCollection,
    SlaDetection,
    DailySummary,
    MonthlySlaRollup,
}

/// Timing and thresholds for the job family.
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub sweep_interval: Duration,
    pub bandwidth_interval: Duration,
    pub sla_interval: Duration,
    /// UTC wall-clock time of the daily summary.
    pub daily_summary_at: (u32, u32),
    /// Day-of-month and UTC wall-clock time of the monthly rollup.
    pub monthly_rollup_at: (u32, u32, u32),
    /// Consecutive failed probes before an incident opens.
    pub failure_threshold: u32,
    /// Probes per reachability check.
    pub ping_count: u32,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(600),
            bandwidth_interval: Duration::from_secs(300),
            sla_interval: Duration::from_secs(300),
            daily_summary_at: (8, 0),
            monthly_rollup_at: (1, 2, 0),
            failure_threshold: 3,
            ping_count: 2,
        }
    }
}

impl JobKind {
    fn schedule(self, cfg: &MonitoringConfig) -> Schedule {
        match self {
            Self::ReachabilitySweep => Schedule::Every(cfg.sweep_interval),
            Self::BandwidthCollection => Schedule::Every(cfg.bandwidth_interval),
            Self::SlaDetection => Schedule::Every(cfg.sla_interval),
            Self::DailySummary => Schedule::DailyAt {
                hour: cfg.daily_summary_at.0,
                minute: cfg.daily_summary_at.1,
            },
            Self::MonthlySlaRollup => Schedule::MonthlyAt {
                day: cfg.monthly_rollup_at.0,
                hour: cfg.monthly_rollup_at.1,
                minute: cfg.monthly_rollup_at.2,
            },
        }
    }
}

/// Per-job status line.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub kind: JobKind,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MonitoringStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
}

/// Scheduler owning the operational job family.
pub struct MonitoringScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn BillingStore>,
    pool: Arc<RouterPool>,
    cfg: MonitoringConfig,
    running: AtomicBool,
    guards: HashMap<JobKind, Mutex<()>>,
    next_runs: DashMap<JobKind, DateTime<Utc>>,
    lifecycle: std::sync::Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    cancel: Option<CancellationToken>,
    handles: Vec<JoinHandle<()>>,
}

impl MonitoringScheduler {
    pub fn new(store: Arc<dyn BillingStore>, pool: Arc<RouterPool>) -> Self {
        Self::with_config(store, pool, MonitoringConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn BillingStore>,
        pool: Arc<RouterPool>,
        cfg: MonitoringConfig,
    ) -> Self {
        let guards = JobKind::iter().map(|k| (k, Mutex::new(()))).collect();
        Self {
            inner: Arc::new(Inner {
                store,
                pool,
                cfg,
                running: AtomicBool::new(false),
                guards,
                next_runs: DashMap::new(),
                lifecycle: std::sync::Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Arm every job timer. Idempotent.
    pub fn start(&self) {
        let Ok(mut lifecycle) = self.inner.lifecycle.lock() else {
            return;
        };
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let cancel = CancellationToken::new();
        lifecycle.cancel = Some(cancel.clone());

        for kind in JobKind::iter() {
            let inner = Arc::clone(&self.inner);
            let cancel = cancel.clone();
            lifecycle.handles.push(tokio::spawn(job_loop(inner, kind, cancel)));
            info!(job = %kind, "monitoring job scheduled");
        }
    }

    /// Disarm all timers and wait for the loops to wind down.
    pub async fn stop(&self) {
        let (cancel, handles) = {
            let Ok(mut lifecycle) = self.inner.lifecycle.lock() else {
                return;
            };
            (lifecycle.cancel.take(), std::mem::take(&mut lifecycle.handles))
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        for handle in handles {
            let _ = handle.await;
        }

        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.next_runs.clear();
        info!("monitoring scheduler stopped");
    }

    /// Run one job on demand, waiting for any in-progress fire of the
    /// same job instead of overlapping it.
    pub async fn run_job(&self, kind: JobKind) -> Result<(), CoreError> {
        let Some(guard) = self.inner.guards.get(&kind) else {
            return Err(CoreError::Internal(format!("no guard for job {kind}")));
        };
        let _held = guard.lock().await;
        run_job_body(&self.inner, kind).await
    }

    pub fn status(&self) -> MonitoringStatus {
        let jobs = JobKind::iter()
            .map(|kind| JobStatus {
                kind,
                next_run: self.inner.next_runs.get(&kind).map(|e| *e),
            })
            .collect();
        MonitoringStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            jobs,
        }
    }
}

// ── Job loop ─────────────────────────────────────────────────────────

async fn job_loop(inner: Arc<Inner>, kind: JobKind, cancel: CancellationToken) {
    let schedule = kind.schedule(&inner.cfg);

    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        inner.next_runs.insert(kind, next);

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {
                let Some(guard) = inner.guards.get(&kind) else { break };
                // Self-overlap guard: a fire landing while the previous
                // one still runs is skipped.
                let Ok(_held) = guard.try_lock() else {
                    debug!(job = %kind, "previous run still active, skipping fire");
                    continue;
                };
                if let Err(e) = run_job_body(&inner, kind).await {
                    warn!(job = %kind, error = %e, "monitoring job failed");
                }
            }
        }
    }
}

async fn run_job_body(inner: &Inner, kind: JobKind) -> Result<(), CoreError> {
    debug!(job = %kind, "monitoring job starting");
    match kind {
        JobKind::ReachabilitySweep => reachability_sweep(inner).await,
        JobKind::BandwidthCollection => bandwidth_collection(inner).await,
        JobKind::SlaDetection => sla_detection(inner).await,
        JobKind::DailySummary => daily_summary(inner).await,
        JobKind::MonthlySlaRollup => monthly_sla_rollup(inner).await,
    }
}

// ── Reachability sweep ───────────────────────────────────────────────

/// Probe every static-IP customer through the router and track
/// consecutive failures. Opens no incidents itself -- that is SLA
/// detection's trigger condition.
async fn reachability_sweep(inner: &Inner) -> Result<(), CoreError> {
    let customers = inner.store.static_ip_customers()?;
    let mut probed = 0usize;

    for customer in customers {
        match probe_customer(inner, &customer).await {
            Ok(()) => probed += 1,
            Err(e) => warn!(customer = %customer.id, error = %e, "reachability probe failed"),
        }
    }

    debug!(probed, "reachability sweep complete");
    Ok(())
}

async fn probe_customer(inner: &Inner, customer: &Customer) -> Result<(), CoreError> {
    let ConnectionKind::StaticIp { address } = &customer.connection else {
        return Ok(());
    };
    let ip = customer_ip(address);
    let outcome = inner.pool.ping(&ip, inner.cfg.ping_count).await?;

    let previous_failures = inner
        .store
        .ping_status(customer.id)?
        .map_or(0, |s| s.consecutive_failures);

    let status = PingStatus {
        customer_id: customer.id,
        address: ip,
        online: outcome.online,
        response_time_ms: outcome.response_time_ms,
        consecutive_failures: if outcome.online {
            0
        } else {
            previous_failures + 1
        },
        last_check: Utc::now(),
    };
    inner.store.upsert_ping_status(status)?;
    Ok(())
}

// ── Bandwidth collection ─────────────────────────────────────────────

/// Pull per-customer queue counters and append time-series samples.
/// Queues follow the `cust-{id}` naming convention; anything else on the
/// device is not ours and is skipped.
async fn bandwidth_collection(inner: &Inner) -> Result<(), CoreError> {
    let records = inner.pool.simple_queues().await?;
    let now = Utc::now();
    let mut collected = 0usize;

    for record in records {
        let Some(name) = record.get("name") else {
            continue;
        };
        let Some(customer_id) = crate::policy::customer_from_queue_name(name) else {
            continue;
        };

        let (tx_bytes, rx_bytes) = record
            .get("bytes")
            .map(|b| split_counter_pair(b))
            .unwrap_or((0, 0));

        inner.store.append_bandwidth_sample(BandwidthSample {
            customer_id,
            queue: name.clone(),
            tx_bytes,
            rx_bytes,
            at: now,
        })?;
        collected += 1;
    }

    debug!(collected, "bandwidth collection complete");
    Ok(())
}

/// The router renders paired counters as `"upload/download"`.
fn split_counter_pair(value: &str) -> (u64, u64) {
    match value.split_once('/') {
        Some((tx, rx)) => (
            tx.trim().parse().unwrap_or(0),
            rx.trim().parse().unwrap_or(0),
        ),
        None => (value.trim().parse().unwrap_or(0), 0),
    }
}

// ── SLA / incident detection ─────────────────────────────────────────

/// Open incidents for customers whose consecutive failures crossed the
/// threshold; close incidents whose customer is reachable again.
/// Severity is assigned at close from the outage duration.
async fn sla_detection(inner: &Inner) -> Result<(), CoreError> {
    let statuses = inner.store.ping_statuses()?;
    let open = inner.store.open_incidents()?;
    let now = Utc::now();

    for status in statuses {
        let existing = open.iter().find(|i| i.customer_id == status.customer_id);

        if status.online {
            if let Some(incident) = existing {
                let severity = severity_for(now - incident.started_at);
                inner.store.close_incident(incident.id, now, severity)?;
                info!(
                    customer = %status.customer_id,
                    %severity,
                    "incident closed, customer reachable again"
                );
            }
        } else if existing.is_none() && status.consecutive_failures >= inner.cfg.failure_threshold
        {
            inner.store.open_incident(Incident {
                id: Uuid::new_v4(),
                customer_id: status.customer_id,
                cause: format!(
                    "offline after {} consecutive failed probes",
                    status.consecutive_failures
                ),
                started_at: now,
                ended_at: None,
                severity: None,
            })?;
            info!(customer = %status.customer_id, "incident opened");
        }
    }
    Ok(())
}

fn severity_for(outage: ChronoDuration) -> Severity {
    if outage < ChronoDuration::minutes(30) {
        Severity::Minor
    } else if outage < ChronoDuration::hours(2) {
        Severity::Major
    } else {
        Severity::Critical
    }
}

// ── Daily summary ────────────────────────────────────────────────────

async fn daily_summary(inner: &Inner) -> Result<(), CoreError> {
    let now = Utc::now();
    let day_start = Utc
        .from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default());

    let incidents = inner.store.incidents_between(day_start, now)?;
    let opened = incidents
        .iter()
        .filter(|i| i.started_at >= day_start)
        .count();
    let closed = incidents
        .iter()
        .filter(|i| i.ended_at.is_some_and(|end| end >= day_start))
        .count();
    let downtime_minutes: i64 = incidents
        .iter()
        .map(|i| {
            let end = i.ended_at.unwrap_or(now);
            let start = i.started_at.max(day_start);
            (end - start).num_minutes().max(0)
        })
        .sum();
    let samples = inner.store.bandwidth_samples_since(day_start)?.len();

    inner.store.record_daily_summary(DailySummary {
        date: now.date_naive(),
        incidents_opened: u32::try_from(opened).unwrap_or(u32::MAX),
        incidents_closed: u32::try_from(closed).unwrap_or(u32::MAX),
        downtime_minutes,
        samples_collected: u32::try_from(samples).unwrap_or(u32::MAX),
    })?;

    info!(opened, closed, downtime_minutes, "daily summary recorded");
    Ok(())
}

// ── Monthly SLA rollup ───────────────────────────────────────────────

/// Aggregate the previous month's incidents into an SLA percentage per
/// customer.
async fn monthly_sla_rollup(inner: &Inner) -> Result<(), CoreError> {
    let now = Utc::now();
    let (year, month) = previous_month(now);
    let (from, to) = month_bounds(year, month);

    let incidents = inner.store.incidents_between(from, to)?;
    let total_minutes = (to - from).num_minutes().max(1);

    for customer in inner.store.customers()? {
        let downtime_minutes: i64 = incidents
            .iter()
            .filter(|i| i.customer_id == customer.id)
            .map(|i| {
                let start = i.started_at.max(from);
                let end = i.ended_at.unwrap_or(to).min(to);
                (end - start).num_minutes().max(0)
            })
            .sum();

        #[allow(clippy::cast_precision_loss)]
        let uptime_percent =
            100.0 * (1.0 - downtime_minutes as f64 / total_minutes as f64);

        inner.store.record_sla(SlaRecord {
            customer_id: customer.id,
            year,
            month,
            uptime_percent,
            downtime_minutes,
        })?;
    }

    info!(year, month, "monthly SLA rollup recorded");
    Ok(())
}

fn previous_month(now: DateTime<Utc>) -> (i32, u32) {
    if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    }
}

fn month_bounds(year: i32, month: u32) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = chrono::NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or_default()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let end = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap_or_default()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default();
    (Utc.from_utc_datetime(&start), Utc.from_utc_datetime(&end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_scales_with_outage_duration() {
        assert_eq!(severity_for(ChronoDuration::minutes(5)), Severity::Minor);
        assert_eq!(severity_for(ChronoDuration::minutes(45)), Severity::Major);
        assert_eq!(severity_for(ChronoDuration::hours(3)), Severity::Critical);
    }

    #[test]
    fn counter_pairs_split_on_slash() {
        assert_eq!(split_counter_pair("123/456"), (123, 456));
        assert_eq!(split_counter_pair("789"), (789, 0));
        assert_eq!(split_counter_pair("x/y"), (0, 0));
    }

    #[test]
    fn month_bounds_cover_december() {
        let (from, to) = month_bounds(2026, 12);
        assert_eq!(from.month(), 12);
        assert_eq!(to.year(), 2027);
        assert_eq!(to.month(), 1);
    }

    #[test]
    fn previous_month_wraps_january() {
        let now: DateTime<Utc> = "2026-01-10T00:00:00Z".parse().unwrap_or_default();
        assert_eq!(previous_month(now), (2025, 12));
    }
}
