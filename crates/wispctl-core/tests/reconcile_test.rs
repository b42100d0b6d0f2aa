// End-to-end reconciliation flows against the in-process fake router.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use uuid::Uuid;

use wispctl_api::testing::FakeRouter;
use wispctl_api::TransportConfig;
use wispctl_core::{
    BillingMode, BillingStore, ConnectionKind, CoreError, Customer, CustomerId, ExpiryScheduler,
    HealthMonitor, Incident, JobKind, JobState, MemoryStore, MigrationCoordinator,
    MonitoringScheduler, NotificationSink, QueueKind, QueueSpec, RecordingSink, RouterPool,
    RouterSettings, Subscription, SubscriptionId, SubscriptionStatus,
};

const ADD: &str = "/ip/firewall/address-list/add";
const IDENTITY: &str = "/system/identity/print";

struct Harness {
    router: FakeRouter,
    store: Arc<MemoryStore>,
    dyn_store: Arc<dyn BillingStore>,
    pool: Arc<RouterPool>,
    sink: Arc<RecordingSink>,
}

async fn harness() -> Harness {
    harness_with_timeout(Duration::from_secs(5)).await
}

async fn harness_with_timeout(command_timeout: Duration) -> Harness {
    let router = FakeRouter::spawn().await;
    let store = Arc::new(MemoryStore::new());
    store
        .put_router_settings(RouterSettings {
            host: router.host(),
            port: router.port(),
            username: router.username().to_owned(),
            password: SecretString::from(router.password().to_owned()),
            use_tls: false,
        })
        .expect("seed settings");

    let dyn_store: Arc<dyn BillingStore> = store.clone();
    let pool = Arc::new(RouterPool::with_transport(
        Arc::clone(&dyn_store),
        TransportConfig::default(),
        command_timeout,
    ));
    let sink = Arc::new(RecordingSink::new());

    Harness {
        router,
        store,
        dyn_store,
        pool,
        sink,
    }
}

fn static_customer(id: u64, mode: BillingMode, gateway_cidr: &str) -> Customer {
    Customer {
        id: CustomerId(id),
        name: format!("customer-{id}"),
        billing_mode: mode,
        connection: ConnectionKind::StaticIp {
            address: gateway_cidr.to_owned(),
        },
        phone: Some("0800".into()),
    }
}

fn pppoe_customer(id: u64, mode: BillingMode, username: &str, profile: &str) -> Customer {
    Customer {
        id: CustomerId(id),
        name: format!("customer-{id}"),
        billing_mode: mode,
        connection: ConnectionKind::Pppoe {
            username: username.to_owned(),
            profile: profile.to_owned(),
        },
        phone: None,
    }
}

fn subscription(id: u64, customer: u64, expires_in_hours: i64) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: SubscriptionId(id),
        customer_id: CustomerId(customer),
        package: "fiber-20m".into(),
        activated_at: now - ChronoDuration::days(30),
        expires_at: now + ChronoDuration::hours(expires_in_hours),
        status: SubscriptionStatus::Active,
    }
}

// ── Expiry reconciliation ────────────────────────────────────────────

#[tokio::test]
async fn expired_subscription_is_reverted_expired_and_notified_exactly_once() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(1, BillingMode::Prepaid, "192.168.1.1/30"))
        .expect("seed");
    h.store
        .put_subscription(subscription(1, 1, -2))
        .expect("seed");
    // Entitled state on the device before expiry.
    h.router.add_list_entry("prepaid-active", "192.168.1.2", "entitled");

    let scheduler = ExpiryScheduler::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let report = scheduler.run_manually().await;
    assert!(report.success);
    assert_eq!(report.processed, 1);

    // Router: moved off the active list, isolated, portal-redirected.
    assert!(!h.router.in_list("prepaid-active", "192.168.1.2"));
    assert!(h.router.in_list("prepaid-no-package", "192.168.1.2"));
    assert!(h.router.in_list("portal-redirect", "192.168.1.2"));

    // Billing: monotonic transition, exactly one notification.
    assert!(h
        .store
        .active_subscription(CustomerId(1))
        .expect("query")
        .is_none());
    assert_eq!(h.sink.count_for(CustomerId(1), "package_expired"), 1);

    let adds_after_first = h.router.times_seen(ADD);

    // A second immediate tick matches no rows: no reversion, no
    // notification, no router writes.
    let second = scheduler.run_manually().await;
    assert!(second.success);
    assert_eq!(second.processed, 0);
    assert_eq!(h.router.times_seen(ADD), adds_after_first);
    assert_eq!(h.sink.count_for(CustomerId(1), "package_expired"), 1);
}

#[tokio::test]
async fn expiring_soon_gets_a_reminder_and_no_state_mutation() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(1, BillingMode::Prepaid, "10.1.0.1/30"))
        .expect("seed");
    h.store.put_subscription(subscription(1, 1, 5)).expect("seed");

    let scheduler = ExpiryScheduler::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let report = scheduler.run_manually().await;
    assert_eq!(report.processed, 0);
    assert_eq!(report.reminded, 1);
    assert_eq!(h.sink.count_for(CustomerId(1), "package_expiry_reminder"), 1);
    assert!(h
        .store
        .active_subscription(CustomerId(1))
        .expect("query")
        .is_some());
}

#[tokio::test]
async fn pppoe_expiry_downgrades_profile_and_drops_the_session() {
    let h = harness().await;
    h.router.set_secret("joe", "fiber-20m");
    h.router.add_active_session("joe");
    h.store
        .put_customer(pppoe_customer(3, BillingMode::Prepaid, "joe", "fiber-20m"))
        .expect("seed");
    h.store
        .put_subscription(subscription(3, 3, -1))
        .expect("seed");

    let scheduler = ExpiryScheduler::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let report = scheduler.run_manually().await;
    assert!(report.success);
    assert_eq!(report.processed, 1);
    assert_eq!(
        h.router.secret_profile("joe").as_deref(),
        Some("prepaid-no-package")
    );
    assert!(h.router.active_sessions().is_empty());
}

#[tokio::test]
async fn one_failing_customer_does_not_abort_the_batch() {
    let h = harness().await;
    // Customer 1's PPPoE secret is missing on the router; customer 2 is fine.
    h.store
        .put_customer(pppoe_customer(1, BillingMode::Prepaid, "ghost", "x"))
        .expect("seed");
    h.store
        .put_subscription(subscription(1, 1, -3))
        .expect("seed");
    h.store
        .put_customer(static_customer(2, BillingMode::Prepaid, "10.2.0.1/30"))
        .expect("seed");
    h.store
        .put_subscription(subscription(2, 2, -1))
        .expect("seed");

    let scheduler = ExpiryScheduler::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let report = scheduler.run_manually().await;
    assert!(!report.success);
    assert_eq!(report.processed, 1);
    // The healthy customer was still reverted.
    assert!(h.router.in_list("prepaid-no-package", "10.2.0.2"));
    // The failed one stays active for the next tick to retry.
    assert!(h
        .store
        .active_subscription(CustomerId(1))
        .expect("query")
        .is_some());
}

#[tokio::test]
async fn scheduler_lifecycle_walks_the_state_machine() {
    let h = harness().await;
    let scheduler = ExpiryScheduler::with_interval(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
        Duration::from_secs(3600),
    );

    assert_eq!(scheduler.status().state, JobState::Stopped);
    scheduler.start();
    assert_eq!(scheduler.status().state, JobState::Scheduled);
    scheduler.stop().await;
    assert_eq!(scheduler.status().state, JobState::Stopped);
}

// ── Migration saga ───────────────────────────────────────────────────

#[tokio::test]
async fn migrate_to_prepaid_then_diagnose_reports_consistent_state() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(7, BillingMode::Postpaid, "172.16.4.1/30"))
        .expect("seed");

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let outcome = coordinator
        .migrate_to_prepaid(CustomerId(7), Some(42))
        .await
        .expect("migrate");
    assert!(outcome.success, "{}", outcome.message);

    let customer = h.store.customer(CustomerId(7)).expect("query").expect("exists");
    assert_eq!(customer.billing_mode, BillingMode::Prepaid);

    let diagnosis = coordinator
        .debug_customer_migration(CustomerId(7))
        .await
        .expect("diagnose");
    assert!(diagnosis.ip_found);
    assert_eq!(diagnosis.ip_address.as_deref(), Some("172.16.4.2"));
    assert!(diagnosis.portal_exists);
    assert_eq!(diagnosis.desired_list.as_deref(), Some("prepaid-no-package"));
    assert!(diagnosis
        .observed_lists
        .iter()
        .any(|l| l == "prepaid-no-package"));
    assert!(diagnosis.issues.is_empty(), "{:?}", diagnosis.issues);

    let history = h.store.migration_history(CustomerId(7)).expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].admin_id, Some(42));
}

#[tokio::test]
async fn router_failure_aborts_migration_before_the_billing_flip() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(8, BillingMode::Postpaid, "172.16.8.1/30"))
        .expect("seed");
    h.router.fail_next(ADD, 10);

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let outcome = coordinator
        .migrate_to_prepaid(CustomerId(8), None)
        .await
        .expect("outcome, not store error");
    assert!(!outcome.success);

    // Billing untouched; the attempt is in the audit trail as a failure.
    let customer = h.store.customer(CustomerId(8)).expect("query").expect("exists");
    assert_eq!(customer.billing_mode, BillingMode::Postpaid);
    let history = h.store.migration_history(CustomerId(8)).expect("history");
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
}

#[tokio::test]
async fn repair_replays_only_missing_steps() {
    let h = harness().await;
    // Prepaid in billing, but the router half-applied: isolation entry
    // exists, the portal redirect is missing.
    h.store
        .put_customer(static_customer(9, BillingMode::Prepaid, "10.9.0.1/30"))
        .expect("seed");
    h.router.add_list_entry("prepaid-no-package", "10.9.0.2", "partial");

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let adds_before = h.router.times_seen(ADD);
    let outcome = coordinator
        .fix_prepaid_customer(CustomerId(9))
        .await
        .expect("repair");
    assert!(outcome.success);

    // Only the portal redirect was missing, so exactly one add went out.
    assert_eq!(h.router.times_seen(ADD), adds_before + 1);
    assert!(h.router.in_list("portal-redirect", "10.9.0.2"));
    assert!(h.router.in_list("prepaid-no-package", "10.9.0.2"));

    // Converged: a second repair changes nothing.
    let again = coordinator
        .fix_prepaid_customer(CustomerId(9))
        .await
        .expect("repair");
    assert!(again.success);
    assert_eq!(h.router.times_seen(ADD), adds_before + 1);
}

#[tokio::test]
async fn entitled_prepaid_customer_is_repaired_onto_the_active_list() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(10, BillingMode::Prepaid, "10.10.0.1/30"))
        .expect("seed");
    h.store
        .put_subscription(subscription(5, 10, 48))
        .expect("seed");
    // Router still shows the customer as isolated.
    h.router.add_list_entry("prepaid-no-package", "10.10.0.2", "stale");

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let outcome = coordinator
        .fix_prepaid_customer(CustomerId(10))
        .await
        .expect("repair");
    assert!(outcome.success);
    assert!(h.router.in_list("prepaid-active", "10.10.0.2"));
    assert!(!h.router.in_list("prepaid-no-package", "10.10.0.2"));
}

#[tokio::test]
async fn migrate_back_to_postpaid_clears_prepaid_router_state() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(11, BillingMode::Prepaid, "10.11.0.1/30"))
        .expect("seed");
    h.router.add_list_entry("prepaid-no-package", "10.11.0.2", "prepaid");
    h.router.add_list_entry("portal-redirect", "10.11.0.2", "captive");

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let outcome = coordinator
        .migrate_to_postpaid(CustomerId(11), None)
        .await
        .expect("migrate");
    assert!(outcome.success, "{}", outcome.message);

    assert!(!h.router.in_list("prepaid-no-package", "10.11.0.2"));
    assert!(!h.router.in_list("portal-redirect", "10.11.0.2"));
    let customer = h.store.customer(CustomerId(11)).expect("query").expect("exists");
    assert_eq!(customer.billing_mode, BillingMode::Postpaid);
}

#[tokio::test]
async fn batch_repair_collects_failures_without_aborting() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(1, BillingMode::Prepaid, "10.1.0.1/30"))
        .expect("seed");
    h.store
        .put_customer(pppoe_customer(2, BillingMode::Prepaid, "ghost", "x"))
        .expect("seed");

    let coordinator = MigrationCoordinator::new(
        Arc::clone(&h.dyn_store),
        Arc::clone(&h.pool),
        h.sink.clone() as Arc<dyn NotificationSink>,
    );

    let batch = coordinator.fix_all_prepaid_customers().await.expect("batch");
    assert_eq!(batch.fixed, 1);
    assert_eq!(batch.failed, 1);
    assert_eq!(batch.messages.len(), 2);
}

// ── Pool, cache, health ──────────────────────────────────────────────

#[tokio::test]
async fn cached_reads_skip_the_router() {
    let h = harness().await;
    h.router.add_list_entry("prepaid-active", "10.0.0.2", "x");

    let first = h.pool.address_lists_for("10.0.0.2").await.expect("read");
    let second = h.pool.address_lists_for("10.0.0.2").await.expect("read");
    assert_eq!(first, second);

    // One print on the wire; the second read was served from cache.
    assert_eq!(h.router.times_seen("/ip/firewall/address-list/print"), 1);
    assert_eq!(h.pool.cache_stats().hits, 1);
}

#[tokio::test]
async fn writes_invalidate_the_cached_membership_reads() {
    let h = harness().await;
    let before = h.pool.address_lists_for("10.0.0.9").await.expect("read");
    assert!(before.is_empty());

    h.pool
        .add_to_address_list("prepaid-active", "10.0.0.9", "test")
        .await
        .expect("add");

    let after = h.pool.address_lists_for("10.0.0.9").await.expect("read");
    assert_eq!(after, vec!["prepaid-active".to_owned()]);
}

#[tokio::test]
async fn command_timeout_surfaces_connection_error_and_caches_nothing() {
    let h = harness_with_timeout(Duration::from_millis(200)).await;
    h.router.hang_on(IDENTITY);

    let started = std::time::Instant::now();
    let err = h.pool.identity().await.expect_err("must time out");
    assert!(matches!(err, CoreError::Connection { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(h.pool.cache_stats().entries, 0);

    // The wedged session was discarded; the next command reconnects.
    assert!(h.pool.ping("10.0.0.1", 1).await.is_ok());
}

#[tokio::test]
async fn missing_settings_row_is_a_configuration_error() {
    let store: Arc<dyn BillingStore> = Arc::new(MemoryStore::new());
    let pool = RouterPool::new(store);

    let err = pool.identity().await.expect_err("no settings");
    assert!(matches!(err, CoreError::Configuration { .. }), "got {err:?}");
}

#[tokio::test]
async fn queue_creation_normalizes_and_strips_partial_burst_config() {
    let h = harness().await;
    let spec = QueueSpec {
        max_limit: Some(" 10M ".into()),
        // No burst-limit: the threshold below must be stripped, not sent.
        burst_threshold: Some("5M".into()),
        ..QueueSpec::new(
            "cust-3",
            "global",
            QueueKind::normalize_legacy("legacy pcq downstream"),
        )
    };

    h.pool.add_queue_tree(spec).await.expect("add queue");
    assert_eq!(h.router.queue_tree_names(), vec!["cust-3".to_owned()]);
}

#[tokio::test]
async fn health_checks_are_throttled_and_force_recheck_bypasses() {
    let h = harness().await;
    let monitor = HealthMonitor::with_throttle(Arc::clone(&h.pool), Duration::from_secs(60));

    assert!(monitor.current().is_none());

    let first = monitor.check().await;
    let second = monitor.check().await;
    assert!(first.online);
    assert_eq!(first, second);
    assert_eq!(h.router.times_seen(IDENTITY), 1);

    let forced = monitor.force_recheck().await;
    assert!(forced.online);
    assert_eq!(h.router.times_seen(IDENTITY), 2);
}

// ── Monitoring jobs ──────────────────────────────────────────────────

#[tokio::test]
async fn sweep_tracks_failures_and_sla_opens_then_closes_incidents() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(1, BillingMode::Postpaid, "192.168.1.1/30"))
        .expect("seed");
    h.router.set_offline("192.168.1.2");

    let scheduler = MonitoringScheduler::new(Arc::clone(&h.dyn_store), Arc::clone(&h.pool));

    // Three failed sweeps cross the default threshold.
    for _ in 0..3 {
        scheduler
            .run_job(JobKind::ReachabilitySweep)
            .await
            .expect("sweep");
    }
    let status = h
        .store
        .ping_status(CustomerId(1))
        .expect("query")
        .expect("exists");
    assert!(!status.online);
    assert_eq!(status.consecutive_failures, 3);

    scheduler.run_job(JobKind::SlaDetection).await.expect("sla");
    let open = h.store.open_incidents().expect("query");
    assert_eq!(open.len(), 1);

    // No duplicate incident while one is already open.
    scheduler.run_job(JobKind::SlaDetection).await.expect("sla");
    assert_eq!(h.store.open_incidents().expect("query").len(), 1);

    // Back online: next sweep resets, next SLA pass closes.
    h.router.set_online("192.168.1.2");
    scheduler
        .run_job(JobKind::ReachabilitySweep)
        .await
        .expect("sweep");
    scheduler.run_job(JobKind::SlaDetection).await.expect("sla");
    assert!(h.store.open_incidents().expect("query").is_empty());

    let now = Utc::now();
    let closed = h
        .store
        .incidents_between(now - ChronoDuration::hours(1), now + ChronoDuration::hours(1))
        .expect("query");
    assert_eq!(closed.len(), 1);
    assert!(closed[0].severity.is_some());
}

#[tokio::test]
async fn bandwidth_collection_appends_samples_for_our_queues() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(4, BillingMode::Postpaid, "10.4.0.1/30"))
        .expect("seed");
    h.router
        .add_simple_queue("cust-4", "10.4.0.2/32", "1M/10M", "12345/678901");
    h.router
        .add_simple_queue("infra-uplink", "0.0.0.0/0", "0/0", "1/1");

    let scheduler = MonitoringScheduler::new(Arc::clone(&h.dyn_store), Arc::clone(&h.pool));
    scheduler
        .run_job(JobKind::BandwidthCollection)
        .await
        .expect("collect");

    let samples = h
        .store
        .bandwidth_samples_since(Utc::now() - ChronoDuration::hours(1))
        .expect("query");
    assert_eq!(samples.len(), 1, "foreign queues are skipped");
    assert_eq!(samples[0].customer_id, CustomerId(4));
    assert_eq!(samples[0].tx_bytes, 12345);
    assert_eq!(samples[0].rx_bytes, 678_901);
}

#[tokio::test]
async fn monthly_rollup_attributes_downtime_to_the_previous_month() {
    let h = harness().await;
    h.store
        .put_customer(static_customer(6, BillingMode::Postpaid, "10.6.0.1/30"))
        .expect("seed");

    // A two-hour outage last month.
    let now = Utc::now();
    let last_month_mid = {
        let (year, month) = if now.month() == 1 {
            (now.year() - 1, 12)
        } else {
            (now.year(), now.month() - 1)
        };
        chrono::NaiveDate::from_ymd_opt(year, month, 15)
            .expect("valid date")
            .and_hms_opt(12, 0, 0)
            .expect("valid time")
            .and_utc()
    };
    let incident_id = Uuid::new_v4();
    h.store
        .open_incident(Incident {
            id: incident_id,
            customer_id: CustomerId(6),
            cause: "outage".into(),
            started_at: last_month_mid,
            ended_at: None,
            severity: None,
        })
        .expect("seed incident");
    h.store
        .close_incident(
            incident_id,
            last_month_mid + ChronoDuration::hours(2),
            wispctl_core::Severity::Critical,
        )
        .expect("close");

    let scheduler = MonitoringScheduler::new(Arc::clone(&h.dyn_store), Arc::clone(&h.pool));
    scheduler
        .run_job(JobKind::MonthlySlaRollup)
        .await
        .expect("rollup");

    let (year, month) = if now.month() == 1 {
        (now.year() - 1, 12)
    } else {
        (now.year(), now.month() - 1)
    };
    let records = h.store.sla_records(year, month).expect("query");
    let record = records
        .iter()
        .find(|r| r.customer_id == CustomerId(6))
        .expect("record exists");
    assert_eq!(record.downtime_minutes, 120);
    assert!(record.uptime_percent < 100.0);
    assert!(record.uptime_percent > 99.0);
}

#[tokio::test]
async fn monitoring_status_lists_jobs_and_next_runs() {
    let h = harness().await;
    let scheduler = MonitoringScheduler::new(Arc::clone(&h.dyn_store), Arc::clone(&h.pool));

    let idle = scheduler.status();
    assert!(!idle.running);
    assert_eq!(idle.jobs.len(), 5);
    assert!(idle.jobs.iter().all(|j| j.next_run.is_none()));

    scheduler.start();
    // Give the job loops a beat to arm their timers.
    tokio::task::yield_now().await;
    let running = scheduler.status();
    assert!(running.running);
    scheduler.stop().await;
    assert!(!scheduler.status().running);
}
