// ── Billing store seam ──
//
// The billing database is an external collaborator. This trait is the
// dependency-injection seam: one store object is constructed at startup
// and handed to every scheduler and coordinator. It is synchronous and
// object-safe so `Arc<dyn BillingStore>` composes freely; an SQL-backed
// implementation wraps its own connection handling behind it.

mod memory;

pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    BandwidthSample, BillingMode, Customer, CustomerId, DailySummary, Incident, MigrationRecord,
    PingStatus, RouterSettings, Severity, SlaRecord, Subscription, SubscriptionId,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },
}

/// Read/write access to billing-owned state.
///
/// Query methods return owned snapshots; the engine never holds store
/// locks across router I/O.
pub trait BillingStore: Send + Sync {
    // ── Router settings ──────────────────────────────────────────────

    /// The single authoritative router connection row, if configured.
    fn router_settings(&self) -> Result<Option<RouterSettings>, StoreError>;

    fn put_router_settings(&self, settings: RouterSettings) -> Result<(), StoreError>;

    // ── Customers ────────────────────────────────────────────────────

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;

    fn customers(&self) -> Result<Vec<Customer>, StoreError>;

    fn put_customer(&self, customer: Customer) -> Result<(), StoreError>;

    fn customers_by_mode(&self, mode: BillingMode) -> Result<Vec<Customer>, StoreError>;

    /// Customers attached over a static-IP link (the reachability sweep's
    /// population).
    fn static_ip_customers(&self) -> Result<Vec<Customer>, StoreError>;

    fn set_billing_mode(&self, id: CustomerId, mode: BillingMode) -> Result<(), StoreError>;

    // ── Subscriptions ────────────────────────────────────────────────

    fn put_subscription(&self, subscription: Subscription) -> Result<(), StoreError>;

    fn active_subscription(&self, customer: CustomerId)
        -> Result<Option<Subscription>, StoreError>;

    /// Active subscriptions whose expiry is at or before `now`.
    fn expired_active_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Active subscriptions expiring after `now` but within `window`.
    fn subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Transition active → expired. Returns `false` when the row is no
    /// longer active (the transition is monotonic; re-running is a no-op).
    fn mark_subscription_expired(&self, id: SubscriptionId) -> Result<bool, StoreError>;

    /// Cancel every active subscription of a customer (used when flipping
    /// billing mode). Returns how many were cancelled.
    fn cancel_active_subscriptions(&self, customer: CustomerId) -> Result<u32, StoreError>;

    // ── Migration audit trail ────────────────────────────────────────

    fn record_migration(&self, record: MigrationRecord) -> Result<(), StoreError>;

    fn migration_history(&self, customer: CustomerId)
        -> Result<Vec<MigrationRecord>, StoreError>;

    // ── Monitoring ───────────────────────────────────────────────────

    fn ping_status(&self, customer: CustomerId) -> Result<Option<PingStatus>, StoreError>;

    fn upsert_ping_status(&self, status: PingStatus) -> Result<(), StoreError>;

    fn ping_statuses(&self) -> Result<Vec<PingStatus>, StoreError>;

    fn append_bandwidth_sample(&self, sample: BandwidthSample) -> Result<(), StoreError>;

    fn bandwidth_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<BandwidthSample>, StoreError>;

    fn open_incident(&self, incident: Incident) -> Result<(), StoreError>;

    fn open_incidents(&self) -> Result<Vec<Incident>, StoreError>;

    fn close_incident(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        severity: Severity,
    ) -> Result<(), StoreError>;

    /// Incidents overlapping the interval `[from, to)`.
    fn incidents_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StoreError>;

    fn record_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError>;

    fn record_sla(&self, record: SlaRecord) -> Result<(), StoreError>;

    fn sla_records(&self, year: i32, month: u32) -> Result<Vec<SlaRecord>, StoreError>;
}
