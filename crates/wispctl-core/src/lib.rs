//! Reconciliation engine keeping billing entitlement and router-side
//! enforcement in agreement.
//!
//! The billing store says what a customer is entitled to; the router
//! (bandwidth queues, PPPoE profiles, address lists) is what actually
//! enforces it. Everything here exists to keep the two consistent: a
//! pooled router connection with a TTL read cache, a queue parameter
//! validator, the /30 customer-IP derivation, a throttled health probe,
//! two drift-correction schedulers, and the postpaid/prepaid migration
//! saga with its repair and diagnostic paths.
//!
//! One store object, one pool, one notifier -- constructed at startup and
//! injected into every scheduler and coordinator. No hidden globals.

pub mod address;
pub mod cache;
pub mod error;
pub mod health;
pub mod migration;
pub mod model;
pub mod notify;
pub mod policy;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use address::customer_ip;
pub use cache::{CacheStats, ResponseCache};
pub use error::CoreError;
pub use health::{HealthMonitor, HealthStatus};
pub use migration::{
    BatchRepairOutcome, MigrationCoordinator, MigrationDiagnosis, MigrationOutcome, RepairOutcome,
};
pub use model::{
    BandwidthSample, BillingMode, ConnectionKind, Customer, CustomerId, DailySummary, Incident,
    MigrationDirection, MigrationRecord, PingStatus, RouterSettings, Severity, SlaRecord,
    Subscription, SubscriptionId, SubscriptionStatus,
};
pub use notify::{NotificationEvent, NotificationSink, RecordingSink, TracingSink};
pub use pool::{CacheAs, PingOutcome, RouterPool};
pub use queue::{QueueKind, QueueSpec};
pub use scheduler::{
    ExpiryRunReport, ExpiryScheduler, ExpirySchedulerStatus, JobKind, JobState, JobStatus,
    MonitoringConfig, MonitoringScheduler, MonitoringStatus, Schedule,
};
pub use store::{BillingStore, MemoryStore, StoreError};
