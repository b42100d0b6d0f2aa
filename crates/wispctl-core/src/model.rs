// ── Domain model ──
//
// The billing store owns these rows; this crate reads and transitions
// them. Router-materialized state (address-list membership) has no row
// here on purpose -- it is the thing the engine keeps consistent with
// these types.

use chrono::{DateTime, NaiveDate, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

// ── Identifiers ──────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CustomerId(pub u64);

impl std::fmt::Display for CustomerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Customers ────────────────────────────────────────────────────────

/// Billing mode: postpaid customers are invoiced monthly, prepaid
/// customers buy quota/time up front and are isolated without it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BillingMode {
    Postpaid,
    Prepaid,
}

/// How the customer attaches to the network, which decides what
/// router-side configuration enforces their entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ConnectionKind {
    /// PPPoE subscriber: entitlement is the secret's profile.
    Pppoe { username: String, profile: String },
    /// Static-IP subscriber: entitlement is address-list membership.
    /// The stored address is the gateway side in CIDR notation.
    StaticIp { address: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub billing_mode: BillingMode,
    pub connection: ConnectionKind,
    #[serde(default)]
    pub phone: Option<String>,
}

// ── Subscriptions ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub package: String,
    pub activated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Derived "expiring soon": still active, not yet expired, but within
    /// the reminder window.
    pub fn expires_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.is_active() && self.expires_at > now && self.expires_at <= now + window
    }
}

// ── Migrations ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum MigrationDirection {
    ToPrepaid,
    ToPostpaid,
}

/// One migration attempt, successful or not. Append-only audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: Uuid,
    pub customer_id: CustomerId,
    pub direction: MigrationDirection,
    pub at: DateTime<Utc>,
    pub admin_id: Option<u64>,
    pub success: bool,
    pub detail: String,
}

// ── Router settings ──────────────────────────────────────────────────

/// Single authoritative connection row for the router, owned by the
/// billing store and mutated only by administrative configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterSettings {
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub use_tls: bool,
}

fn default_api_port() -> u16 {
    8728
}

// ── Monitoring rows ──────────────────────────────────────────────────

/// Latest reachability observation for a static-IP customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingStatus {
    pub customer_id: CustomerId,
    pub address: String,
    pub online: bool,
    pub response_time_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// A customer-visible outage. Open while `ended_at` is `None`; severity
/// is assigned at close time from the outage duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub customer_id: CustomerId,
    pub cause: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// One time-series point of a customer's queue counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSample {
    pub customer_id: CustomerId,
    pub queue: String,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub at: DateTime<Utc>,
}

/// Daily aggregation of monitoring signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub incidents_opened: u32,
    pub incidents_closed: u32,
    pub downtime_minutes: i64,
    pub samples_collected: u32,
}

/// Month-end SLA percentage for one customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaRecord {
    pub customer_id: CustomerId,
    pub year: i32,
    pub month: u32,
    pub uptime_percent: f64,
    pub downtime_minutes: i64,
}
