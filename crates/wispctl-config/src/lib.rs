//! Configuration for the wispctl tools.
//!
//! TOML file + `WISPCTL_` environment overrides via figment. The router
//! connection profile configured here is written into the billing store
//! as the authoritative settings row at startup; schedulers never read
//! config files themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wispctl_core::{
    BillingStore, Customer, MonitoringConfig, RouterSettings, StoreError, Subscription,
};

// ── Error ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("seed data error: {0}")]
    SeedData(#[from] toml::de::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Config structs ───────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterProfile,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub data: DataConfig,
}

/// Router connection profile. Becomes the billing store's settings row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterProfile {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    /// Plaintext in the file -- prefer the `WISPCTL_ROUTER__PASSWORD`
    /// environment override on shared hosts.
    pub password: String,

    #[serde(default)]
    pub use_tls: bool,
}

impl Default for RouterProfile {
    fn default() -> Self {
        Self {
            host: "192.168.88.1".into(),
            port: default_port(),
            username: "api".into(),
            password: String::new(),
            use_tls: false,
        }
    }
}

fn default_port() -> u16 {
    8728
}

impl RouterProfile {
    pub fn to_settings(&self) -> RouterSettings {
        RouterSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: SecretString::from(self.password.clone()),
            use_tls: self.use_tls,
        }
    }
}

/// Engine timing knobs, all in seconds (wall-clock fields are UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_health_throttle")]
    pub health_throttle_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_bandwidth_interval")]
    pub bandwidth_interval_secs: u64,

    #[serde(default = "default_sla_interval")]
    pub sla_interval_secs: u64,

    #[serde(default = "default_daily_hour")]
    pub daily_summary_hour: u32,

    #[serde(default = "default_monthly_day")]
    pub monthly_rollup_day: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: default_expiry_interval(),
            command_timeout_secs: default_command_timeout(),
            health_throttle_secs: default_health_throttle(),
            sweep_interval_secs: default_sweep_interval(),
            bandwidth_interval_secs: default_bandwidth_interval(),
            sla_interval_secs: default_sla_interval(),
            daily_summary_hour: default_daily_hour(),
            monthly_rollup_day: default_monthly_day(),
        }
    }
}

fn default_expiry_interval() -> u64 {
    300
}
fn default_command_timeout() -> u64 {
    5
}
fn default_health_throttle() -> u64 {
    30
}
fn default_sweep_interval() -> u64 {
    600
}
fn default_bandwidth_interval() -> u64 {
    300
}
fn default_sla_interval() -> u64 {
    300
}
fn default_daily_hour() -> u32 {
    8
}
fn default_monthly_day() -> u32 {
    1
}

impl EngineConfig {
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn health_throttle(&self) -> Duration {
        Duration::from_secs(self.health_throttle_secs)
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        MonitoringConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            bandwidth_interval: Duration::from_secs(self.bandwidth_interval_secs),
            sla_interval: Duration::from_secs(self.sla_interval_secs),
            daily_summary_at: (self.daily_summary_hour.min(23), 0),
            monthly_rollup_at: (self.monthly_rollup_day.clamp(1, 31), 2, 0),
            ..MonitoringConfig::default()
        }
    }
}

/// Where the reference store loads its rows from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// TOML file with customers and subscriptions to seed the in-memory
    /// store. Absent: the store starts empty.
    pub seed_file: Option<PathBuf>,
}

// ── Loading ──────────────────────────────────────────────────────────

/// Default config path: `<project config dir>/config.toml`.
pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("net", "Wispline", "wispctl")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("wispctl.toml"))
}

/// Load configuration: defaults, then the TOML file (if present), then
/// `WISPCTL_` environment overrides (`WISPCTL_ROUTER__HOST=...`).
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = path.map_or_else(default_config_path, Path::to_path_buf);

    let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("WISPCTL_").split("__"))
        .extract()?;

    if config.router.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "router.host".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(config)
}

// ── Seed data ────────────────────────────────────────────────────────

/// Customers and subscriptions for the in-memory reference store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub customers: Vec<Customer>,

    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl SeedData {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Write every row into the store.
    pub fn apply(&self, store: &dyn BillingStore) -> Result<(), ConfigError> {
        for customer in &self.customers {
            store.put_customer(customer.clone())?;
        }
        for subscription in &self.subscriptions {
            store.put_subscription(subscription.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.router.port, 8728);
        assert_eq!(cfg.engine.expiry_interval_secs, 300);
        assert!(cfg.data.seed_file.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[router]
host = "10.0.0.1"
username = "ops"
password = "hunter2"
use_tls = true

[engine]
expiry_interval_secs = 60
"#
        )
        .unwrap();

        let cfg = load(Some(file.path())).unwrap();
        assert_eq!(cfg.router.host, "10.0.0.1");
        assert!(cfg.router.use_tls);
        assert_eq!(cfg.engine.expiry_interval_secs, 60);
        // Untouched keys keep their defaults.
        assert_eq!(cfg.engine.daily_summary_hour, 8);
    }

    #[test]
    fn seed_data_round_trips_through_toml() {
        let raw = r#"
[[customers]]
id = 1
name = "Acme Dormitory"
billing_mode = "prepaid"
connection = { kind = "static_ip", address = "192.168.1.1/30" }

[[customers]]
id = 2
name = "Joe"
billing_mode = "postpaid"
connection = { kind = "pppoe", username = "joe", profile = "fiber-20m" }

[[subscriptions]]
id = 1
customer_id = 1
package = "fiber-20m"
activated_at = "2026-01-01T00:00:00Z"
expires_at = "2026-02-01T00:00:00Z"
status = "active"
"#;
        let seed: SeedData = toml::from_str(raw).unwrap();
        assert_eq!(seed.customers.len(), 2);
        assert_eq!(seed.subscriptions.len(), 1);

        let store = wispctl_core::MemoryStore::new();
        seed.apply(&store).unwrap();
        assert_eq!(store.customers().unwrap().len(), 2);
    }
}
