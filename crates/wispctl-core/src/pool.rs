// ── Router connection pool ──
//
// One reusable session to the router plus the read cache in front of it.
// The session slot serializes concurrent callers; that is an
// implementation freedom, not a contract. No automatic retries anywhere:
// a failed command surfaces immediately and the next scheduled tick is
// the retry policy.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use wispctl_api::{FlatRecord, Param, RouterSession, TransportConfig};

use crate::cache::{CacheStats, ResponseCache};
use crate::error::CoreError;
use crate::queue::QueueSpec;
use crate::store::BillingStore;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Outcome of a router-side reachability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingOutcome {
    pub online: bool,
    pub response_time_ms: Option<u64>,
}

/// Cache directive for [`RouterPool::execute`].
#[derive(Debug, Clone)]
pub struct CacheAs {
    pub key: String,
    pub ttl: Option<Duration>,
}

impl CacheAs {
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: None,
        }
    }
}

/// Shared router access for schedulers and the migration coordinator.
pub struct RouterPool {
    store: Arc<dyn BillingStore>,
    transport: TransportConfig,
    command_timeout: Duration,
    settings: ArcSwapOption<crate::model::RouterSettings>,
    session: Mutex<Option<RouterSession>>,
    cache: ResponseCache<Vec<FlatRecord>>,
}

impl RouterPool {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self::with_transport(store, TransportConfig::default(), DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn with_transport(
        store: Arc<dyn BillingStore>,
        transport: TransportConfig,
        command_timeout: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            command_timeout,
            settings: ArcSwapOption::empty(),
            session: Mutex::new(None),
            cache: ResponseCache::new(DEFAULT_CACHE_TTL),
        }
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Cached router settings, loading from the billing store on first
    /// use.
    pub fn settings(&self) -> Result<Arc<crate::model::RouterSettings>, CoreError> {
        if let Some(settings) = self.settings.load_full() {
            return Ok(settings);
        }
        self.refresh_settings()
    }

    /// Force a reload from the billing store (administrative edits).
    pub fn refresh_settings(&self) -> Result<Arc<crate::model::RouterSettings>, CoreError> {
        let settings = self
            .store
            .router_settings()?
            .ok_or_else(|| CoreError::Configuration {
                message: "no router settings row in the billing store".into(),
            })?;
        let settings = Arc::new(settings);
        self.settings.store(Some(Arc::clone(&settings)));
        Ok(settings)
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute a command, consulting the cache first when asked to.
    ///
    /// A fresh cached entry short-circuits without touching the router.
    /// Results are cached only on success; timeouts and transport
    /// failures discard the session, surface
    /// [`CoreError::Connection`], and cache nothing.
    pub async fn execute(
        &self,
        command: &str,
        params: &[Param],
        cache: Option<CacheAs>,
    ) -> Result<Vec<FlatRecord>, CoreError> {
        if let Some(directive) = &cache {
            if let Some(records) = self.cache.get(&directive.key) {
                return Ok(records);
            }
        }

        let records = self.execute_live(command, params).await?;

        if let Some(directive) = cache {
            self.cache.set(directive.key, records.clone(), directive.ttl);
        }
        Ok(records)
    }

    async fn execute_live(
        &self,
        command: &str,
        params: &[Param],
    ) -> Result<Vec<FlatRecord>, CoreError> {
        let settings = self.settings()?;
        let mut slot = self.session.lock().await;

        if slot.is_none() {
            let mut session = RouterSession::connect(
                &settings.host,
                settings.port,
                settings.use_tls,
                &self.transport,
            )
            .await?;
            session.login(&settings.username, &settings.password).await?;
            debug!(peer = session.peer(), "router session established");
            *slot = Some(session);
        }

        let Some(session) = slot.as_mut() else {
            return Err(CoreError::Internal("session slot empty after connect".into()));
        };

        let result = tokio::time::timeout(self.command_timeout, session.command(command, params))
            .await;

        match result {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(err)) => {
                if err.is_transient() {
                    // The stream may be desynced; next caller reconnects.
                    *slot = None;
                }
                Err(err.into())
            }
            Err(_elapsed) => {
                // A reply may still arrive on this socket; it can never be
                // re-framed safely, so the session is discarded.
                *slot = None;
                warn!(command, timeout_secs = self.command_timeout.as_secs(), "router command timed out");
                Err(CoreError::Connection {
                    reason: format!(
                        "command {command} timed out after {}s",
                        self.command_timeout.as_secs()
                    ),
                })
            }
        }
    }

    /// Drop the live session (the in-flight command, if any, completes
    /// and its result is discarded).
    pub async fn disconnect(&self) {
        *self.session.lock().await = None;
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear_all();
    }

    // ── Identity / health probe ──────────────────────────────────────

    /// Cheap read used by the health monitor. Uncached: the monitor has
    /// its own throttle.
    pub async fn identity(&self) -> Result<Option<String>, CoreError> {
        let records = self.execute("/system/identity/print", &[], None).await?;
        Ok(records
            .first()
            .and_then(|r| r.get("name"))
            .cloned())
    }

    // ── Address lists ────────────────────────────────────────────────

    /// Names of every list a given address is currently a member of.
    /// Cached briefly: the diagnostic path reads this repeatedly.
    pub async fn address_lists_for(&self, address: &str) -> Result<Vec<String>, CoreError> {
        let records = self
            .execute(
                "/ip/firewall/address-list/print",
                &[Param::query("address", address)],
                Some(CacheAs::key(format!("address-list:{address}"))),
            )
            .await?;
        Ok(records
            .iter()
            .filter_map(|r| r.get("list").cloned())
            .collect())
    }

    /// Fresh membership check (never cached: the repair path must see the
    /// router as it is right now).
    pub async fn is_in_address_list(&self, list: &str, address: &str) -> Result<bool, CoreError> {
        let records = self
            .execute(
                "/ip/firewall/address-list/print",
                &[Param::query("list", list), Param::query("address", address)],
                None,
            )
            .await?;
        Ok(!records.is_empty())
    }

    /// Add an address to a list. Adding an existing member is treated as
    /// success (the router traps on duplicates; membership is what
    /// matters).
    pub async fn add_to_address_list(
        &self,
        list: &str,
        address: &str,
        comment: &str,
    ) -> Result<(), CoreError> {
        let result = self
            .execute(
                "/ip/firewall/address-list/add",
                &[
                    Param::attr("list", list),
                    Param::attr("address", address),
                    Param::attr("comment", comment),
                ],
                None,
            )
            .await;
        self.cache.clear_by_pattern("address-list");

        match result {
            Ok(_) => Ok(()),
            Err(CoreError::Rejected { message }) if message.contains("already have") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Remove an address from a list. Returns `true` when an entry was
    /// actually removed.
    pub async fn remove_from_address_list(
        &self,
        list: &str,
        address: &str,
    ) -> Result<bool, CoreError> {
        let records = self
            .execute(
                "/ip/firewall/address-list/print",
                &[Param::query("list", list), Param::query("address", address)],
                None,
            )
            .await?;

        let mut removed = false;
        for record in &records {
            if let Some(id) = record.get(".id") {
                self.execute(
                    "/ip/firewall/address-list/remove",
                    &[Param::attr(".id", id.as_str())],
                    None,
                )
                .await?;
                removed = true;
            }
        }
        if removed {
            self.cache.clear_by_pattern("address-list");
        }
        Ok(removed)
    }

    // ── PPPoE ────────────────────────────────────────────────────────

    /// Point a PPPoE secret at a profile. Returns `false` when the secret
    /// does not exist on the router.
    pub async fn set_pppoe_profile(&self, username: &str, profile: &str) -> Result<bool, CoreError> {
        let records = self
            .execute(
                "/ppp/secret/print",
                &[Param::query("name", username)],
                None,
            )
            .await?;
        let Some(id) = records.first().and_then(|r| r.get(".id")).cloned() else {
            return Ok(false);
        };

        self.execute(
            "/ppp/secret/set",
            &[Param::attr(".id", id), Param::attr("profile", profile)],
            None,
        )
        .await?;
        Ok(true)
    }

    /// Current profile of a PPPoE secret, if the secret exists.
    pub async fn pppoe_profile(&self, username: &str) -> Result<Option<String>, CoreError> {
        let records = self
            .execute(
                "/ppp/secret/print",
                &[Param::query("name", username)],
                None,
            )
            .await?;
        Ok(records.first().and_then(|r| r.get("profile")).cloned())
    }

    /// Drop an active PPPoE session so the new profile applies on
    /// reconnect. Returns `true` when a session was terminated.
    pub async fn disconnect_pppoe_session(&self, username: &str) -> Result<bool, CoreError> {
        let records = self
            .execute(
                "/ppp/active/print",
                &[Param::query("name", username)],
                None,
            )
            .await?;

        let mut dropped = false;
        for record in &records {
            if let Some(id) = record.get(".id") {
                self.execute(
                    "/ppp/active/remove",
                    &[Param::attr(".id", id.as_str())],
                    None,
                )
                .await?;
                dropped = true;
            }
        }
        Ok(dropped)
    }

    // ── Queues ───────────────────────────────────────────────────────

    /// Current per-queue counters (always live; this feeds time series).
    pub async fn simple_queues(&self) -> Result<Vec<FlatRecord>, CoreError> {
        self.execute("/queue/simple/print", &[], None).await
    }

    /// Create a queue-tree entry from a validated spec. The spec is
    /// re-validated here so no call site can bypass sanitization.
    pub async fn add_queue_tree(&self, spec: QueueSpec) -> Result<(), CoreError> {
        let spec = spec.pre_validate();
        self.execute("/queue/tree/add", &spec.params(), None).await?;
        self.cache.clear_by_pattern("queue");
        Ok(())
    }

    // ── Router-side ping ─────────────────────────────────────────────

    /// Reachability probe executed by the router itself.
    pub async fn ping(&self, address: &str, count: u32) -> Result<PingOutcome, CoreError> {
        let records = self
            .execute(
                "/ping",
                &[
                    Param::attr("address", address),
                    Param::attr("count", count.to_string()),
                ],
                None,
            )
            .await?;

        let Some(last) = records.last() else {
            return Ok(PingOutcome {
                online: false,
                response_time_ms: None,
            });
        };

        let received: u32 = last
            .get("received")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let response_time_ms = last.get("avg-rtt").and_then(|v| parse_millis(v));

        Ok(PingOutcome {
            online: received > 0,
            response_time_ms,
        })
    }
}

/// Parse the router's RTT rendering (`"4ms"`, `"12ms"`) into
/// milliseconds. Unparseable values become `None` rather than failing
/// the probe.
fn parse_millis(value: &str) -> Option<u64> {
    value.strip_suffix("ms")?.trim().parse().ok()
}
