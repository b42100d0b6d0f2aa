// ── Router health monitor ──
//
// Throttled reachability probe. Schedulers and the CLI ask "is the
// router there" often; the real probe runs at most once per throttle
// interval, everything in between gets the cached answer.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::pool::RouterPool;

const DEFAULT_THROTTLE: Duration = Duration::from_secs(30);

/// Last observed router health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub online: bool,
    pub response_time_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

pub struct HealthMonitor {
    pool: Arc<RouterPool>,
    throttle: Duration,
    last: Mutex<Option<(Instant, HealthStatus)>>,
}

impl HealthMonitor {
    pub fn new(pool: Arc<RouterPool>) -> Self {
        Self::with_throttle(pool, DEFAULT_THROTTLE)
    }

    pub fn with_throttle(pool: Arc<RouterPool>, throttle: Duration) -> Self {
        Self {
            pool,
            throttle,
            last: Mutex::new(None),
        }
    }

    /// Return the cached status if the last real probe is younger than
    /// the throttle interval; probe otherwise.
    pub async fn check(&self) -> HealthStatus {
        if let Ok(guard) = self.last.lock() {
            if let Some((at, status)) = guard.as_ref() {
                if at.elapsed() < self.throttle {
                    debug!("health check served from throttle window");
                    return status.clone();
                }
            }
        }
        self.probe().await
    }

    /// Probe unconditionally, bypassing the throttle.
    pub async fn force_recheck(&self) -> HealthStatus {
        self.probe().await
    }

    /// The last computed status without probing; `None` if never checked.
    pub fn current(&self) -> Option<HealthStatus> {
        self.last
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|(_, status)| status.clone()))
    }

    async fn probe(&self) -> HealthStatus {
        let started = Instant::now();
        let status = match self.pool.identity().await {
            Ok(identity) => {
                debug!(?identity, "router reachable");
                HealthStatus {
                    online: true,
                    response_time_ms: u64::try_from(started.elapsed().as_millis()).ok(),
                    checked_at: Utc::now(),
                    error: None,
                }
            }
            Err(e) => HealthStatus {
                online: false,
                response_time_ms: None,
                checked_at: Utc::now(),
                error: Some(e.to_string()),
            },
        };

        if let Ok(mut guard) = self.last.lock() {
            *guard = Some((Instant::now(), status.clone()));
        }
        status
    }
}
