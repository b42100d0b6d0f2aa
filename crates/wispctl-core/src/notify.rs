// ── Notification dispatch seam ──
//
// The dispatcher is an external collaborator: the engine hands it a
// customer id and a template key, fire-and-forget. Delivery outcome is
// never awaited and never fails a tick.

use std::sync::Mutex;

use tracing::info;

use crate::model::CustomerId;

/// Customer-visible events the engine reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    PackageExpired { package: String },
    ExpiryReminder { hours_remaining: i64 },
    MigratedToPrepaid,
    MigratedToPostpaid,
}

impl NotificationEvent {
    /// Template key understood by the external dispatcher.
    pub fn template_key(&self) -> &'static str {
        match self {
            Self::PackageExpired { .. } => "package_expired",
            Self::ExpiryReminder { .. } => "package_expiry_reminder",
            Self::MigratedToPrepaid => "customer_migrated_to_prepaid",
            Self::MigratedToPostpaid => "customer_migrated_to_postpaid",
        }
    }
}

/// Fire-and-forget notification sink.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, customer: CustomerId, event: NotificationEvent);
}

/// Default sink: logs the request. Deployments plug the real dispatcher
/// in behind the same trait.
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, customer: CustomerId, event: NotificationEvent) {
        info!(%customer, template = event.template_key(), "notification queued");
    }
}

/// Test double that records every request.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(CustomerId, NotificationEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(CustomerId, NotificationEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_for(&self, customer: CustomerId, template_key: &str) -> usize {
        self.sent()
            .iter()
            .filter(|(c, e)| *c == customer && e.template_key() == template_key)
            .count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, customer: CustomerId, event: NotificationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((customer, event));
        }
    }
}
