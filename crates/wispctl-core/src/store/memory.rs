// ── In-memory reference store ──
//
// DashMap-backed implementation of `BillingStore`. The reference store
// for tests and single-host deployments seeded from a data file; the
// trait is the contract, this is the smallest thing that honors it.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{BillingStore, StoreError};
use crate::model::{
    BandwidthSample, BillingMode, ConnectionKind, Customer, CustomerId, DailySummary, Incident,
    MigrationRecord, PingStatus, RouterSettings, Severity, SlaRecord, Subscription,
    SubscriptionId, SubscriptionStatus,
};

#[derive(Default)]
pub struct MemoryStore {
    settings: Mutex<Option<RouterSettings>>,
    customers: DashMap<CustomerId, Customer>,
    subscriptions: DashMap<SubscriptionId, Subscription>,
    migrations: Mutex<Vec<MigrationRecord>>,
    ping_statuses: DashMap<CustomerId, PingStatus>,
    bandwidth: Mutex<Vec<BandwidthSample>>,
    incidents: DashMap<Uuid, Incident>,
    daily_summaries: Mutex<Vec<DailySummary>>,
    sla_records: Mutex<Vec<SlaRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(guard: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>, StoreError> {
        guard
            .lock()
            .map_err(|_| StoreError::Backend("poisoned lock".into()))
    }
}

impl BillingStore for MemoryStore {
    fn router_settings(&self) -> Result<Option<RouterSettings>, StoreError> {
        Ok(Self::lock(&self.settings)?.clone())
    }

    fn put_router_settings(&self, settings: RouterSettings) -> Result<(), StoreError> {
        *Self::lock(&self.settings)? = Some(settings);
        Ok(())
    }

    fn customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.customers.get(&id).map(|c| c.value().clone()))
    }

    fn customers(&self) -> Result<Vec<Customer>, StoreError> {
        let mut all: Vec<Customer> = self.customers.iter().map(|c| c.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    fn put_customer(&self, customer: Customer) -> Result<(), StoreError> {
        self.customers.insert(customer.id, customer);
        Ok(())
    }

    fn customers_by_mode(&self, mode: BillingMode) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .customers()?
            .into_iter()
            .filter(|c| c.billing_mode == mode)
            .collect())
    }

    fn static_ip_customers(&self) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .customers()?
            .into_iter()
            .filter(|c| matches!(c.connection, ConnectionKind::StaticIp { .. }))
            .collect())
    }

    fn set_billing_mode(&self, id: CustomerId, mode: BillingMode) -> Result<(), StoreError> {
        match self.customers.get_mut(&id) {
            Some(mut customer) => {
                customer.billing_mode = mode;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "customer",
                identifier: id.to_string(),
            }),
        }
    }

    fn put_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    fn active_subscription(
        &self,
        customer: CustomerId,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .subscriptions
            .iter()
            .find(|s| s.customer_id == customer && s.is_active())
            .map(|s| s.value().clone()))
    }

    fn expired_active_subscriptions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Subscription>, StoreError> {
        let mut expired: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.is_active() && s.expires_at <= now)
            .map(|s| s.value().clone())
            .collect();
        expired.sort_by_key(|s| s.expires_at);
        Ok(expired)
    }

    fn subscriptions_expiring_within(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<Vec<Subscription>, StoreError> {
        let mut soon: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.expires_within(now, window))
            .map(|s| s.value().clone())
            .collect();
        soon.sort_by_key(|s| s.expires_at);
        Ok(soon)
    }

    fn mark_subscription_expired(&self, id: SubscriptionId) -> Result<bool, StoreError> {
        match self.subscriptions.get_mut(&id) {
            Some(mut sub) if sub.is_active() => {
                sub.status = SubscriptionStatus::Expired;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound {
                entity: "subscription",
                identifier: id.to_string(),
            }),
        }
    }

    fn cancel_active_subscriptions(&self, customer: CustomerId) -> Result<u32, StoreError> {
        let mut cancelled = 0;
        for mut sub in self.subscriptions.iter_mut() {
            if sub.customer_id == customer && sub.is_active() {
                sub.status = SubscriptionStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    fn record_migration(&self, record: MigrationRecord) -> Result<(), StoreError> {
        Self::lock(&self.migrations)?.push(record);
        Ok(())
    }

    fn migration_history(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<MigrationRecord>, StoreError> {
        Ok(Self::lock(&self.migrations)?
            .iter()
            .filter(|r| r.customer_id == customer)
            .cloned()
            .collect())
    }

    fn ping_status(&self, customer: CustomerId) -> Result<Option<PingStatus>, StoreError> {
        Ok(self.ping_statuses.get(&customer).map(|s| s.value().clone()))
    }

    fn upsert_ping_status(&self, status: PingStatus) -> Result<(), StoreError> {
        self.ping_statuses.insert(status.customer_id, status);
        Ok(())
    }

    fn ping_statuses(&self) -> Result<Vec<PingStatus>, StoreError> {
        let mut all: Vec<PingStatus> = self.ping_statuses.iter().map(|s| s.value().clone()).collect();
        all.sort_by_key(|s| s.customer_id);
        Ok(all)
    }

    fn append_bandwidth_sample(&self, sample: BandwidthSample) -> Result<(), StoreError> {
        Self::lock(&self.bandwidth)?.push(sample);
        Ok(())
    }

    fn bandwidth_samples_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<BandwidthSample>, StoreError> {
        Ok(Self::lock(&self.bandwidth)?
            .iter()
            .filter(|s| s.at >= since)
            .cloned()
            .collect())
    }

    fn open_incident(&self, incident: Incident) -> Result<(), StoreError> {
        self.incidents.insert(incident.id, incident);
        Ok(())
    }

    fn open_incidents(&self) -> Result<Vec<Incident>, StoreError> {
        let mut open: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|i| i.is_open())
            .map(|i| i.value().clone())
            .collect();
        open.sort_by_key(|i| i.started_at);
        Ok(open)
    }

    fn close_incident(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        severity: Severity,
    ) -> Result<(), StoreError> {
        match self.incidents.get_mut(&id) {
            Some(mut incident) => {
                incident.ended_at = Some(ended_at);
                incident.severity = Some(severity);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "incident",
                identifier: id.to_string(),
            }),
        }
    }

    fn incidents_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>, StoreError> {
        let mut hits: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|i| i.started_at < to && i.ended_at.is_none_or(|end| end >= from))
            .map(|i| i.value().clone())
            .collect();
        hits.sort_by_key(|i| i.started_at);
        Ok(hits)
    }

    fn record_daily_summary(&self, summary: DailySummary) -> Result<(), StoreError> {
        let mut summaries = Self::lock(&self.daily_summaries)?;
        summaries.retain(|s| s.date != summary.date);
        summaries.push(summary);
        Ok(())
    }

    fn record_sla(&self, record: SlaRecord) -> Result<(), StoreError> {
        let mut records = Self::lock(&self.sla_records)?;
        records.retain(|r| {
            !(r.customer_id == record.customer_id
                && r.year == record.year
                && r.month == record.month)
        });
        records.push(record);
        Ok(())
    }

    fn sla_records(&self, year: i32, month: u32) -> Result<Vec<SlaRecord>, StoreError> {
        Ok(Self::lock(&self.sla_records)?
            .iter()
            .filter(|r| r.year == year && r.month == month)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn customer(id: u64) -> Customer {
        Customer {
            id: CustomerId(id),
            name: format!("cust {id}"),
            billing_mode: BillingMode::Prepaid,
            connection: ConnectionKind::StaticIp {
                address: "192.168.1.1/30".into(),
            },
            phone: None,
        }
    }

    fn subscription(id: u64, customer: u64, expires_at: DateTime<Utc>) -> Subscription {
        Subscription {
            id: SubscriptionId(id),
            customer_id: CustomerId(customer),
            package: "10M".into(),
            activated_at: expires_at - Duration::days(30),
            expires_at,
            status: SubscriptionStatus::Active,
        }
    }

    #[test]
    fn expiry_queries_partition_by_deadline() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put_customer(customer(1)).unwrap();
        store
            .put_subscription(subscription(1, 1, now - Duration::hours(1)))
            .unwrap();
        store
            .put_subscription(subscription(2, 1, now + Duration::hours(5)))
            .unwrap();
        store
            .put_subscription(subscription(3, 1, now + Duration::days(7)))
            .unwrap();

        let expired = store.expired_active_subscriptions(now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, SubscriptionId(1));

        let soon = store
            .subscriptions_expiring_within(now, Duration::hours(24))
            .unwrap();
        assert_eq!(soon.len(), 1);
        assert_eq!(soon[0].id, SubscriptionId(2));
    }

    #[test]
    fn expiry_transition_is_monotonic() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .put_subscription(subscription(1, 1, now - Duration::hours(1)))
            .unwrap();

        assert!(store.mark_subscription_expired(SubscriptionId(1)).unwrap());
        // Second transition matches nothing.
        assert!(!store.mark_subscription_expired(SubscriptionId(1)).unwrap());
        assert!(store.expired_active_subscriptions(now).unwrap().is_empty());
    }

    #[test]
    fn mode_flip_cancels_only_active_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.put_customer(customer(1)).unwrap();
        store
            .put_subscription(subscription(1, 1, now + Duration::days(3)))
            .unwrap();
        let mut expired = subscription(2, 1, now - Duration::days(3));
        expired.status = SubscriptionStatus::Expired;
        store.put_subscription(expired).unwrap();

        assert_eq!(store.cancel_active_subscriptions(CustomerId(1)).unwrap(), 1);
        assert!(store.active_subscription(CustomerId(1)).unwrap().is_none());
    }

    #[test]
    fn incident_window_query_includes_still_open_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .open_incident(Incident {
                id: Uuid::new_v4(),
                customer_id: CustomerId(1),
                cause: "offline".into(),
                started_at: now - Duration::hours(2),
                ended_at: None,
                severity: None,
            })
            .unwrap();

        let hits = store
            .incidents_between(now - Duration::hours(24), now)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_open());
    }
}
