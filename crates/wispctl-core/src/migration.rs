// ── Billing-mode migration ──
//
// Moving a customer between postpaid and prepaid touches two systems of
// record with no shared transaction: the router and the billing store.
// The saga order is fixed -- router-side changes first, billing flip only
// after they succeed -- and every attempt lands in the append-only audit
// trail, failures included. Router state is never rolled back blindly;
// the repair path diffs desired vs observed and replays only the missing
// steps.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::address::customer_ip;
use crate::error::CoreError;
use crate::model::{
    BillingMode, ConnectionKind, Customer, CustomerId, MigrationDirection, MigrationRecord,
};
use crate::notify::{NotificationEvent, NotificationSink};
use crate::policy;
use crate::pool::RouterPool;
use crate::store::BillingStore;

/// Caller-facing result of a migration attempt. Domain failures
/// (ineligible customer, router refusal) land here with `success =
/// false`; only store-level breakage surfaces as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub success: bool,
    pub message: String,
    pub record_id: Option<Uuid>,
}

/// Result of a repair pass over one customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub success: bool,
    pub messages: Vec<String>,
}

/// Result of the batch repair pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRepairOutcome {
    pub fixed: usize,
    pub failed: usize,
    pub messages: Vec<String>,
}

/// Read-only diagnostic of a customer's migration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDiagnosis {
    pub customer_id: CustomerId,
    pub billing_mode: Option<BillingMode>,
    pub ip_found: bool,
    pub ip_address: Option<String>,
    /// Lists the customer IP is currently a member of on the router.
    pub observed_lists: Vec<String>,
    /// The list the IP should be in for the customer's current state.
    pub desired_list: Option<String>,
    pub portal_exists: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub can_migrate: bool,
}

/// Coordinates mode changes across the billing store and the router.
pub struct MigrationCoordinator {
    store: Arc<dyn BillingStore>,
    pool: Arc<RouterPool>,
    notifier: Arc<dyn NotificationSink>,
}

impl MigrationCoordinator {
    pub fn new(
        store: Arc<dyn BillingStore>,
        pool: Arc<RouterPool>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            pool,
            notifier,
        }
    }

    // ── Full migrations ──────────────────────────────────────────────

    /// Move a postpaid customer onto the prepaid system.
    pub async fn migrate_to_prepaid(
        &self,
        customer_id: CustomerId,
        admin_id: Option<u64>,
    ) -> Result<MigrationOutcome, CoreError> {
        let Some(customer) = self.store.customer(customer_id)? else {
            return Err(CoreError::not_found("customer", customer_id));
        };

        // Eligibility, fail-fast with a descriptive result.
        if customer.billing_mode == BillingMode::Prepaid {
            return Ok(MigrationOutcome {
                success: false,
                message: "customer is already prepaid; use the repair path to \
                          reconcile router state"
                    .into(),
                record_id: None,
            });
        }
        if let ConnectionKind::Pppoe { username, .. } = &customer.connection {
            if username.is_empty() {
                return Ok(MigrationOutcome {
                    success: false,
                    message: "PPPoE customer has no username".into(),
                    record_id: None,
                });
            }
        }

        // Router first. A fresh prepaid customer starts without a
        // package: isolation list + portal redirect.
        if let Err(e) = self.apply_prepaid_router_state(&customer, false).await {
            let record = self.record(
                &customer,
                MigrationDirection::ToPrepaid,
                admin_id,
                false,
                format!("router-side setup failed: {e}"),
            )?;
            warn!(customer = %customer.id, error = %e, "migration aborted before billing flip");
            return Ok(MigrationOutcome {
                success: false,
                message: format!("router-side setup failed, billing untouched: {e}"),
                record_id: Some(record),
            });
        }

        // Billing flip only after the router accepted everything.
        let flip = self
            .store
            .set_billing_mode(customer.id, BillingMode::Prepaid)
            .and_then(|()| self.store.cancel_active_subscriptions(customer.id));

        match flip {
            Ok(cancelled) => {
                let record = self.record(
                    &customer,
                    MigrationDirection::ToPrepaid,
                    admin_id,
                    true,
                    format!("router configured; {cancelled} postpaid subscription(s) cancelled"),
                )?;
                self.notifier
                    .notify(customer.id, NotificationEvent::MigratedToPrepaid);
                info!(customer = %customer.id, "migrated to prepaid");
                Ok(MigrationOutcome {
                    success: true,
                    message: "migrated to prepaid".into(),
                    record_id: Some(record),
                })
            }
            Err(e) => {
                // Router applied, billing did not: the partial state is
                // recorded, never rolled back.
                let detail = format!("router applied but billing flip failed: {e}");
                let record = self.record(
                    &customer,
                    MigrationDirection::ToPrepaid,
                    admin_id,
                    false,
                    detail.clone(),
                )?;
                warn!(customer = %customer.id, error = %e, "partial migration recorded");
                Err(CoreError::PartialMigration {
                    detail: format!("{detail} (audit record {record})"),
                })
            }
        }
    }

    /// Move a prepaid customer back to monthly invoicing.
    pub async fn migrate_to_postpaid(
        &self,
        customer_id: CustomerId,
        admin_id: Option<u64>,
    ) -> Result<MigrationOutcome, CoreError> {
        let Some(customer) = self.store.customer(customer_id)? else {
            return Err(CoreError::not_found("customer", customer_id));
        };

        if customer.billing_mode == BillingMode::Postpaid {
            return Ok(MigrationOutcome {
                success: false,
                message: "customer is already postpaid".into(),
                record_id: None,
            });
        }

        if let Err(e) = self.apply_postpaid_router_state(&customer).await {
            let record = self.record(
                &customer,
                MigrationDirection::ToPostpaid,
                admin_id,
                false,
                format!("router-side teardown failed: {e}"),
            )?;
            return Ok(MigrationOutcome {
                success: false,
                message: format!("router-side teardown failed, billing untouched: {e}"),
                record_id: Some(record),
            });
        }

        let flip = self
            .store
            .set_billing_mode(customer.id, BillingMode::Postpaid)
            .and_then(|()| self.store.cancel_active_subscriptions(customer.id));

        match flip {
            Ok(cancelled) => {
                let record = self.record(
                    &customer,
                    MigrationDirection::ToPostpaid,
                    admin_id,
                    true,
                    format!("router restored; {cancelled} prepaid subscription(s) cancelled"),
                )?;
                self.notifier
                    .notify(customer.id, NotificationEvent::MigratedToPostpaid);
                info!(customer = %customer.id, "migrated to postpaid");
                Ok(MigrationOutcome {
                    success: true,
                    message: "migrated to postpaid".into(),
                    record_id: Some(record),
                })
            }
            Err(e) => {
                let detail = format!("router restored but billing flip failed: {e}");
                let record = self.record(
                    &customer,
                    MigrationDirection::ToPostpaid,
                    admin_id,
                    false,
                    detail.clone(),
                )?;
                Err(CoreError::PartialMigration {
                    detail: format!("{detail} (audit record {record})"),
                })
            }
        }
    }

    // ── Repair path ──────────────────────────────────────────────────

    /// Bring one prepaid customer's router state in line with their
    /// billing state, replaying only the steps that are missing.
    ///
    /// Deliberately separate from migration: router writes are not
    /// transactional, so a failure partway through a migration must be
    /// repairable without redoing steps that already applied.
    pub async fn fix_prepaid_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<RepairOutcome, CoreError> {
        let Some(customer) = self.store.customer(customer_id)? else {
            return Err(CoreError::not_found("customer", customer_id));
        };
        if customer.billing_mode != BillingMode::Prepaid {
            return Ok(RepairOutcome {
                success: false,
                messages: vec!["customer is not prepaid; use migrate instead".into()],
            });
        }

        let entitled = self.store.active_subscription(customer.id)?.is_some();
        let mut messages = Vec::new();

        match &customer.connection {
            ConnectionKind::StaticIp { address } => {
                let ip = customer_ip(address);
                let (target, other) = if entitled {
                    (policy::ACTIVE_LIST, policy::ISOLATION_LIST)
                } else {
                    (policy::ISOLATION_LIST, policy::ACTIVE_LIST)
                };

                // Diff step 1: membership of the wrong list.
                if self.pool.remove_from_address_list(other, &ip).await? {
                    messages.push(format!("removed {ip} from '{other}'"));
                }

                // Diff step 2: membership of the right list.
                if self.pool.is_in_address_list(target, &ip).await? {
                    messages.push(format!("{ip} already in '{target}'"));
                } else {
                    self.pool
                        .add_to_address_list(
                            target,
                            &ip,
                            &policy::member_comment(&customer.name, "repaired"),
                        )
                        .await?;
                    messages.push(format!("added {ip} to '{target}'"));
                }

                // Diff step 3: the portal redirect entry.
                if self
                    .pool
                    .is_in_address_list(policy::PORTAL_REDIRECT_LIST, &ip)
                    .await?
                {
                    messages.push(format!("portal redirect already present for {ip}"));
                } else {
                    self.pool
                        .add_to_address_list(
                            policy::PORTAL_REDIRECT_LIST,
                            &ip,
                            &policy::member_comment(&customer.name, "portal redirect"),
                        )
                        .await?;
                    messages.push(format!("added portal redirect for {ip}"));
                }
            }
            ConnectionKind::Pppoe { username, profile } => {
                let desired = if entitled {
                    profile.as_str()
                } else {
                    policy::NO_PACKAGE_PROFILE
                };
                let observed = self.pool.pppoe_profile(username).await?;
                match observed {
                    Some(current) if current == desired => {
                        messages.push(format!("profile already '{desired}'"));
                    }
                    Some(_) => {
                        self.pool.set_pppoe_profile(username, desired).await?;
                        self.pool.disconnect_pppoe_session(username).await?;
                        messages.push(format!("profile set to '{desired}'"));
                    }
                    None => {
                        return Ok(RepairOutcome {
                            success: false,
                            messages: vec![format!("no PPPoE secret '{username}' on the router")],
                        });
                    }
                }
            }
        }

        Ok(RepairOutcome {
            success: true,
            messages,
        })
    }

    /// Batch repair over every prepaid customer. Failures are collected,
    /// not fatal to the batch.
    pub async fn fix_all_prepaid_customers(&self) -> Result<BatchRepairOutcome, CoreError> {
        let customers = self.store.customers_by_mode(BillingMode::Prepaid)?;
        let mut fixed = 0usize;
        let mut failed = 0usize;
        let mut messages = Vec::new();

        for customer in customers {
            match self.fix_prepaid_customer(customer.id).await {
                Ok(outcome) if outcome.success => {
                    fixed += 1;
                    messages.push(format!(
                        "{} (id {}): {}",
                        customer.name,
                        customer.id,
                        outcome.messages.join("; ")
                    ));
                }
                Ok(outcome) => {
                    failed += 1;
                    messages.push(format!(
                        "{} (id {}): {}",
                        customer.name,
                        customer.id,
                        outcome.messages.join("; ")
                    ));
                }
                Err(e) => {
                    failed += 1;
                    messages.push(format!("{} (id {}): {e}", customer.name, customer.id));
                    warn!(customer = %customer.id, error = %e, "batch repair item failed");
                }
            }
        }

        info!(fixed, failed, "batch repair complete");
        Ok(BatchRepairOutcome {
            fixed,
            failed,
            messages,
        })
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Read-only: observed vs desired state, issues, recommendations.
    /// Used to decide whether [`fix_prepaid_customer`] is needed.
    ///
    /// [`fix_prepaid_customer`]: Self::fix_prepaid_customer
    pub async fn debug_customer_migration(
        &self,
        customer_id: CustomerId,
    ) -> Result<MigrationDiagnosis, CoreError> {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let Some(customer) = self.store.customer(customer_id)? else {
            return Ok(MigrationDiagnosis {
                customer_id,
                billing_mode: None,
                ip_found: false,
                ip_address: None,
                observed_lists: Vec::new(),
                desired_list: None,
                portal_exists: false,
                issues: vec!["customer not found".into()],
                recommendations: vec!["verify the customer id".into()],
                can_migrate: false,
            });
        };

        let entitled = self.store.active_subscription(customer.id)?.is_some();
        let desired_list = match customer.billing_mode {
            BillingMode::Prepaid if entitled => Some(policy::ACTIVE_LIST.to_owned()),
            BillingMode::Prepaid => Some(policy::ISOLATION_LIST.to_owned()),
            BillingMode::Postpaid => None,
        };

        let (ip_found, ip_address, observed_lists, portal_exists) = match &customer.connection {
            ConnectionKind::StaticIp { address } => {
                let ip = customer_ip(address);
                let lists = self.pool.address_lists_for(&ip).await.unwrap_or_else(|e| {
                    issues.push(format!("could not read router state: {e}"));
                    Vec::new()
                });
                let portal = lists.iter().any(|l| l == policy::PORTAL_REDIRECT_LIST);
                (true, Some(ip), lists, portal)
            }
            ConnectionKind::Pppoe { username, .. } => {
                if username.is_empty() {
                    issues.push("PPPoE customer has no username".into());
                    recommendations.push("set the PPPoE username on the customer".into());
                }
                (false, None, Vec::new(), false)
            }
        };

        if customer.billing_mode == BillingMode::Prepaid {
            if let (Some(desired), Some(ip)) = (&desired_list, &ip_address) {
                if !observed_lists.iter().any(|l| l == desired) {
                    issues.push(format!("{ip} is not in '{desired}'"));
                    recommendations.push("run the prepaid repair path".into());
                }
                if !portal_exists {
                    issues.push("portal redirect entry missing".into());
                    recommendations.push("run the prepaid repair path".into());
                }
            }
        }

        if self.store.router_settings()?.is_none() {
            issues.push("no router settings configured".into());
            recommendations.push("configure the router connection".into());
        }

        let can_migrate = customer.billing_mode == BillingMode::Postpaid;
        if !can_migrate {
            recommendations
                .push("customer is already prepaid; repair instead of migrating".into());
        }

        Ok(MigrationDiagnosis {
            customer_id,
            billing_mode: Some(customer.billing_mode),
            ip_found,
            ip_address,
            observed_lists,
            desired_list,
            portal_exists,
            issues,
            recommendations,
            can_migrate,
        })
    }

    // ── Router-side state ────────────────────────────────────────────

    /// Desired prepaid configuration: isolation or active list per
    /// entitlement, plus the captive-portal redirect entry.
    async fn apply_prepaid_router_state(
        &self,
        customer: &Customer,
        entitled: bool,
    ) -> Result<(), CoreError> {
        match &customer.connection {
            ConnectionKind::StaticIp { address } => {
                let ip = customer_ip(address);
                let (target, other) = if entitled {
                    (policy::ACTIVE_LIST, policy::ISOLATION_LIST)
                } else {
                    (policy::ISOLATION_LIST, policy::ACTIVE_LIST)
                };
                self.pool.remove_from_address_list(other, &ip).await?;
                self.pool
                    .add_to_address_list(
                        target,
                        &ip,
                        &policy::member_comment(&customer.name, "prepaid"),
                    )
                    .await?;
                self.pool
                    .add_to_address_list(
                        policy::PORTAL_REDIRECT_LIST,
                        &ip,
                        &policy::member_comment(&customer.name, "portal redirect"),
                    )
                    .await?;
            }
            ConnectionKind::Pppoe { username, profile } => {
                let desired = if entitled {
                    profile.as_str()
                } else {
                    policy::NO_PACKAGE_PROFILE
                };
                if !self.pool.set_pppoe_profile(username, desired).await? {
                    return Err(CoreError::not_found("PPPoE secret", username));
                }
                self.pool.disconnect_pppoe_session(username).await?;
            }
        }
        Ok(())
    }

    /// Desired postpaid configuration: no prepaid list membership, no
    /// portal redirect, the regular profile.
    async fn apply_postpaid_router_state(&self, customer: &Customer) -> Result<(), CoreError> {
        match &customer.connection {
            ConnectionKind::StaticIp { address } => {
                let ip = customer_ip(address);
                self.pool
                    .remove_from_address_list(policy::ACTIVE_LIST, &ip)
                    .await?;
                self.pool
                    .remove_from_address_list(policy::ISOLATION_LIST, &ip)
                    .await?;
                self.pool
                    .remove_from_address_list(policy::PORTAL_REDIRECT_LIST, &ip)
                    .await?;
            }
            ConnectionKind::Pppoe { username, profile } => {
                let desired = if profile.is_empty() {
                    policy::POSTPAID_PROFILE
                } else {
                    profile.as_str()
                };
                if !self.pool.set_pppoe_profile(username, desired).await? {
                    return Err(CoreError::not_found("PPPoE secret", username));
                }
                self.pool.disconnect_pppoe_session(username).await?;
            }
        }
        Ok(())
    }

    /// Append one audit record; returns its id.
    fn record(
        &self,
        customer: &Customer,
        direction: MigrationDirection,
        admin_id: Option<u64>,
        success: bool,
        detail: String,
    ) -> Result<Uuid, CoreError> {
        let id = Uuid::new_v4();
        self.store.record_migration(MigrationRecord {
            id,
            customer_id: customer.id,
            direction,
            at: Utc::now(),
            admin_id,
            success,
            detail,
        })?;
        Ok(id)
    }
}
