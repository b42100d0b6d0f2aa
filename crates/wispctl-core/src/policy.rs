// ── Router-side vocabulary ──
//
// Names of the address lists and PPPoE profiles the reconciliation
// engine materializes. Firewall/NAT rules on the device key off these:
// `prepaid-active` passes traffic, `prepaid-no-package` isolates, and
// `portal-redirect` feeds the captive-portal destination-NAT rule.

use crate::model::CustomerId;

/// Entitled prepaid customers: normal service.
pub const ACTIVE_LIST: &str = "prepaid-active";

/// Prepaid customers without an active package: isolated.
pub const ISOLATION_LIST: &str = "prepaid-no-package";

/// Members get HTTP redirected to the self-service portal.
pub const PORTAL_REDIRECT_LIST: &str = "portal-redirect";

/// PPPoE profile for prepaid subscribers without a package.
pub const NO_PACKAGE_PROFILE: &str = "prepaid-no-package";

/// PPPoE profile restored when a customer returns to postpaid invoicing.
pub const POSTPAID_PROFILE: &str = "default";

/// Naming convention for per-customer queue trees.
pub fn queue_name(customer: CustomerId) -> String {
    format!("cust-{customer}")
}

/// Reverse of [`queue_name`]: recover the customer id from a queue name,
/// `None` for queues that are not ours.
pub fn customer_from_queue_name(name: &str) -> Option<CustomerId> {
    name.strip_prefix("cust-")?.parse().ok().map(CustomerId)
}

/// Comment stamped on address-list entries so operators can trace them.
pub fn member_comment(customer_name: &str, reason: &str) -> String {
    format!("{customer_name} - {reason}")
}
