// ── Customer IP derivation ──
//
// Stored gateway addresses are CIDR-notated (`192.168.1.1/30`). On a /30
// point-to-point link the first host is the gateway side and the second
// host is the customer side; everything that targets the customer
// (address lists, probes, display) must use the second host.

use std::net::Ipv4Addr;

/// Derive the customer-facing IP from a stored gateway address.
///
/// - No `/` present: returned unchanged (nothing to interpret).
/// - `/30`: mask to the subnet base; the stored address being the first
///   host (gateway) yields the second host; the second host is returned
///   as-is; anything else is a data anomaly and defaults to the second
///   host rather than failing.
/// - Any other prefix: the bare address with the suffix stripped.
/// - Malformed input falls back to the substring before `/`.
///
/// Total and idempotent: the output never carries a CIDR suffix, so
/// feeding it back in returns it unchanged.
pub fn customer_ip(address: &str) -> String {
    let Some((ip_part, prefix_part)) = address.split_once('/') else {
        return address.to_owned();
    };

    let Ok(ip) = ip_part.trim().parse::<Ipv4Addr>() else {
        return ip_part.to_owned();
    };
    let Ok(prefix) = prefix_part.trim().parse::<u8>() else {
        return ip_part.to_owned();
    };

    if prefix != 30 {
        return ip_part.to_owned();
    }

    let raw = u32::from(ip);
    let base = raw & 0xFFFF_FFFC;
    let first_host = base + 1;
    let second_host = base + 2;

    if raw == second_host {
        ip_part.to_owned()
    } else {
        // Gateway side, or anomalous third/zeroth address: both resolve
        // to the conventional customer host.
        Ipv4Addr::from(second_host).to_string()
    }
}
