//! Local interface addresses

use std::net::IpAddr;
use tracing::{debug, warn};

/// Non-loopback IPv4 addresses of this host, as strings.
///
/// Enumeration failures are logged and yield an empty list; the address
/// filter then keeps every candidate.
pub fn own_ipv4_addresses() -> Vec<String> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    let mut addresses: Vec<String> = interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(ip) => Some(ip.to_string()),
            IpAddr::V6(_) => None,
        })
        .collect();
    addresses.sort();
    addresses.dedup();

    debug!(addresses = ?addresses, "Own IPv4 addresses");
    addresses
}

/// Local hostname as an mDNS host label (`<host>.local.`).
pub fn local_host_label() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "edgecomm".to_string());
    let host = host.trim_end_matches('.');
    let host = host.strip_suffix(".local").unwrap_or(host);
    format!("{}.local.", host)
}
