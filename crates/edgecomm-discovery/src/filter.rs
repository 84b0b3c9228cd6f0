//! Address selection for discovered services
//!
//! Browsing reports every address a host announces, repeatedly and across
//! interfaces. The filter remembers what it has seen per instance name and
//! picks the address most likely to be reachable from this host.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::backend::DiscoveryRecord;

/// Address handed out when the discovered service runs on this host.
pub const LOOPBACK_MARKER: &str = "127.0.0.1";

/// Addresses seen so far, keyed by instance name.
#[derive(Debug, Default)]
pub struct RecordCache {
    entries: DashMap<String, HashSet<String>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets an instance so that its next appearance is reported again.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Addresses cached for `name`, sorted.
    pub fn addresses(&self, name: &str) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .entries
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        addresses.sort();
        addresses
    }

    /// Selects the addresses of `record` to report, updating the cache.
    ///
    /// Returns an empty list when the record should be dropped. The cache
    /// entry stays locked for the whole update, so concurrent reports of the
    /// same instance cannot both see an address as new.
    pub fn filter(&self, record: &DiscoveryRecord, own_addresses: &[String]) -> Vec<String> {
        let name = match record.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Vec::new(),
        };
        if record.addresses.is_empty() {
            return Vec::new();
        }

        let mut entry = self.entries.entry(name.to_string()).or_default();

        let mut new_addresses = Vec::new();
        for address in &record.addresses {
            if entry.insert(address.clone()) {
                new_addresses.push(address.clone());
            }
        }
        if new_addresses.is_empty() {
            return Vec::new();
        }

        if entry.iter().any(|a| own_addresses.contains(a)) {
            return vec![LOOPBACK_MARKER.to_string()];
        }
        drop(entry);

        if new_addresses.len() == 1 {
            return new_addresses;
        }

        closest_addresses(new_addresses, own_addresses)
    }
}

/// Keeps the candidates sharing the longest character prefix with any own
/// address, sorted. Without own addresses every candidate is kept.
fn closest_addresses(candidates: Vec<String>, own_addresses: &[String]) -> Vec<String> {
    let mut best = Vec::new();

    if own_addresses.is_empty() {
        best = candidates;
    } else {
        let mut best_len = 0;
        for candidate in candidates {
            let len = own_addresses
                .iter()
                .map(|own| common_prefix_len(&candidate, own))
                .max()
                .unwrap_or(0);
            if len > best_len {
                best_len = len;
                best.clear();
            }
            if len == best_len {
                best.push(candidate);
            }
        }
    }

    best.sort();
    best
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count()
}
