//! Discovery backend abstraction
//!
//! A backend announces service instances and reports instances of a type as
//! they appear and disappear. The directory layers caching, address
//! filtering and query matching on top.

use edgecomm_core::ServiceType;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::error::Result;

/// A service instance as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRecord {
    /// Instance name; some backends report records without one
    pub name: Option<String>,
    /// Advertised port
    pub port: u16,
    /// IPv4 addresses in the order the backend reported them
    pub addresses: Vec<String>,
    /// TXT attributes
    pub properties: HashMap<String, String>,
}

impl DiscoveryRecord {
    /// Creates a record with a name and no attributes.
    pub fn new(name: impl Into<String>, port: u16, addresses: Vec<String>) -> Self {
        Self {
            name: Some(name.into()),
            port,
            addresses,
            properties: HashMap::new(),
        }
    }

    /// Adds a TXT attribute.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle events produced while browsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// A service instance appeared or was resolved again
    Up(DiscoveryRecord),
    /// A service instance went away
    Down(DiscoveryRecord),
    /// A service instance updated its record
    Changed(DiscoveryRecord),
}

/// Network interface to announce on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceHint {
    /// Every interface the backend uses by default
    Any,
    /// Loopback only
    Loopback,
    /// The interface owning this address
    Address(Ipv4Addr),
}

/// Everything a backend needs to announce one instance.
#[derive(Debug, Clone)]
pub struct AdvertiseRequest {
    pub name: String,
    pub service_type: ServiceType,
    pub port: u16,
    pub attributes: HashMap<String, String>,
    pub interface: InterfaceHint,
}

/// Runs a cleanup action once, either explicitly or on drop.
pub struct StopGuard(Option<Box<dyn FnOnce() + Send + Sync>>);

impl StopGuard {
    pub fn new(stop: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self(Some(Box::new(stop)))
    }

    /// A guard with nothing to clean up.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.0.take() {
            stop();
        }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for StopGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StopGuard").field(&self.0.is_some()).finish()
    }
}

/// Handle to a running announcement. Dropping it withdraws the service.
#[derive(Debug)]
pub struct Advertisement {
    fullname: String,
    guard: StopGuard,
}

impl Advertisement {
    pub fn new(fullname: impl Into<String>, guard: StopGuard) -> Self {
        Self {
            fullname: fullname.into(),
            guard,
        }
    }

    /// Backend specific full name of the announced instance.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Withdraws the announcement.
    pub fn stop(mut self) {
        self.guard.stop();
    }
}

/// Stream of browse events for one service type. Dropping it stops browsing.
pub struct BrowseStream {
    events: BoxStream<'static, BrowseEvent>,
    guard: StopGuard,
}

impl BrowseStream {
    pub fn new(events: BoxStream<'static, BrowseEvent>, guard: StopGuard) -> Self {
        Self { events, guard }
    }

    /// Next event, or `None` once the backend stops reporting.
    pub async fn next(&mut self) -> Option<BrowseEvent> {
        self.events.next().await
    }

    pub fn stop(&mut self) {
        self.guard.stop();
    }
}

impl fmt::Debug for BrowseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowseStream")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

/// A service announcement and browsing mechanism.
pub trait DiscoveryBackend: Send + Sync {
    /// Announces one service instance until the returned handle is stopped.
    fn advertise(&self, request: AdvertiseRequest) -> Result<Advertisement>;

    /// Starts browsing for instances of `service_type`.
    fn browse(&self, service_type: &ServiceType) -> Result<BrowseStream>;
}
