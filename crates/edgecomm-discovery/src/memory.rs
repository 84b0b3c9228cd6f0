//! In-process discovery backend
//!
//! Services advertised on a [`MemoryNetwork`] are visible to every browser
//! on the same network value (clones share state). Used by tests and by
//! applications running both ends in one process.

use async_channel::Sender;
use edgecomm_core::ServiceType;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::backend::{
    AdvertiseRequest, Advertisement, BrowseEvent, BrowseStream, DiscoveryBackend,
    DiscoveryRecord, InterfaceHint, StopGuard,
};
use crate::error::Result;
use crate::filter::LOOPBACK_MARKER;

struct Announced {
    service_type: ServiceType,
    record: DiscoveryRecord,
}

struct Browser {
    service_type: ServiceType,
    events: Sender<BrowseEvent>,
}

#[derive(Default)]
struct NetworkState {
    services: HashMap<u64, Announced>,
    browsers: HashMap<u64, Browser>,
}

/// Shared in-memory service registry.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    host_addresses: Arc<Vec<String>>,
    next_id: Arc<AtomicU64>,
    browse_count: Arc<AtomicU64>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Services announced on any interface are reported at `127.0.0.1`.
    pub fn new() -> Self {
        Self::with_host_addresses(vec![LOOPBACK_MARKER.to_string()])
    }

    /// Services announced on any interface are reported at these addresses.
    pub fn with_host_addresses(addresses: Vec<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState::default())),
            host_addresses: Arc::new(addresses),
            next_id: Arc::new(AtomicU64::new(1)),
            browse_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of browse operations started so far.
    pub fn browse_count(&self) -> u64 {
        self.browse_count.load(Ordering::SeqCst)
    }

    /// Number of services currently announced.
    pub fn service_count(&self) -> usize {
        self.state.lock().services.len()
    }

    /// Announces a raw record, bypassing address selection. The record is
    /// withdrawn when the returned handle is stopped or dropped.
    pub fn announce(&self, service_type: ServiceType, record: DiscoveryRecord) -> Advertisement {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let fullname = format!(
            "{}.{}",
            record.name.as_deref().unwrap_or_default(),
            service_type.to_service_string()
        );

        {
            let mut state = self.state.lock();
            state.notify(&service_type, BrowseEvent::Up(record.clone()));
            state.services.insert(
                id,
                Announced {
                    service_type,
                    record,
                },
            );
        }
        debug!(service = %fullname, "Announced on memory network");

        let state = self.state.clone();
        let guard = StopGuard::new(move || {
            let mut state = state.lock();
            if let Some(announced) = state.services.remove(&id) {
                let down = BrowseEvent::Down(announced.record);
                state.notify(&announced.service_type, down);
            }
        });

        Advertisement::new(fullname, guard)
    }

    /// Reports a record change to current browsers without touching the
    /// registry.
    pub fn report_changed(&self, service_type: &ServiceType, record: DiscoveryRecord) {
        self.state
            .lock()
            .notify(service_type, BrowseEvent::Changed(record));
    }
}

impl NetworkState {
    fn notify(&mut self, announced_type: &ServiceType, event: BrowseEvent) {
        self.browsers.retain(|_, browser| {
            if !browses(&browser.service_type, announced_type) {
                return true;
            }
            browser.events.try_send(event.clone()).is_ok()
        });
    }
}

/// A browse for `wanted` sees announcements of `announced` when the base
/// types agree and the wanted subtype, if any, is the announced one.
fn browses(wanted: &ServiceType, announced: &ServiceType) -> bool {
    wanted.name == announced.name
        && wanted.protocol == announced.protocol
        && (wanted.subtype.is_none() || wanted.subtype == announced.subtype)
}

impl DiscoveryBackend for MemoryNetwork {
    fn advertise(&self, request: AdvertiseRequest) -> Result<Advertisement> {
        let addresses = match request.interface {
            InterfaceHint::Any => self.host_addresses.as_ref().clone(),
            InterfaceHint::Loopback => vec![LOOPBACK_MARKER.to_string()],
            InterfaceHint::Address(ip) => vec![ip.to_string()],
        };

        let record = DiscoveryRecord {
            name: Some(request.name),
            port: request.port,
            addresses,
            properties: request.attributes,
        };

        Ok(self.announce(request.service_type, record))
    }

    fn browse(&self, service_type: &ServiceType) -> Result<BrowseStream> {
        self.browse_count.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = async_channel::unbounded();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        {
            let mut state = self.state.lock();
            for announced in state.services.values() {
                if browses(service_type, &announced.service_type) {
                    let _ = tx.try_send(BrowseEvent::Up(announced.record.clone()));
                }
            }
            state.browsers.insert(
                id,
                Browser {
                    service_type: service_type.clone(),
                    events: tx,
                },
            );
        }

        let state = self.state.clone();
        let guard = StopGuard::new(move || {
            state.lock().browsers.remove(&id);
        });

        Ok(BrowseStream::new(rx.boxed(), guard))
    }
}
