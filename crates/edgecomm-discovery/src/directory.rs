//! Service directory: advertisement and filtered discovery
//!
//! A directory owns at most one active browse. Browse events are processed
//! on a dedicated task: records pass the query filter, then the address
//! filter, and survivors are turned into [`ServiceSpec`]s for the caller.

use edgecomm_core::{ServiceQuery, ServiceSpec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{
    AdvertiseRequest, Advertisement, BrowseEvent, BrowseStream, DiscoveryBackend, InterfaceHint,
};
use crate::error::{DiscoveryError, Result};
use crate::filter::RecordCache;
use crate::interfaces::own_ipv4_addresses;

/// One running browse. Each browse keeps its own record cache.
struct ActiveBrowse {
    token: CancellationToken,
    task: JoinHandle<()>,
    cache: Arc<RecordCache>,
}

/// Advertises services and discovers services matching a query.
pub struct ServiceDirectory {
    backend: Arc<dyn DiscoveryBackend>,
    own_addresses: Arc<Vec<String>>,
    browse: Mutex<Option<ActiveBrowse>>,
    advertisements: Arc<Mutex<Vec<Advertisement>>>,
    /// Hostname resolutions still in flight
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceDirectory {
    /// Creates a directory using this host's interface addresses for
    /// address selection.
    pub fn new(backend: Arc<dyn DiscoveryBackend>) -> Self {
        Self::with_own_addresses(backend, own_ipv4_addresses())
    }

    pub fn with_own_addresses(backend: Arc<dyn DiscoveryBackend>, own_addresses: Vec<String>) -> Self {
        Self {
            backend,
            own_addresses: Arc::new(own_addresses),
            browse: Mutex::new(None),
            advertisements: Arc::new(Mutex::new(Vec::new())),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Announces `spec` under its name, type, port and properties.
    ///
    /// A literal IPv4 address selects the announcing interface (loopback for
    /// `127.x`). A hostname is resolved on a background task and the
    /// announcement happens once resolution completes; failures there are
    /// logged. Must be called from within a tokio runtime.
    pub fn advertise_service(&self, spec: &ServiceSpec) -> Result<()> {
        let name = spec
            .name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| DiscoveryError::NotAdvertisable("service spec has no name".into()))?;

        let request = AdvertiseRequest {
            name: name.to_string(),
            service_type: spec.service_type().clone(),
            port: spec.port(),
            attributes: spec.properties().cloned().unwrap_or_else(HashMap::new),
            interface: InterfaceHint::Any,
        };

        let Some(address) = spec.address() else {
            return register(self.backend.as_ref(), &self.advertisements, request);
        };

        if let Ok(ip) = address.parse::<Ipv4Addr>() {
            let request = AdvertiseRequest {
                interface: interface_for(ip),
                ..request
            };
            return register(self.backend.as_ref(), &self.advertisements, request);
        }

        let backend = self.backend.clone();
        let advertisements = self.advertisements.clone();
        let host = address.to_string();
        let task = tokio::spawn(async move {
            let ip = match resolve_ipv4(&host, request.port).await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!(service = %request.name, error = %e, "Not advertising service");
                    return;
                }
            };
            info!(host = %host, address = %ip, "Resolved advertised address");

            let request = AdvertiseRequest {
                interface: interface_for(ip),
                ..request
            };
            if let Err(e) = register(backend.as_ref(), &advertisements, request) {
                warn!(error = %e, "Failed to advertise service");
            }
        });

        let mut pending = self.pending.lock();
        pending.retain(|t| !t.is_finished());
        pending.push(task);
        Ok(())
    }

    /// Withdraws every announcement made by this directory, including ones
    /// still waiting on address resolution.
    pub fn stop_advertising(&self) {
        for task in self.pending.lock().drain(..) {
            task.abort();
        }
        let advertisements: Vec<Advertisement> = self.advertisements.lock().drain(..).collect();
        for ad in advertisements {
            debug!(service = ad.fullname(), "Withdrawing announcement");
            ad.stop();
        }
    }

    /// Number of live announcements.
    pub fn advertisement_count(&self) -> usize {
        self.advertisements.lock().len()
    }

    /// Browses for services matching `query` and calls `on_found` once per
    /// newly usable service.
    ///
    /// Replaces any browse already running. `on_found` runs on the browse
    /// task and may call [`stop_discovering`](Self::stop_discovering). Must
    /// be called from within a tokio runtime.
    pub fn discover_services<F>(&self, query: ServiceQuery, on_found: F) -> Result<()>
    where
        F: FnMut(ServiceSpec) + Send + 'static,
    {
        self.stop_discovering();

        let stream = self.backend.browse(query.service_type())?;
        let token = CancellationToken::new();
        let cache = Arc::new(RecordCache::new());

        info!(
            service_type = %query.service_type().to_service_string(),
            name = ?query.name(),
            "Discovering services"
        );

        let task = tokio::spawn(run_browse(
            stream,
            query,
            cache.clone(),
            self.own_addresses.clone(),
            token.clone(),
            on_found,
        ));

        *self.browse.lock() = Some(ActiveBrowse { token, task, cache });
        Ok(())
    }

    /// Like [`discover_services`](Self::discover_services), delivering specs
    /// on a channel instead of a callback.
    pub fn discover(&self, query: ServiceQuery) -> Result<mpsc::UnboundedReceiver<ServiceSpec>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.discover_services(query, move |spec| {
            let _ = tx.send(spec);
        })?;
        Ok(rx)
    }

    /// Stops the active browse, if any, and forgets every cached record.
    /// Idempotent.
    pub fn stop_discovering(&self) {
        let Some(active) = self.browse.lock().take() else {
            return;
        };
        active.token.cancel();
        active.task.abort();
        active.cache.clear();
        debug!("Stopped discovering");
    }

    pub fn is_discovering(&self) -> bool {
        self.browse
            .lock()
            .as_ref()
            .is_some_and(|active| !active.token.is_cancelled() && !active.task.is_finished())
    }
}

impl std::fmt::Debug for ServiceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDirectory")
            .field("own_addresses", &self.own_addresses)
            .field("discovering", &self.is_discovering())
            .field("advertisements", &self.advertisement_count())
            .finish()
    }
}

impl Drop for ServiceDirectory {
    fn drop(&mut self) {
        self.stop_discovering();
        self.stop_advertising();
    }
}

fn interface_for(ip: Ipv4Addr) -> InterfaceHint {
    if ip.is_loopback() {
        InterfaceHint::Loopback
    } else {
        InterfaceHint::Address(ip)
    }
}

fn register(
    backend: &dyn DiscoveryBackend,
    advertisements: &Mutex<Vec<Advertisement>>,
    request: AdvertiseRequest,
) -> Result<()> {
    let ad = backend.advertise(request)?;
    advertisements.lock().push(ad);
    Ok(())
}

async fn resolve_ipv4(host: &str, port: u16) -> Result<Ipv4Addr> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| DiscoveryError::ResolutionFailed {
            address: host.to_string(),
            reason: e.to_string(),
        })?;

    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| DiscoveryError::ResolutionFailed {
            address: host.to_string(),
            reason: "no IPv4 address".to_string(),
        })
}

async fn run_browse<F>(
    mut stream: BrowseStream,
    query: ServiceQuery,
    cache: Arc<RecordCache>,
    own_addresses: Arc<Vec<String>>,
    token: CancellationToken,
    mut on_found: F,
) where
    F: FnMut(ServiceSpec) + Send + 'static,
{
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            event = stream.next() => event,
        };
        let Some(event) = event else {
            debug!("Browse stream ended");
            break;
        };
        if token.is_cancelled() {
            break;
        }

        match event {
            BrowseEvent::Up(record) => {
                if !query.matches(record.name.as_deref(), &record.properties) {
                    debug!(name = ?record.name, "Discovered service does not match query");
                    continue;
                }
                let addresses = cache.filter(&record, &own_addresses);
                if addresses.is_empty() {
                    continue;
                }
                let Some(name) = record.name.as_deref() else {
                    continue;
                };

                match ServiceSpec::from_discovery(
                    query.service_type().clone(),
                    name,
                    record.port,
                    record.properties.clone(),
                    addresses,
                ) {
                    Ok(spec) => {
                        info!(
                            name = %name,
                            address = ?spec.address(),
                            port = spec.port(),
                            "Service found"
                        );
                        on_found(spec);
                    }
                    Err(e) => warn!(name = %name, error = %e, "Ignoring discovered service"),
                }
            }
            BrowseEvent::Down(record) => {
                if let Some(name) = record.name.as_deref() {
                    debug!(name = %name, "Service went away");
                    cache.remove(name);
                }
            }
            BrowseEvent::Changed(record) => {
                debug!(name = ?record.name, "Ignoring service change");
            }
        }
    }

    stream.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DiscoveryRecord;
    use crate::memory::MemoryNetwork;
    use edgecomm_core::ServiceType;
    use std::time::Duration;

    fn echo() -> ServiceType {
        ServiceType::new("echo", "tcp")
    }

    fn service(name: &str, port: u16) -> ServiceSpec {
        ServiceSpec::builder(echo()).name(name).port(port).build().unwrap()
    }

    fn directory(network: &MemoryNetwork) -> ServiceDirectory {
        ServiceDirectory::with_own_addresses(Arc::new(network.clone()), Vec::new())
    }

    async fn next_spec(rx: &mut mpsc::UnboundedReceiver<ServiceSpec>) -> Option<ServiceSpec> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_discover_advertised_service() {
        let network = MemoryNetwork::new();
        let advertiser = directory(&network);
        let browser = directory(&network);

        advertiser.advertise_service(&service("svc1", 9999)).unwrap();
        assert_eq!(advertiser.advertisement_count(), 1);

        let mut rx = browser.discover(ServiceQuery::new(echo())).unwrap();
        let spec = next_spec(&mut rx).await.unwrap();

        assert_eq!(spec.name(), Some("svc1"));
        assert_eq!(spec.port(), 9999);
        assert_eq!(spec.address(), Some("127.0.0.1"));
        assert!(browser.is_discovering());
    }

    #[tokio::test]
    async fn test_query_name_filters_services() {
        let network = MemoryNetwork::new();
        let advertiser = directory(&network);
        advertiser.advertise_service(&service("svc1", 9001)).unwrap();
        advertiser.advertise_service(&service("other", 9002)).unwrap();

        let browser = directory(&network);
        let mut rx = browser
            .discover(ServiceQuery::new(echo()).with_name("svc1"))
            .unwrap();

        let spec = next_spec(&mut rx).await.unwrap();
        assert_eq!(spec.name(), Some("svc1"));
        assert!(next_spec(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_property_match_is_enough() {
        let network = MemoryNetwork::new();
        let _ad = network.announce(
            echo(),
            DiscoveryRecord::new("printer-7", 9100, vec!["10.0.0.5".into()])
                .with_property("room", "lab"),
        );

        let browser = directory(&network);
        let query = ServiceQuery::new(echo())
            .with_name("nomatch")
            .with_property("room", "lab");
        let mut rx = browser.discover(query).unwrap();

        let spec = next_spec(&mut rx).await.unwrap();
        assert_eq!(spec.name(), Some("printer-7"));
        assert_eq!(spec.address(), Some("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_own_address_reported_as_loopback() {
        let network = MemoryNetwork::with_host_addresses(vec!["192.168.1.2".into()]);
        let advertiser = directory(&network);
        advertiser.advertise_service(&service("svc1", 9999)).unwrap();

        let browser = ServiceDirectory::with_own_addresses(
            Arc::new(network.clone()),
            vec!["192.168.1.2".into()],
        );
        let mut rx = browser.discover(ServiceQuery::new(echo())).unwrap();

        let spec = next_spec(&mut rx).await.unwrap();
        assert_eq!(spec.address(), Some("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_stop_discovering_from_callback() {
        let network = MemoryNetwork::new();
        let advertiser = directory(&network);
        advertiser.advertise_service(&service("svc1", 9001)).unwrap();

        let browser = Arc::new(directory(&network));
        let found = Arc::new(Mutex::new(Vec::new()));

        let dir = Arc::downgrade(&browser);
        let seen = found.clone();
        browser
            .discover_services(ServiceQuery::new(echo()), move |spec| {
                seen.lock().push(spec.name().map(str::to_string));
                if let Some(dir) = dir.upgrade() {
                    dir.stop_discovering();
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        advertiser.advertise_service(&service("svc2", 9002)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(found.lock().len(), 1);
        assert!(!browser.is_discovering());

        // Idempotent
        browser.stop_discovering();
    }

    #[tokio::test]
    async fn test_service_rediscovered_after_going_away() {
        let network = MemoryNetwork::new();
        let browser = directory(&network);
        let mut rx = browser.discover(ServiceQuery::new(echo())).unwrap();

        let advertiser = directory(&network);
        advertiser.advertise_service(&service("svc1", 9999)).unwrap();
        assert!(next_spec(&mut rx).await.is_some());

        advertiser.stop_advertising();
        assert_eq!(network.service_count(), 0);

        advertiser.advertise_service(&service("svc1", 9999)).unwrap();
        assert!(next_spec(&mut rx).await.is_some());
    }

    #[tokio::test]
    async fn test_restarted_discovery_finds_known_service() {
        let network = MemoryNetwork::new();
        let advertiser = directory(&network);
        advertiser.advertise_service(&service("svc1", 9999)).unwrap();

        let browser = directory(&network);
        let mut first = browser.discover(ServiceQuery::new(echo())).unwrap();
        assert!(next_spec(&mut first).await.is_some());

        for _ in 0..3 {
            let mut rx = browser.discover(ServiceQuery::new(echo())).unwrap();
            let spec = next_spec(&mut rx).await.unwrap();
            assert_eq!(spec.name(), Some("svc1"));
        }

        // The replaced browse task is gone, so its channel closes
        let closed = tokio::time::timeout(Duration::from_secs(1), first.recv()).await;
        assert_eq!(closed.ok(), Some(None));
        assert!(browser.is_discovering());
    }

    #[tokio::test]
    async fn test_changed_events_are_ignored() {
        let network = MemoryNetwork::new();
        let browser = directory(&network);
        let mut rx = browser.discover(ServiceQuery::new(echo())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        network.report_changed(&echo(), DiscoveryRecord::new("svc1", 9999, vec!["10.0.0.5".into()]));
        assert!(next_spec(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_unnamed_spec_is_not_advertisable() {
        let network = MemoryNetwork::new();
        let dir = directory(&network);
        let spec = ServiceSpec::builder(echo())
            .port(9999)
            .address("10.0.0.1")
            .advertise(false, false)
            .build()
            .unwrap();

        let err = dir.advertise_service(&spec).unwrap_err();
        assert!(matches!(err, DiscoveryError::NotAdvertisable(_)));
    }

    #[tokio::test]
    async fn test_hostname_resolved_before_advertising() {
        let network = MemoryNetwork::new();
        let dir = directory(&network);
        let spec = ServiceSpec::builder(echo())
            .name("svc1")
            .port(9999)
            .address("localhost")
            .build()
            .unwrap();

        dir.advertise_service(&spec).unwrap();

        let mut stream = network.browse(&echo()).unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap();
        match event {
            Some(BrowseEvent::Up(record)) => {
                assert_eq!(record.addresses, vec!["127.0.0.1"]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
