//! mDNS/DNS-SD backend built on `mdns-sd`

use edgecomm_core::spec::DEFAULT_DOMAIN;
use edgecomm_core::ServiceType;
use futures::StreamExt;
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent as MdnsEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{
    AdvertiseRequest, Advertisement, BrowseEvent, BrowseStream, DiscoveryBackend,
    DiscoveryRecord, InterfaceHint, StopGuard,
};
use crate::error::{DiscoveryError, Result};
use crate::interfaces::local_host_label;

/// How an [`InterfaceHint`] turns into an mDNS registration.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Registration {
    /// Address written into the record; empty when resolved automatically
    ip: String,
    addr_auto: bool,
    /// Interface the daemon must listen on
    interface: Option<Ipv4Addr>,
}

impl Registration {
    /// mdns-sd never opens a socket on loopback interfaces, so a loopback
    /// service is announced with the host's own addresses instead. Browsers
    /// on this host see one of their own addresses, which the directory maps
    /// back to 127.0.0.1.
    fn for_hint(hint: InterfaceHint) -> Self {
        match hint {
            InterfaceHint::Any | InterfaceHint::Loopback => Self {
                ip: String::new(),
                addr_auto: true,
                interface: None,
            },
            InterfaceHint::Address(ip) => Self {
                ip: ip.to_string(),
                addr_auto: false,
                interface: Some(ip),
            },
        }
    }
}

/// Announces and browses services over multicast DNS.
pub struct MdnsBackend {
    /// mDNS service daemon
    mdns: Arc<ServiceDaemon>,

    /// DNS-SD domain, usually `local.`
    domain: String,
}

impl MdnsBackend {
    /// Creates a backend for the default `local.` domain.
    pub fn new() -> Result<Self> {
        Self::with_domain(DEFAULT_DOMAIN)
    }

    pub fn with_domain(domain: impl Into<String>) -> Result<Self> {
        let mdns = ServiceDaemon::new().map_err(|e| {
            DiscoveryError::MdnsInitFailed(format!("Failed to create mDNS daemon: {}", e))
        })?;

        let domain = domain.into();
        info!(domain = %domain, "mDNS backend created");

        Ok(Self {
            mdns: Arc::new(mdns),
            domain,
        })
    }

    fn instance_name(fullname: &str, base_type: &str) -> String {
        fullname
            .strip_suffix(base_type)
            .map(|n| n.trim_end_matches('.'))
            .unwrap_or(fullname)
            .to_string()
    }

    /// Converts an mDNS browse event; events we do not report map to `None`.
    fn convert_event(event: MdnsEvent, base_type: &str) -> Option<BrowseEvent> {
        match event {
            MdnsEvent::ServiceResolved(info) => {
                debug!(
                    service = info.get_fullname(),
                    hostname = info.get_hostname(),
                    port = info.get_port(),
                    "Service resolved"
                );
                Some(BrowseEvent::Up(Self::convert_service_info(&info, base_type)))
            }

            MdnsEvent::ServiceRemoved(typ, fullname) => {
                debug!(service = fullname, typ = typ, "Service removed");
                Some(BrowseEvent::Down(DiscoveryRecord {
                    name: Some(Self::instance_name(&fullname, base_type)),
                    port: 0,
                    addresses: Vec::new(),
                    properties: HashMap::new(),
                }))
            }

            MdnsEvent::SearchStarted(typ) => {
                debug!(typ = typ, "Search started");
                None
            }

            MdnsEvent::SearchStopped(typ) => {
                debug!(typ = typ, "Search stopped");
                None
            }

            _ => None,
        }
    }

    fn convert_service_info(info: &ServiceInfo, base_type: &str) -> DiscoveryRecord {
        let mut addresses: Vec<String> = info
            .get_addresses()
            .iter()
            .filter_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4.to_string()),
                IpAddr::V6(_) => None,
            })
            .collect();
        addresses.sort();

        let properties = info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect();

        let name = Self::instance_name(info.get_fullname(), base_type);

        DiscoveryRecord {
            name: (!name.is_empty()).then_some(name),
            port: info.get_port(),
            addresses,
            properties,
        }
    }
}

impl DiscoveryBackend for MdnsBackend {
    fn advertise(&self, request: AdvertiseRequest) -> Result<Advertisement> {
        let ty_domain = request.service_type.to_service_string_in(&self.domain);
        let host_name = local_host_label();

        let registration = Registration::for_hint(request.interface);
        if request.interface == InterfaceHint::Loopback {
            debug!(
                instance = %request.name,
                "mDNS has no loopback socket, announcing on every interface"
            );
        }

        info!(
            instance = %request.name,
            service_type = %ty_domain,
            port = request.port,
            interface = ?request.interface,
            "Starting service announcement"
        );

        let register_failed = |e: mdns_sd::Error| DiscoveryError::RegisterFailed {
            service_name: request.name.clone(),
            reason: e.to_string(),
        };

        let mut service_info = ServiceInfo::new(
            &ty_domain,
            &request.name,
            &host_name,
            registration.ip.as_str(),
            request.port,
            request.attributes.clone(),
        )
        .map_err(register_failed)?;

        if registration.addr_auto {
            service_info = service_info.enable_addr_auto();
        }
        if let Some(ip) = registration.interface {
            if let Err(e) = self.mdns.enable_interface(IfKind::Addr(IpAddr::V4(ip))) {
                warn!(error = %e, ip = %ip, "Failed to enable interface for announcement");
            }
        }

        let fullname = service_info.get_fullname().to_string();
        self.mdns.register(service_info).map_err(register_failed)?;

        info!(service = %fullname, "Service announcement registered");

        let mdns = self.mdns.clone();
        let to_remove = fullname.clone();
        let guard = StopGuard::new(move || match mdns.unregister(&to_remove) {
            Ok(_) => debug!(service = %to_remove, "Service announcement withdrawn"),
            Err(e) => warn!(service = %to_remove, error = %e, "Failed to withdraw announcement"),
        });

        Ok(Advertisement::new(fullname, guard))
    }

    fn browse(&self, service_type: &ServiceType) -> Result<BrowseStream> {
        let service_string = service_type.to_service_string_in(&self.domain);
        let base_type = service_type.base_service_string_in(&self.domain);

        info!(service_type = %service_string, "Starting browser");

        let receiver = self
            .mdns
            .browse(&service_string)
            .map_err(|e| DiscoveryError::BrowseFailed {
                service_type: service_string.clone(),
                reason: e.to_string(),
            })?;

        let events = futures::stream::unfold(receiver, |receiver| async move {
            match receiver.recv_async().await {
                Ok(event) => Some((event, receiver)),
                Err(e) => {
                    debug!(error = %e, "mDNS browse channel closed");
                    None
                }
            }
        })
        .filter_map(move |event| {
            let converted = Self::convert_event(event, &base_type);
            async move { converted }
        })
        .boxed();

        let mdns = self.mdns.clone();
        let guard = StopGuard::new(move || {
            if let Err(e) = mdns.stop_browse(&service_string) {
                debug!(service_type = %service_string, error = %e, "Failed to stop browsing");
            }
        });

        Ok(BrowseStream::new(events, guard))
    }
}

impl Drop for MdnsBackend {
    fn drop(&mut self) {
        // Only the last handle shuts the daemon down; advertisement and
        // browse guards hold clones.
        if Arc::strong_count(&self.mdns) == 1 {
            if let Err(e) = self.mdns.shutdown() {
                debug!(error = %e, "mDNS daemon shutdown failed");
            }
        }
    }
}
