//! Orchestration: create-and-advertise a service, discover-and-connect a
//! client
//!
//! A [`CommContext`] owns the plugin registry and the discovery backend that
//! every directory it creates shares.

use edgecomm_core::config::DiscoveryBackendKind;
use edgecomm_core::{CommConfig, ServiceQuery, ServiceSpec};
use edgecomm_discovery::{DiscoveryBackend, MdnsBackend, MemoryNetwork, ServiceDirectory};
use edgecomm_plugin_api::PluginRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::Result;
use crate::service::Service;

/// Plugin directory shipped with this crate.
pub fn builtin_plugin_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("plugins")
}

/// Interface descriptor directory shipped with this crate.
pub fn builtin_interface_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("plugin-interfaces")
}

/// Default configuration extended with the shipped plugins and interfaces.
pub fn builtin_config() -> CommConfig {
    CommConfig::default().with_builtin_paths(builtin_plugin_dir(), builtin_interface_dir())
}

/// What [`CommContext::create_client`] connects to.
#[derive(Debug, Clone)]
pub enum ServiceTarget {
    /// Discover services matching the query
    Query(ServiceQuery),
    /// Connect directly when the spec carries an address, otherwise discover
    /// services matching its query part
    Spec(ServiceSpec),
}

impl From<ServiceQuery> for ServiceTarget {
    fn from(query: ServiceQuery) -> Self {
        Self::Query(query)
    }
}

impl From<ServiceSpec> for ServiceTarget {
    fn from(spec: ServiceSpec) -> Self {
        Self::Spec(spec)
    }
}

/// Accepts or rejects a discovered service before a client is built for it.
pub type ServiceFilter = Box<dyn Fn(&ServiceSpec) -> bool + Send + Sync>;

/// Handle on a running [`CommContext::create_client`] discovery.
///
/// Discovery keeps running until [`stop`](Self::stop) is called; dropping
/// the handle does not stop it.
#[derive(Debug)]
pub struct ClientDiscovery {
    directory: Option<Arc<ServiceDirectory>>,
    task: Option<JoinHandle<()>>,
}

impl ClientDiscovery {
    fn direct() -> Self {
        Self {
            directory: None,
            task: None,
        }
    }

    /// Directory doing the browsing; `None` for a direct connection.
    pub fn directory(&self) -> Option<&Arc<ServiceDirectory>> {
        self.directory.as_ref()
    }

    /// Whether services are still being looked for.
    pub fn is_discovering(&self) -> bool {
        self.directory
            .as_ref()
            .is_some_and(|directory| directory.is_discovering())
    }

    /// Stops discovery. Services found but not yet handed over are dropped.
    pub fn stop(&self) {
        if let Some(directory) = &self.directory {
            directory.stop_discovering();
        }
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// Entry point for creating services and clients.
pub struct CommContext {
    config: CommConfig,
    registry: Arc<PluginRegistry>,
    backend: Arc<dyn DiscoveryBackend>,
    own_addresses: Option<Vec<String>>,
}

impl CommContext {
    /// Creates a context driving the discovery backend named in `config`.
    pub fn new(config: CommConfig) -> Result<Self> {
        let backend: Arc<dyn DiscoveryBackend> = match config.discovery.backend {
            DiscoveryBackendKind::Mdns => {
                Arc::new(MdnsBackend::with_domain(config.discovery.domain.clone())?)
            }
            DiscoveryBackendKind::Memory => Arc::new(MemoryNetwork::new()),
        };
        Self::with_backend(config, backend)
    }

    /// Creates a context on an explicit discovery backend.
    pub fn with_backend(config: CommConfig, backend: Arc<dyn DiscoveryBackend>) -> Result<Self> {
        config.validate()?;
        let registry = PluginRegistry::new(
            config.plugins.clone(),
            edgecomm_transport::builtin_catalog(),
        );

        info!(
            plugin_dirs = ?config.plugins.dir_paths,
            backend = ?config.discovery.backend,
            "Communication context ready"
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            backend,
            own_addresses: None,
        })
    }

    /// Fixes the addresses directories treat as this host's instead of
    /// reading them from the network interfaces.
    pub fn with_own_addresses(mut self, addresses: Vec<String>) -> Self {
        self.own_addresses = Some(addresses);
        self
    }

    pub fn config(&self) -> &CommConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// A new directory on this context's discovery backend.
    pub fn create_directory(&self) -> Arc<ServiceDirectory> {
        let directory = match &self.own_addresses {
            Some(addresses) => {
                ServiceDirectory::with_own_addresses(self.backend.clone(), addresses.clone())
            }
            None => ServiceDirectory::new(self.backend.clone()),
        };
        Arc::new(directory)
    }

    /// Opens a service for `spec` and, unless the spec opts out, advertises
    /// it on the local network.
    ///
    /// Returns once the backend is open; advertising continues in the
    /// background and its failures are only logged. Must be called from
    /// within a tokio runtime.
    pub async fn create_service(&self, spec: ServiceSpec) -> Result<Arc<Service>> {
        let service = Arc::new(Service::new(spec, &self.registry).await?);
        let spec = service.spec();

        if spec.advertise_cloud() {
            warn!(name = ?spec.name(), "Cloud advertising is not supported; ignoring");
        }

        if spec.advertise_locally() {
            let directory = self.create_directory();
            match directory.advertise_service(spec) {
                Ok(()) => service.set_directory(directory),
                Err(e) => warn!(name = ?spec.name(), error = %e, "Failed to advertise service"),
            }
        } else {
            debug!(name = ?spec.name(), "Local advertising disabled");
        }

        Ok(service)
    }

    /// Builds clients for `target`.
    ///
    /// A spec with an address is connected to directly and `on_created` is
    /// called once before this returns. Anything else starts a discovery;
    /// every discovered service accepted by `filter` gets its own client
    /// handed to `on_created`, until the returned handle is stopped. Must be
    /// called from within a tokio runtime.
    pub async fn create_client<F>(
        &self,
        target: impl Into<ServiceTarget>,
        mut on_created: F,
        filter: Option<ServiceFilter>,
    ) -> Result<ClientDiscovery>
    where
        F: FnMut(Client) + Send + 'static,
    {
        let query = match target.into() {
            ServiceTarget::Spec(spec) if spec.is_direct() => {
                debug!(
                    address = ?spec.address(),
                    port = spec.port(),
                    "Connecting directly, skipping discovery"
                );
                on_created(Client::new(spec, &self.registry, None).await);
                return Ok(ClientDiscovery::direct());
            }
            ServiceTarget::Spec(spec) => spec.query().clone(),
            ServiceTarget::Query(query) => query,
        };

        let directory = self.create_directory();
        let mut found = directory.discover(query)?;

        let registry = self.registry.clone();
        let owner = directory.clone();
        let task = tokio::spawn(async move {
            while let Some(spec) = found.recv().await {
                if let Some(filter) = &filter {
                    if !filter(&spec) {
                        debug!(name = ?spec.name(), "Discovered service rejected by filter");
                        continue;
                    }
                }
                let client = Client::new(spec, &registry, Some(owner.clone())).await;
                on_created(client);
            }
        });

        Ok(ClientDiscovery {
            directory: Some(directory),
            task: Some(task),
        })
    }
}
