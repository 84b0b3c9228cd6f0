//! Service facade

use bytes::Bytes;
use edgecomm_core::ServiceSpec;
use edgecomm_discovery::ServiceDirectory;
use edgecomm_plugin_api::{MessageContext, PeerHandle, PluginRegistry, ServiceTransport};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;

/// A bound service backend plus the directory advertising it.
///
/// Unlike [`Client`](crate::Client), a service whose backend cannot be
/// loaded is never constructed.
pub struct Service {
    spec: ServiceSpec,
    transport: Arc<dyn ServiceTransport>,
    directory: Mutex<Option<Arc<ServiceDirectory>>>,
    closed: AtomicBool,
}

impl Service {
    /// Loads the service backend named by the spec's type and opens it.
    pub async fn new(spec: ServiceSpec, registry: &PluginRegistry) -> Result<Self> {
        let backend = registry.get_service_plugin(&spec.service_type().name)?;
        let transport = backend.factory().bind(&spec).await?;

        info!(
            plugin = backend.plugin(),
            transport = backend.transport(),
            name = ?spec.name(),
            port = spec.port(),
            "Service opened"
        );

        Ok(Self {
            spec,
            transport,
            directory: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Ties an advertising directory to this service; [`done`](Self::done)
    /// withdraws its announcements.
    pub fn set_directory(&self, directory: Arc<ServiceDirectory>) {
        *self.directory.lock() = Some(directory);
    }

    pub fn directory(&self) -> Option<Arc<ServiceDirectory>> {
        self.directory.lock().clone()
    }

    /// Address the backend is listening on, when it listens at all.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub async fn send_to(
        &self,
        recipient: &PeerHandle,
        message: impl Into<Bytes>,
        context: MessageContext,
    ) -> Result<()> {
        self.transport
            .send_to(recipient, message.into(), context)
            .await?;
        Ok(())
    }

    pub async fn publish(&self, message: impl Into<Bytes>, context: MessageContext) -> Result<()> {
        self.transport.publish(message.into(), context).await?;
        Ok(())
    }

    pub async fn manage_client(&self, client: &PeerHandle, context: MessageContext) -> Result<()> {
        self.transport.manage_client(client, context).await?;
        Ok(())
    }

    pub fn set_received_message_handler<F>(&self, handler: F)
    where
        F: Fn(PeerHandle, Bytes, MessageContext) + Send + Sync + 'static,
    {
        self.transport.set_received_message_handler(Arc::new(handler));
    }

    /// Stops advertising and closes the backend. Idempotent.
    pub async fn done(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let directory = self.directory.lock().take();
        if let Some(directory) = directory {
            directory.stop_advertising();
        }
        self.transport.done().await;
        debug!(name = ?self.spec.name(), "Service closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("spec", &self.spec)
            .field("local_addr", &self.local_addr())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FacadeError;
    use edgecomm_core::config::PluginConfig;
    use edgecomm_core::ServiceType;
    use edgecomm_discovery::MemoryNetwork;
    use edgecomm_plugin_api::PluginError;

    fn builtin_registry() -> PluginRegistry {
        let config = edgecomm_core::CommConfig::default().with_builtin_paths(
            crate::context::builtin_plugin_dir(),
            crate::context::builtin_interface_dir(),
        );
        PluginRegistry::new(config.plugins, edgecomm_transport::builtin_catalog())
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|l| l.local_addr())
            .map(|a| a.port())
            .unwrap()
    }

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec::builder(ServiceType::new(name, "tcp"))
            .name("svc1")
            .address("127.0.0.1")
            .port(free_port())
            .advertise(false, false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_plugin_is_a_hard_error() {
        let registry = PluginRegistry::new(
            PluginConfig::default(),
            edgecomm_transport::builtin_catalog(),
        );
        let err = Service::new(spec("echo"), &registry).await.unwrap_err();
        assert!(matches!(err, FacadeError::Plugin(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_done_withdraws_announcements() {
        let registry = builtin_registry();
        let service = Service::new(spec("echo"), &registry).await.unwrap();
        assert!(service.local_addr().is_some());

        let network = MemoryNetwork::new();
        let directory = Arc::new(ServiceDirectory::with_own_addresses(
            Arc::new(network.clone()),
            vec![],
        ));
        let advertised = ServiceSpec::builder(ServiceType::new("echo", "tcp"))
            .name("svc1")
            .port(service.local_addr().unwrap().port())
            .build()
            .unwrap();
        directory.advertise_service(&advertised).unwrap();
        service.set_directory(directory.clone());
        assert_eq!(network.service_count(), 1);

        service.done().await;
        service.done().await;
        assert!(service.is_closed());
        assert!(service.directory().is_none());
        assert_eq!(directory.advertisement_count(), 0);
        assert_eq!(network.service_count(), 0);
    }
}
