//! Client facade
//!
//! Binds a spec to the client backend of the plugin named by the spec's
//! type. A client whose backend cannot be loaded or connected stays inert:
//! construction succeeds, [`Client::is_ready`] reports `false` and every
//! messaging call fails with [`FacadeError::Inert`].

use bytes::Bytes;
use edgecomm_core::ServiceSpec;
use edgecomm_discovery::ServiceDirectory;
use edgecomm_plugin_api::{ClientTransport, MessageContext, PeerHandle, PluginRegistry};
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{FacadeError, Result};

pub struct Client {
    spec: ServiceSpec,
    directory: Option<Arc<ServiceDirectory>>,
    transport: Option<Arc<dyn ClientTransport>>,
}

impl Client {
    /// Loads the client backend for `spec` and connects it.
    ///
    /// Failures are logged as [`FacadeError::CommBackendUnavailable`] and
    /// produce an inert client.
    pub async fn new(
        spec: ServiceSpec,
        registry: &PluginRegistry,
        directory: Option<Arc<ServiceDirectory>>,
    ) -> Self {
        let plugin = spec.service_type().name.clone();

        let transport = match Self::open(&spec, registry).await {
            Ok(transport) => {
                info!(plugin = %plugin, name = ?spec.name(), "Client connected");
                Some(transport)
            }
            Err(reason) => {
                let err = FacadeError::CommBackendUnavailable {
                    plugin: plugin.clone(),
                    reason,
                };
                error!(error = %err, "Client left without a communication backend");
                None
            }
        };

        Self {
            spec,
            directory,
            transport,
        }
    }

    async fn open(
        spec: &ServiceSpec,
        registry: &PluginRegistry,
    ) -> std::result::Result<Arc<dyn ClientTransport>, String> {
        let backend = registry
            .get_client_plugin(&spec.service_type().name)
            .map_err(|e| e.to_string())?;
        backend
            .factory()
            .connect(spec)
            .await
            .map_err(|e| format!("{:#}", e))
    }

    /// Whether a backend is connected.
    pub fn is_ready(&self) -> bool {
        self.transport.is_some()
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    /// Directory that discovered the service, if any.
    pub fn directory(&self) -> Option<&Arc<ServiceDirectory>> {
        self.directory.as_ref()
    }

    fn transport(&self) -> Result<&Arc<dyn ClientTransport>> {
        self.transport.as_ref().ok_or_else(|| FacadeError::Inert {
            plugin: self.spec.service_type().name.clone(),
        })
    }

    pub async fn send(&self, message: impl Into<Bytes>, context: MessageContext) -> Result<()> {
        self.transport()?.send(message.into(), context).await?;
        Ok(())
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        self.transport()?.subscribe(topic).await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<()> {
        self.transport()?.unsubscribe(topic).await?;
        Ok(())
    }

    /// Installs the handler for messages and events from the service.
    pub fn set_received_message_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(PeerHandle, Bytes, MessageContext) + Send + Sync + 'static,
    {
        self.transport()?
            .set_received_message_handler(Arc::new(handler));
        Ok(())
    }

    /// Closes the connection. Idempotent; a no-op on an inert client.
    pub async fn done(&self) {
        if let Some(transport) = &self.transport {
            transport.done().await;
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("spec", &self.spec)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecomm_core::config::PluginConfig;
    use edgecomm_core::ServiceType;
    use edgecomm_plugin_api::TransportCatalog;

    #[tokio::test]
    async fn test_missing_plugin_leaves_client_inert() {
        let registry = PluginRegistry::new(PluginConfig::default(), Arc::new(TransportCatalog::new()));
        let spec = ServiceSpec::builder(ServiceType::new("zmqreqrep", "tcp"))
            .name("svc1")
            .address("127.0.0.1")
            .port(9999)
            .build()
            .unwrap();

        let client = Client::new(spec, &registry, None).await;
        assert!(!client.is_ready());
        assert!(client.directory().is_none());

        let err = client
            .send("hello", MessageContext::message())
            .await
            .unwrap_err();
        assert!(matches!(err, FacadeError::Inert { ref plugin } if plugin == "zmqreqrep"));
        assert!(client.set_received_message_handler(|_, _, _| {}).is_err());

        // done on an inert client is a no-op
        client.done().await;
    }
}
