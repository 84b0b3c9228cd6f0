//! Compiled transport backends, by id
//!
//! Plugin role files name a transport id; the catalog maps that id to the
//! factory that builds client and service instances.

use async_trait::async_trait;
use dashmap::DashMap;
use edgecomm_core::ServiceSpec;
use std::sync::Arc;

use crate::contract::{BackendDescriptor, Role};
use crate::transport::{ClientTransport, ServiceTransport};

/// Builds transport instances for a spec.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Transport id referenced from plugin role files.
    fn id(&self) -> &str;

    /// Members the backend provides in `role`.
    fn descriptor(&self, role: Role) -> BackendDescriptor {
        match role {
            Role::Client => BackendDescriptor::client(),
            Role::Service => BackendDescriptor::service(),
        }
    }

    /// Connects a client to the service described by `spec`.
    async fn connect(&self, spec: &ServiceSpec) -> anyhow::Result<Arc<dyn ClientTransport>>;

    /// Opens a service on `spec.port`.
    async fn bind(&self, spec: &ServiceSpec) -> anyhow::Result<Arc<dyn ServiceTransport>>;
}

/// Registered transport factories.
#[derive(Default)]
pub struct TransportCatalog {
    factories: DashMap<String, Arc<dyn TransportFactory>>,
}

impl TransportCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under its id, replacing any previous one.
    pub fn register(&self, factory: Arc<dyn TransportFactory>) {
        let id = factory.id().to_string();
        tracing::debug!(transport = %id, "Registered transport");
        self.factories.insert(id, factory);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn TransportFactory>> {
        self.factories.get(id).map(|f| f.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for TransportCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCatalog")
            .field("ids", &self.ids())
            .finish()
    }
}
