// edgecomm Plugin API
// Transport traits, capability contracts and the plugin registry

pub mod catalog;
pub mod contract;
pub mod error;
pub mod inbox;
pub mod registry;
pub mod transport;

pub use catalog::{TransportCatalog, TransportFactory};
pub use contract::{BackendDescriptor, InterfaceDescriptor, Role};
pub use error::{MemberKind, PluginError, PluginResult};
pub use inbox::Inbox;
pub use registry::{LoadedBackend, PluginRegistry};
pub use transport::{
    ClientAction, ClientTransport, EventKind, MessageContext, MessageHandler, PeerHandle,
    ServiceTransport,
};

/// Plugin API version
pub const PLUGIN_API_VERSION: &str = "0.2.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version() {
        assert_eq!(PLUGIN_API_VERSION, "0.2.0");
    }
}
