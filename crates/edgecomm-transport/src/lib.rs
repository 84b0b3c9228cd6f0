//! Built-in edgecomm transports
//!
//! TCP transports with length-delimited framing:
//!
//! - `tcp-reqrep`: request/reply ([`ReqRepFactory`])
//! - `tcp-pubsub`: publish/subscribe with prefix topic matching
//!   ([`PubSubFactory`])
//! - `tcp-broker`: pub/sub with a client handshake and acknowledgements
//!   ([`BrokerFactory`])
//!
//! ```
//! use edgecomm_plugin_api::TransportCatalog;
//!
//! let catalog = TransportCatalog::new();
//! edgecomm_transport::register_builtin(&catalog);
//! assert_eq!(catalog.ids(), vec!["tcp-broker", "tcp-pubsub", "tcp-reqrep"]);
//! ```

pub mod broker;
pub mod codec;
pub mod conn;
pub mod pubsub;
pub mod reqrep;

use edgecomm_plugin_api::TransportCatalog;
use std::sync::Arc;

pub use broker::{BrokerClient, BrokerFactory, BrokerService, BROKER_TRANSPORT};
pub use codec::{AckKind, Frame, FrameCodec};
pub use pubsub::{PubSubClient, PubSubFactory, PubSubService, PUBSUB_TRANSPORT};
pub use reqrep::{ReqRepClient, ReqRepFactory, ReqRepService, REQREP_TRANSPORT};

/// Registers every built-in transport in `catalog`.
pub fn register_builtin(catalog: &TransportCatalog) {
    catalog.register(Arc::new(ReqRepFactory));
    catalog.register(Arc::new(PubSubFactory));
    catalog.register(Arc::new(BrokerFactory));
}

/// A catalog holding only the built-in transports.
pub fn builtin_catalog() -> Arc<TransportCatalog> {
    let catalog = TransportCatalog::new();
    register_builtin(&catalog);
    Arc::new(catalog)
}
