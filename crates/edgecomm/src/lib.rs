//! # edgecomm
//!
//! Advertise services on the local network, discover them by query and talk
//! to them through pluggable transports.
//!
//! ## Example
//!
//! ```no_run
//! use edgecomm::{builtin_config, Client, CommContext};
//! use edgecomm::core::{ServiceQuery, ServiceSpec, ServiceType};
//! use edgecomm::plugin::{EventKind, MessageContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let context = CommContext::new(builtin_config())?;
//!
//!     let spec = ServiceSpec::builder(ServiceType::new("echo", "tcp"))
//!         .name("svc1")
//!         .port(9999)
//!         .build()?;
//!     let _service = context.create_service(spec).await?;
//!
//!     let query = ServiceQuery::new(ServiceType::new("echo", "tcp")).with_name("svc1");
//!     let discovery = context
//!         .create_client(
//!             query,
//!             |client: Client| {
//!                 tokio::spawn(async move {
//!                     client
//!                         .set_received_message_handler(|_, msg, ctx| {
//!                             if ctx.event == EventKind::Message {
//!                                 println!("{}", String::from_utf8_lossy(&msg));
//!                             }
//!                         })
//!                         .ok();
//!                     client.send("hello", MessageContext::message()).await.ok();
//!                 });
//!             },
//!             None,
//!         )
//!         .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     discovery.stop();
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod service;

pub use client::Client;
pub use context::{
    builtin_config, builtin_interface_dir, builtin_plugin_dir, ClientDiscovery, CommContext,
    ServiceFilter, ServiceTarget,
};
pub use error::{FacadeError, Result};
pub use service::Service;

pub use edgecomm_core as core;
pub use edgecomm_discovery as discovery;
pub use edgecomm_plugin_api as plugin;
pub use edgecomm_transport as transport;
