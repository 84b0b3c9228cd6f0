//! # edgecomm discovery
//!
//! Service advertisement and discovery for edgecomm.
//!
//! ## Features
//!
//! - **Pluggable backends**: multicast DNS (`mdns-sd`) for real networks, an
//!   in-process [`MemoryNetwork`] for tests and single-process setups
//! - **Address selection**: per-instance record cache that reports each
//!   service once and picks the address closest to this host
//! - **Query filtering**: name pattern or property match against
//!   [`ServiceQuery`](edgecomm_core::ServiceQuery)
//!
//! ## Example
//!
//! ```no_run
//! use edgecomm_core::{ServiceQuery, ServiceType};
//! use edgecomm_discovery::{MdnsBackend, ServiceDirectory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = ServiceDirectory::new(Arc::new(MdnsBackend::new()?));
//!
//!     let mut found = directory.discover(ServiceQuery::new(ServiceType::new("echo", "tcp")))?;
//!     while let Some(spec) = found.recv().await {
//!         println!("{:?} at {:?}:{}", spec.name(), spec.address(), spec.port());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod directory;
pub mod error;
pub mod filter;
pub mod interfaces;
pub mod mdns;
pub mod memory;

pub use backend::{
    AdvertiseRequest, Advertisement, BrowseEvent, BrowseStream, DiscoveryBackend,
    DiscoveryRecord, InterfaceHint, StopGuard,
};
pub use directory::ServiceDirectory;
pub use error::{DiscoveryError, Result};
pub use filter::{RecordCache, LOOPBACK_MARKER};
pub use mdns::MdnsBackend;
pub use memory::MemoryNetwork;
