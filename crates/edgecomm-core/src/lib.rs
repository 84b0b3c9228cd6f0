//! # edgecomm core
//!
//! Value types, error handling and configuration shared by every edgecomm
//! crate.
//!
//! - **Spec model**: [`ServiceQuery`] describes the kind of service wanted,
//!   [`ServiceSpec`] a concrete service (query plus port, address,
//!   advertisement policy and transport parameters). Both validate at
//!   construction.
//! - **Errors**: `thiserror` enums for every failure mode of parsing and
//!   configuration.
//! - **Configuration**: plugin search paths, role file suffixes, discovery
//!   backend selection and logging, loaded through the `config` crate.
//!
//! ## Example
//!
//! ```
//! use edgecomm_core::spec::{ServiceSpec, ServiceType};
//!
//! let spec = ServiceSpec::builder(ServiceType::new("echo", "tcp"))
//!     .name("svc1")
//!     .port(9999)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(spec.service_type().to_service_string(), "_echo._tcp.local.");
//! ```

pub mod config;
pub mod error;
pub mod spec;

// Re-export commonly used types for convenience
pub use config::CommConfig;
pub use error::{CommError, ConfigError, Result, SpecError};
pub use spec::{Advertise, ServiceQuery, ServiceSpec, ServiceType, SpecSource};
