//! Error types for edgecomm.
//!
//! Spec and query validation failures are reported synchronously to whoever
//! constructs the value; they are never recovered internally.

use thiserror::Error;

/// Result type alias using CommError as the error type.
pub type Result<T> = std::result::Result<T, CommError>;

/// Top-level error type for the core crate.
#[derive(Debug, Error)]
pub enum CommError {
    /// Spec or query validation errors
    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while parsing a service query or service spec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    /// Source is not valid structured data (bad JSON, unreadable file)
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    /// A mandatory field is missing or a field has the wrong shape
    #[error("Invalid schema: {reason}")]
    InvalidSchema { reason: String },

    /// More than one subtype in the service type
    #[error("More than one subtype is not supported (got {count})")]
    TooManySubtypes { count: usize },

    /// Both `properties` and `txtRecord` were supplied
    #[error("Can't have both 'properties' and 'txtRecord' fields; they are the same thing")]
    ConflictingFields,

    /// A query carried an address or port
    #[error("A service query cannot contain an address or port number; use a service spec instead")]
    QueryCarriesConnectionInfo,

    /// Spec without a port
    #[error("Service spec must have a port number")]
    MissingPort,

    /// Port present but unusable
    #[error("Invalid port: {reason}")]
    InvalidPort { reason: String },

    /// Address is not a string
    #[error("Address must be a string (IPv4 address or hostname)")]
    InvalidAddressType,

    /// `advertise` block present but one of its flags is missing
    #[error("Missing boolean property 'advertise.{flag}'")]
    MissingAdvertiseFlag { flag: String },

    /// Spec needs a name under the naming rule
    #[error("Service spec name must be a non-empty string when the service is advertised or has no fixed address")]
    MissingName,
}

impl SpecError {
    /// Creates a malformed input error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            reason: reason.into(),
        }
    }

    /// Creates an invalid schema error.
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }

    /// Creates an invalid port error.
    pub fn port(reason: impl Into<String>) -> Self {
        Self::InvalidPort {
            reason: reason.into(),
        }
    }
}

/// Errors related to configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be loaded
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Configuration has an invalid format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// A field has an invalid value
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
