//! Error types for the service directory

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur during advertisement and discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// mDNS service daemon failed to initialize
    #[error("Failed to initialize mDNS daemon: {0}")]
    MdnsInitFailed(String),

    /// Failed to browse for services
    #[error("Failed to browse for service type '{service_type}': {reason}")]
    BrowseFailed { service_type: String, reason: String },

    /// Failed to register/announce a service
    #[error("Failed to register service '{service_name}': {reason}")]
    RegisterFailed {
        service_name: String,
        reason: String,
    },

    /// Address resolution failed
    #[error("Failed to resolve address '{address}': {reason}")]
    ResolutionFailed { address: String, reason: String },

    /// The spec cannot be advertised
    #[error("Cannot advertise service: {0}")]
    NotAdvertisable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::RegisterFailed {
            service_name: "svc1".to_string(),
            reason: "daemon stopped".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to register service 'svc1': daemon stopped"
        );

        let err = DiscoveryError::ResolutionFailed {
            address: "printer.local".to_string(),
            reason: "no IPv4 address".to_string(),
        };
        assert!(err.to_string().contains("printer.local"));
    }
}
