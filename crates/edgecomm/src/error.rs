//! Error types for the client/service facades and orchestration

use edgecomm_core::{CommError, SpecError};
use edgecomm_discovery::DiscoveryError;
use edgecomm_plugin_api::PluginError;
use thiserror::Error;

/// Result type alias for facade operations
pub type Result<T> = std::result::Result<T, FacadeError>;

/// Errors surfaced by [`Client`](crate::Client), [`Service`](crate::Service)
/// and [`CommContext`](crate::CommContext).
#[derive(Debug, Error)]
pub enum FacadeError {
    /// No usable backend for the plugin named by the spec's type
    #[error("Communication backend '{plugin}' unavailable: {reason}")]
    CommBackendUnavailable { plugin: String, reason: String },

    /// The client has no backend; see [`Client::is_ready`](crate::Client::is_ready)
    #[error("Client for '{plugin}' is not connected to a communication backend")]
    Inert { plugin: String },

    /// Plugin loading or validation failed
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Advertisement or discovery failed
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Invalid spec or query
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] CommError),

    /// Transport I/O failed
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_message() {
        let err = FacadeError::CommBackendUnavailable {
            plugin: "zmqreqrep".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Communication backend 'zmqreqrep' unavailable: not found"
        );
    }

    #[test]
    fn test_conversions() {
        let err: FacadeError = PluginError::NotFound("x".to_string()).into();
        assert!(matches!(err, FacadeError::Plugin(PluginError::NotFound(_))));

        let err: FacadeError = anyhow::anyhow!("broken pipe").into();
        assert_eq!(err.to_string(), "broken pipe");
    }
}
