use thiserror::Error;

/// Plugin system error types
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Could not find plugin '{0}' in any of the configured plugin directories")]
    NotFound(String),

    #[error("Plugin '{plugin}' has no {role} backend")]
    RoleNotFound { plugin: String, role: String },

    #[error("Plugin file '{plugin_file}' does not define required {kind} '{member}'")]
    ContractViolation {
        plugin_file: String,
        kind: MemberKind,
        member: String,
    },

    #[error("Could not find plugin interface file '{interface}.json' required by plugin '{plugin}' in any of the configured plugin interface directories")]
    InterfaceNotFound { interface: String, plugin: String },

    #[error("Plugin file '{plugin_file}' names unknown transport '{transport}'")]
    UnknownTransport {
        plugin_file: String,
        transport: String,
    },

    #[error("Invalid plugin file '{path}': {reason}")]
    InvalidPluginFile { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Kind of contract member a backend failed to declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Property,
    Function,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberKind::Property => f.write_str("property"),
            MemberKind::Function => f.write_str("function"),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
