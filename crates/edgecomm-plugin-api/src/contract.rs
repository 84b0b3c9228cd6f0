//! Capability contracts
//!
//! Interface descriptors are JSON files listing the properties and functions
//! a backend must provide. Every backend declares what it provides in a
//! [`BackendDescriptor`]; the registry checks the declaration against the
//! universal super-interface and against the interface the backend names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{MemberKind, PluginError, PluginResult};

/// Name of the client capability interface.
pub const CLIENT_INTERFACE: &str = "client-interface";

/// Name of the service capability interface.
pub const SERVICE_INTERFACE: &str = "service-interface";

/// Property every backend provides: the interface it adheres to.
pub const INTERFACE_PROPERTY: &str = "interface";

/// Which side of a plugin a backend implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Service,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Service => f.write_str("service"),
        }
    }
}

/// Required members, as read from `<interface>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub functions: Vec<String>,
}

impl InterfaceDescriptor {
    /// Members every backend must provide when no super-interface file is
    /// configured.
    pub fn universal() -> Self {
        Self {
            properties: vec![INTERFACE_PROPERTY.to_string()],
            functions: vec!["setReceivedMessageHandler".to_string(), "done".to_string()],
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> PluginResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Members a backend provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Interface the backend adheres to; empty when undeclared
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub functions: Vec<String>,
}

impl BackendDescriptor {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            properties: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Full client capability set.
    pub fn client() -> Self {
        Self::new(CLIENT_INTERFACE).with_functions([
            "send",
            "subscribe",
            "unsubscribe",
            "setReceivedMessageHandler",
            "done",
        ])
    }

    /// Full service capability set.
    pub fn service() -> Self {
        Self::new(SERVICE_INTERFACE).with_functions([
            "sendTo",
            "publish",
            "manageClient",
            "setReceivedMessageHandler",
            "done",
        ])
    }

    pub fn with_functions<I, S>(mut self, functions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functions.extend(functions.into_iter().map(Into::into));
        self
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.extend(properties.into_iter().map(Into::into));
        self
    }

    pub fn without_function(mut self, function: &str) -> Self {
        self.functions.retain(|f| f != function);
        self
    }

    fn has_property(&self, name: &str) -> bool {
        if name == INTERFACE_PROPERTY && !self.interface.is_empty() {
            return true;
        }
        self.properties.iter().any(|p| p == name)
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f == name)
    }

    /// Checks that every required property and function is declared.
    /// Properties are checked first; the error names the first missing
    /// member.
    pub fn validate(&self, plugin_file: &str, required: &InterfaceDescriptor) -> PluginResult<()> {
        if let Some(missing) = required.properties.iter().find(|p| !self.has_property(p)) {
            return Err(PluginError::ContractViolation {
                plugin_file: plugin_file.to_string(),
                kind: MemberKind::Property,
                member: missing.clone(),
            });
        }

        if let Some(missing) = required.functions.iter().find(|f| !self.has_function(f)) {
            return Err(PluginError::ContractViolation {
                plugin_file: plugin_file.to_string(),
                kind: MemberKind::Function,
                member: missing.clone(),
            });
        }

        Ok(())
    }
}
