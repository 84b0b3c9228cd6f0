//! Common test utilities and helpers for integration tests

use edgecomm::discovery::MemoryNetwork;
use edgecomm::{builtin_config, CommContext};
use std::sync::Arc;

/// Reserve a free TCP port on the loopback interface
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("Failed to reserve a free port")
}

/// Context with the shipped plugins on an in-process discovery network.
///
/// Contexts created on the same network see each other's services.
pub fn memory_context(network: &MemoryNetwork) -> CommContext {
    CommContext::with_backend(builtin_config(), Arc::new(network.clone()))
        .expect("Failed to create communication context")
        .with_own_addresses(vec!["10.0.0.7".to_string()])
}
