//! Plugin registry: locates, validates and caches communication backends
//!
//! A plugin is a directory `<search path>/<name>/` holding up to two role
//! files, `<name>-<client suffix>.json` and `<name>-<service suffix>.json`.
//! Each role file names the compiled transport that implements it:
//!
//! ```json
//! { "transport": "tcp-reqrep", "description": "Request/reply over TCP" }
//! ```

use dashmap::DashMap;
use edgecomm_core::config::PluginConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::{TransportCatalog, TransportFactory};
use crate::contract::{BackendDescriptor, InterfaceDescriptor, Role};
use crate::error::{PluginError, PluginResult};

#[derive(Debug, Deserialize)]
struct RoleFile {
    transport: String,
    #[serde(default)]
    description: Option<String>,
}

/// A validated backend for one role of a plugin.
#[derive(Clone)]
pub struct LoadedBackend {
    plugin: String,
    role: Role,
    path: PathBuf,
    description: Option<String>,
    descriptor: BackendDescriptor,
    factory: Arc<dyn TransportFactory>,
}

impl LoadedBackend {
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Role file the backend was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn transport(&self) -> &str {
        self.factory.id()
    }

    pub fn factory(&self) -> &Arc<dyn TransportFactory> {
        &self.factory
    }
}

impl std::fmt::Debug for LoadedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBackend")
            .field("plugin", &self.plugin)
            .field("role", &self.role)
            .field("path", &self.path)
            .field("transport", &self.factory.id())
            .finish()
    }
}

/// Loads plugins on demand and keeps the validated backends.
pub struct PluginRegistry {
    config: PluginConfig,
    catalog: Arc<TransportCatalog>,
    /// Backends per plugin name; an entry exists once the plugin was loaded,
    /// even if it had no role files
    loaded: DashMap<String, HashMap<Role, LoadedBackend>>,
    interfaces: DashMap<String, InterfaceDescriptor>,
}

impl PluginRegistry {
    pub fn new(config: PluginConfig, catalog: Arc<TransportCatalog>) -> Self {
        Self {
            config,
            catalog,
            loaded: DashMap::new(),
            interfaces: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<TransportCatalog> {
        &self.catalog
    }

    /// Loads and validates every role file of plugin `name`.
    ///
    /// Roles that are already loaded are skipped. A plugin directory without
    /// role files only produces a warning.
    pub fn load_plugin(&self, name: &str) -> PluginResult<()> {
        let plugin_dir = self.plugin_dir(name)?;
        tracing::info!(plugin = name, dir = %plugin_dir.display(), "Loading plugin");

        let roles = [
            (Role::Client, &self.config.file_suffixes.client),
            (Role::Service, &self.config.file_suffixes.service),
        ];

        let mut empty_plugin = true;
        for (role, suffix) in roles {
            let file_name = format!("{}-{}.json", name, suffix);
            let path = plugin_dir.join(&file_name);
            if !path.exists() {
                continue;
            }
            empty_plugin = false;

            if self.is_loaded(name, role) {
                tracing::info!(file = %file_name, "Plugin file already loaded. Skipping");
                continue;
            }

            let backend = self.load_role_file(name, role, &path, &file_name)?;
            tracing::info!(
                plugin = name,
                role = %role,
                transport = backend.transport(),
                "Successfully loaded plugin backend"
            );
            self.loaded
                .entry(name.to_string())
                .or_default()
                .insert(role, backend);
        }

        self.loaded.entry(name.to_string()).or_default();

        if empty_plugin {
            tracing::warn!(plugin = name, "No plugin files were found. Empty plugin directory?");
        }

        Ok(())
    }

    /// Client-side backend of plugin `name`, loading the plugin first if
    /// needed.
    pub fn get_client_plugin(&self, name: &str) -> PluginResult<LoadedBackend> {
        self.get(name, Role::Client)
    }

    /// Service-side backend of plugin `name`, loading the plugin first if
    /// needed.
    pub fn get_service_plugin(&self, name: &str) -> PluginResult<LoadedBackend> {
        self.get(name, Role::Service)
    }

    /// Loaded `(plugin, role)` pairs, sorted by plugin name.
    pub fn list_plugins(&self) -> Vec<(String, Role)> {
        let mut list: Vec<(String, Role)> = self
            .loaded
            .iter()
            .flat_map(|entry| {
                let name = entry.key().clone();
                entry
                    .value()
                    .keys()
                    .map(move |role| (name.clone(), *role))
                    .collect::<Vec<_>>()
            })
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0).then((a.1 as u8).cmp(&(b.1 as u8))));
        list
    }

    pub fn is_loaded(&self, name: &str, role: Role) -> bool {
        self.loaded
            .get(name)
            .is_some_and(|roles| roles.contains_key(&role))
    }

    fn get(&self, name: &str, role: Role) -> PluginResult<LoadedBackend> {
        if !self.loaded.contains_key(name) {
            self.load_plugin(name)?;
        }

        self.loaded
            .get(name)
            .and_then(|roles| roles.get(&role).cloned())
            .ok_or_else(|| PluginError::RoleNotFound {
                plugin: name.to_string(),
                role: role.to_string(),
            })
    }

    fn plugin_dir(&self, name: &str) -> PluginResult<PathBuf> {
        self.config
            .dir_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_dir())
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    fn load_role_file(
        &self,
        name: &str,
        role: Role,
        path: &Path,
        file_name: &str,
    ) -> PluginResult<LoadedBackend> {
        let raw = std::fs::read_to_string(path)?;
        let role_file: RoleFile =
            serde_json::from_str(&raw).map_err(|e| PluginError::InvalidPluginFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let factory =
            self.catalog
                .get(&role_file.transport)
                .ok_or_else(|| PluginError::UnknownTransport {
                    plugin_file: file_name.to_string(),
                    transport: role_file.transport.clone(),
                })?;

        let descriptor = factory.descriptor(role);

        // The super-interface has to pass first: it guarantees `interface`
        // is declared.
        descriptor.validate(file_name, &self.super_interface()?)?;
        let interface = self.interface(&descriptor.interface, name)?;
        descriptor.validate(file_name, &interface)?;

        Ok(LoadedBackend {
            plugin: name.to_string(),
            role,
            path: path.to_path_buf(),
            description: role_file.description,
            descriptor,
            factory,
        })
    }

    fn super_interface(&self) -> PluginResult<InterfaceDescriptor> {
        match &self.config.super_interface_file {
            Some(path) => InterfaceDescriptor::from_file(path),
            None => Ok(InterfaceDescriptor::universal()),
        }
    }

    fn interface(&self, interface: &str, plugin: &str) -> PluginResult<InterfaceDescriptor> {
        if let Some(cached) = self.interfaces.get(interface) {
            return Ok(cached.clone());
        }

        let path = self
            .config
            .interface_dir_paths
            .iter()
            .map(|dir| dir.join(format!("{}.json", interface)))
            .find(|path| path.is_file())
            .ok_or_else(|| PluginError::InterfaceNotFound {
                interface: interface.to_string(),
                plugin: plugin.to_string(),
            })?;

        let descriptor = InterfaceDescriptor::from_file(&path)?;
        self.interfaces
            .insert(interface.to_string(), descriptor.clone());
        Ok(descriptor)
    }
}
