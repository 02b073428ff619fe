//! Capability providers and the registry selecting one per process.
//!
//! The rest of the crate depends only on the [`Provider`] trait. Concrete
//! backends are registered under a name together with a factory; the builder
//! resolves exactly one factory, by the configured provider name, and invokes
//! it once with an [`InitConfig`].

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Capability surface the node lifecycle depends on.
#[cfg_attr(test, mockall::automock)]
pub trait Provider: Send + Sync {
    /// Reports whether the backend is still reachable.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the backend cannot be reached.
    fn ping(&self) -> Result<(), ProviderError>;

    /// Releases backend resources once the node stops.
    fn shutdown(&self) {}
}

/// Factory materialising a provider from its init configuration.
pub type ProviderFactory =
    Box<dyn FnOnce(&InitConfig) -> Result<Arc<dyn Provider>, ProviderError> + Send>;

/// Error reported by a provider or its factory.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Builds an error without an underlying source.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Builds an error wrapping an underlying source.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable message describing the failure.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Handle onto the orchestrator resources visible to this node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceManager {
    namespace: Option<String>,
}

impl ResourceManager {
    /// Scopes the handle to `namespace`, or to every namespace when `None`.
    #[must_use]
    pub const fn new(namespace: Option<String>) -> Self {
        Self { namespace }
    }

    /// Namespace the node is restricted to, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

/// Read-only inputs handed to a provider factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConfig {
    /// Name the node registers under.
    pub node_name: String,
    /// Operating system advertised by the node.
    pub operating_system: String,
    /// Address other components use to reach the node.
    pub internal_ip: Option<IpAddr>,
    /// Port served by the node daemon.
    pub daemon_port: u16,
    /// Orchestrator resources visible to the node.
    pub resource_manager: ResourceManager,
    /// Provider-specific configuration file.
    pub config_path: Option<PathBuf>,
    /// DNS domain of the cluster.
    pub cluster_domain: String,
}

impl InitConfig {
    /// Provider configuration path, if one was supplied.
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

/// Errors raised by the provider registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A provider with the same name was already registered.
    #[error("provider '{name}' is already registered")]
    Duplicate {
        /// Name registered twice.
        name: String,
    },
    /// No provider name was configured.
    #[error("no provider selected; available providers: {}", .available.join(", "))]
    Missing {
        /// Registered provider names.
        available: Vec<String>,
    },
    /// The configured provider name has no registration.
    #[error("provider '{name}' not found; available providers: {}", .available.join(", "))]
    Unknown {
        /// Requested provider name.
        name: String,
        /// Registered provider names.
        available: Vec<String>,
    },
}

/// Registry of provider factories keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when `name` is already taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ProviderFactory,
    ) -> Result<(), RegistryError> {
        let key = name.into();
        if self.factories.contains_key(&key) {
            return Err(RegistryError::Duplicate { name: key });
        }
        self.factories.insert(key, factory);
        Ok(())
    }

    /// Removes and returns the factory registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Missing`] for an empty name and
    /// [`RegistryError::Unknown`] when nothing is registered under it.
    pub fn resolve(&mut self, name: &str) -> Result<ProviderFactory, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::Missing {
                available: self.names(),
            });
        }
        self.factories
            .remove(name)
            .ok_or_else(|| RegistryError::Unknown {
                name: name.to_owned(),
                available: self.names(),
            })
    }

    /// Registered provider names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Returns `true` when a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
