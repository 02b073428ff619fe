//! Provider backed by a local CRI container runtime.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use node_cli::{InitConfig, Provider, ProviderError, ProviderFactory, ResourceManager};
use tracing::{debug, info};

/// Name the provider is registered under.
pub const PROVIDER_NAME: &str = "cri";
/// Environment variable naming the runtime socket.
pub const RUNTIME_ENDPOINT_ENV: &str = "CONTAINER_RUNTIME_ENDPOINT";
/// Runtime socket used when [`RUNTIME_ENDPOINT_ENV`] is unset.
pub const DEFAULT_RUNTIME_ENDPOINT: &str = "/run/containerd/containerd.sock";

const UNIX_SCHEME: &str = "unix://";
const PROVIDER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::provider");

/// Factory connecting to the runtime named by [`RUNTIME_ENDPOINT_ENV`].
#[must_use]
pub fn factory() -> ProviderFactory {
    Box::new(|config| {
        let endpoint = runtime_endpoint(env::var_os(RUNTIME_ENDPOINT_ENV));
        let provider = CriProvider::connect(config, endpoint)?;
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    })
}

/// Factory connecting to the runtime socket at `endpoint`.
#[must_use]
pub fn factory_for(endpoint: impl Into<PathBuf>) -> ProviderFactory {
    let socket = endpoint.into();
    Box::new(move |config| {
        let provider = CriProvider::connect(config, socket)?;
        Ok(Arc::new(provider) as Arc<dyn Provider>)
    })
}

/// Resolves the runtime socket from an optional endpoint value, accepting
/// both bare paths and `unix://` URLs.
#[must_use]
pub fn runtime_endpoint(value: Option<OsString>) -> PathBuf {
    let Some(raw) = value.filter(|raw| !raw.is_empty()) else {
        return PathBuf::from(DEFAULT_RUNTIME_ENDPOINT);
    };
    raw.to_str()
        .and_then(|text| text.strip_prefix(UNIX_SCHEME))
        .map_or_else(|| PathBuf::from(&raw), PathBuf::from)
}

/// Node capabilities served by a CRI runtime reachable over a Unix socket.
#[derive(Debug, Clone)]
pub struct CriProvider {
    endpoint: PathBuf,
    node_name: String,
    operating_system: String,
    daemon_port: u16,
    resource_manager: ResourceManager,
}

impl CriProvider {
    /// Connects to the runtime at `endpoint` on behalf of the node described
    /// by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the daemon port is zero or the runtime
    /// socket cannot be reached.
    pub fn connect(config: &InitConfig, endpoint: PathBuf) -> Result<Self, ProviderError> {
        if config.daemon_port == 0 {
            return Err(ProviderError::new("daemon port must be non-zero"));
        }
        connect_socket(&endpoint)?;
        info!(
            target: PROVIDER_TARGET,
            endpoint = %endpoint.display(),
            node = %config.node_name,
            namespace = config.resource_manager.namespace().unwrap_or("*"),
            "connected to container runtime"
        );
        Ok(Self {
            endpoint,
            node_name: config.node_name.clone(),
            operating_system: config.operating_system.clone(),
            daemon_port: config.daemon_port,
            resource_manager: config.resource_manager.clone(),
        })
    }

    /// Runtime socket in use.
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        self.endpoint.as_path()
    }

    /// Node the provider serves.
    #[must_use]
    pub const fn node_name(&self) -> &str {
        self.node_name.as_str()
    }

    /// Operating system advertised for the node.
    #[must_use]
    pub const fn operating_system(&self) -> &str {
        self.operating_system.as_str()
    }

    /// Port served by the node daemon.
    #[must_use]
    pub const fn daemon_port(&self) -> u16 {
        self.daemon_port
    }

    /// Orchestrator resources visible to the node.
    #[must_use]
    pub const fn resource_manager(&self) -> &ResourceManager {
        &self.resource_manager
    }
}

impl Provider for CriProvider {
    fn ping(&self) -> Result<(), ProviderError> {
        connect_socket(&self.endpoint)
    }

    fn shutdown(&self) {
        debug!(
            target: PROVIDER_TARGET,
            endpoint = %self.endpoint.display(),
            "releasing container runtime"
        );
    }
}

#[cfg(unix)]
fn connect_socket(endpoint: &Path) -> Result<(), ProviderError> {
    std::os::unix::net::UnixStream::connect(endpoint)
        .map(drop)
        .map_err(|source| {
            ProviderError::with_source(
                format!("container runtime unreachable at {}", endpoint.display()),
                source,
            )
        })
}

#[cfg(not(unix))]
fn connect_socket(endpoint: &Path) -> Result<(), ProviderError> {
    Err(ProviderError::new(format!(
        "container runtime socket {} requires a unix platform",
        endpoint.display()
    )))
}
