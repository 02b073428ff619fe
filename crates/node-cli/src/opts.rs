//! Base node settings and the flag set that populates them.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, ArgAction, value_parser};

use crate::flags::{FlagError, FlagSet, ParsedFlags};
use crate::provider::{InitConfig, ResourceManager};

/// Default port served by the node daemon.
pub const DEFAULT_LISTEN_PORT: u16 = 10250;
/// Default node name used when nothing else names the node.
pub const DEFAULT_NODE_NAME: &str = "virtual-kubelet";
/// Default operating system advertised by the node.
pub const DEFAULT_OPERATING_SYSTEM: &str = "Linux";
/// Default cluster DNS domain.
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
/// Default key of the taint applied to the node.
pub const DEFAULT_TAINT_KEY: &str = "virtual-kubelet.io/provider";
/// Default effect of the taint applied to the node.
pub const DEFAULT_TAINT_EFFECT: &str = "NoSchedule";
/// Default interval between node status updates, in seconds.
pub const DEFAULT_STATUS_INTERVAL_SECS: u64 = 10;

/// Name of the flag set owned by [`BaseOptions`].
pub const BASE_FLAG_SET: &str = "node";

mod ids {
    pub(super) const KUBECONFIG: &str = "kubeconfig";
    pub(super) const NAMESPACE: &str = "namespace";
    pub(super) const CLUSTER_DOMAIN: &str = "cluster-domain";
    pub(super) const NODE_NAME: &str = "nodename";
    pub(super) const OPERATING_SYSTEM: &str = "os";
    pub(super) const PROVIDER: &str = "provider";
    pub(super) const PROVIDER_CONFIG: &str = "provider-config";
    pub(super) const LISTEN_PORT: &str = "listen-port";
    pub(super) const INTERNAL_IP: &str = "internal-ip";
    pub(super) const DISABLE_TAINT: &str = "disable-taint";
    pub(super) const TAINT_KEY: &str = "taint";
    pub(super) const TAINT_EFFECT: &str = "taint-effect";
    pub(super) const TAINT_VALUE: &str = "taint-value";
    pub(super) const STATUS_INTERVAL: &str = "node-status-interval";
}

/// Taint advertised on the node so only tolerant workloads land on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taint {
    /// Taint key.
    pub key: String,
    /// Taint value.
    pub value: String,
    /// Scheduling effect.
    pub effect: String,
}

/// Mutable settings shared by every option before the node is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseOptions {
    /// Path to the orchestrator client configuration.
    pub kubeconfig: Option<PathBuf>,
    /// Namespace the node is restricted to; `None` watches all namespaces.
    pub namespace: Option<String>,
    /// DNS domain of the cluster.
    pub cluster_domain: String,
    /// Name the node registers under.
    pub node_name: String,
    /// Operating system advertised by the node.
    pub operating_system: String,
    /// Name of the provider to materialise.
    pub provider: String,
    /// Provider-specific configuration file.
    pub provider_config: Option<PathBuf>,
    /// Port served by the node daemon.
    pub listen_port: u16,
    /// Address other components use to reach the node.
    pub internal_ip: Option<IpAddr>,
    /// Skips the node taint entirely when set.
    pub disable_taint: bool,
    /// Taint key.
    pub taint_key: String,
    /// Taint effect.
    pub taint_effect: String,
    /// Taint value; defaults to the provider name.
    pub taint_value: Option<String>,
    /// Interval between node status updates.
    pub status_interval: Duration,
    /// Version advertised by the node.
    pub version: String,
}

impl Default for BaseOptions {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace: None,
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_owned(),
            node_name: DEFAULT_NODE_NAME.to_owned(),
            operating_system: DEFAULT_OPERATING_SYSTEM.to_owned(),
            provider: String::new(),
            provider_config: None,
            listen_port: DEFAULT_LISTEN_PORT,
            internal_ip: None,
            disable_taint: false,
            taint_key: DEFAULT_TAINT_KEY.to_owned(),
            taint_effect: DEFAULT_TAINT_EFFECT.to_owned(),
            taint_value: None,
            status_interval: Duration::from_secs(DEFAULT_STATUS_INTERVAL_SECS),
            version: String::new(),
        }
    }
}

impl BaseOptions {
    /// Creates options holding the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags populating these options, with help text showing the current
    /// values as defaults.
    #[must_use]
    pub fn flag_set(&self) -> FlagSet {
        FlagSet::new(BASE_FLAG_SET)
            .arg(
                Arg::new(ids::KUBECONFIG)
                    .long(ids::KUBECONFIG)
                    .env("KUBECONFIG")
                    .value_parser(value_parser!(PathBuf))
                    .help("kube config file to use for connecting to the orchestrator"),
            )
            .arg(
                Arg::new(ids::NAMESPACE)
                    .long(ids::NAMESPACE)
                    .help("namespace to watch for pods; all namespaces when omitted"),
            )
            .arg(
                Arg::new(ids::CLUSTER_DOMAIN)
                    .long(ids::CLUSTER_DOMAIN)
                    .help(with_default("cluster domain", &self.cluster_domain)),
            )
            .arg(
                Arg::new(ids::NODE_NAME)
                    .long(ids::NODE_NAME)
                    .help(with_default("name of the node", &self.node_name)),
            )
            .arg(
                Arg::new(ids::OPERATING_SYSTEM)
                    .long(ids::OPERATING_SYSTEM)
                    .help(with_default("operating system advertised", &self.operating_system)),
            )
            .arg(
                Arg::new(ids::PROVIDER)
                    .long(ids::PROVIDER)
                    .help(with_default("provider to use", &self.provider)),
            )
            .arg(
                Arg::new(ids::PROVIDER_CONFIG)
                    .long(ids::PROVIDER_CONFIG)
                    .value_parser(value_parser!(PathBuf))
                    .help("provider configuration file"),
            )
            .arg(
                Arg::new(ids::LISTEN_PORT)
                    .long(ids::LISTEN_PORT)
                    .env("KUBELET_PORT")
                    .value_parser(value_parser!(u16).range(1..))
                    .help(with_default(
                        "port the node daemon listens on",
                        &self.listen_port.to_string(),
                    )),
            )
            .arg(
                Arg::new(ids::INTERNAL_IP)
                    .long(ids::INTERNAL_IP)
                    .env("VKUBELET_POD_IP")
                    .value_parser(value_parser!(IpAddr))
                    .help("internal address advertised by the node"),
            )
            .arg(
                Arg::new(ids::DISABLE_TAINT)
                    .long(ids::DISABLE_TAINT)
                    .action(ArgAction::SetTrue)
                    .help("disable the node taint"),
            )
            .arg(
                Arg::new(ids::TAINT_KEY)
                    .long(ids::TAINT_KEY)
                    .help(with_default("node taint key", &self.taint_key)),
            )
            .arg(
                Arg::new(ids::TAINT_EFFECT)
                    .long(ids::TAINT_EFFECT)
                    .value_parser(["NoSchedule", "NoExecute", "PreferNoSchedule"])
                    .help(with_default("node taint effect", &self.taint_effect)),
            )
            .arg(
                Arg::new(ids::TAINT_VALUE)
                    .long(ids::TAINT_VALUE)
                    .help("node taint value; defaults to the provider name"),
            )
            .arg(
                Arg::new(ids::STATUS_INTERVAL)
                    .long(ids::STATUS_INTERVAL)
                    .value_parser(value_parser!(u64).range(1..))
                    .help(with_default(
                        "seconds between node status updates",
                        &self.status_interval.as_secs().to_string(),
                    )),
            )
    }

    /// Overrides every field whose flag was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError`] when a parsed value cannot be read back.
    pub fn apply_flags(&mut self, flags: &ParsedFlags) -> Result<(), FlagError> {
        if let Some(path) = flags.value::<PathBuf>(ids::KUBECONFIG)? {
            self.kubeconfig = Some(path);
        }
        if let Some(namespace) = flags.string(ids::NAMESPACE)? {
            self.namespace = Some(namespace).filter(|value| !value.is_empty());
        }
        override_string(flags, ids::CLUSTER_DOMAIN, &mut self.cluster_domain)?;
        override_string(flags, ids::NODE_NAME, &mut self.node_name)?;
        override_string(flags, ids::OPERATING_SYSTEM, &mut self.operating_system)?;
        override_string(flags, ids::PROVIDER, &mut self.provider)?;
        if let Some(path) = flags.value::<PathBuf>(ids::PROVIDER_CONFIG)? {
            self.provider_config = Some(path);
        }
        if let Some(port) = flags.value::<u16>(ids::LISTEN_PORT)? {
            self.listen_port = port;
        }
        if let Some(address) = flags.value::<IpAddr>(ids::INTERNAL_IP)? {
            self.internal_ip = Some(address);
        }
        if flags.switch(ids::DISABLE_TAINT)? {
            self.disable_taint = true;
        }
        override_string(flags, ids::TAINT_KEY, &mut self.taint_key)?;
        override_string(flags, ids::TAINT_EFFECT, &mut self.taint_effect)?;
        if let Some(value) = flags.string(ids::TAINT_VALUE)? {
            self.taint_value = Some(value);
        }
        if let Some(seconds) = flags.value::<u64>(ids::STATUS_INTERVAL)? {
            self.status_interval = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Taint the node advertises, or `None` when tainting is disabled.
    #[must_use]
    pub fn taint(&self) -> Option<Taint> {
        if self.disable_taint {
            return None;
        }
        Some(Taint {
            key: self.taint_key.clone(),
            value: self
                .taint_value
                .clone()
                .unwrap_or_else(|| self.provider.clone()),
            effect: self.taint_effect.clone(),
        })
    }

    /// Inputs handed to the provider factory.
    #[must_use]
    pub fn init_config(&self) -> InitConfig {
        InitConfig {
            node_name: self.node_name.clone(),
            operating_system: self.operating_system.clone(),
            internal_ip: self.internal_ip,
            daemon_port: self.listen_port,
            resource_manager: ResourceManager::new(self.namespace.clone()),
            config_path: self.provider_config.clone(),
            cluster_domain: self.cluster_domain.clone(),
        }
    }
}

fn with_default(help: &str, value: &str) -> String {
    if value.is_empty() {
        help.to_owned()
    } else {
        format!("{help} [default: {value}]")
    }
}

fn override_string(flags: &ParsedFlags, id: &str, field: &mut String) -> Result<(), FlagError> {
    if let Some(value) = flags.string(id)? {
        if value.trim().is_empty() {
            return Err(FlagError::InvalidValue {
                flag: id.to_owned(),
                value,
                message: String::from("value must not be empty"),
            });
        }
        *field = value;
    }
    Ok(())
}
