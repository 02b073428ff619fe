//! CRI provider connection behaviour against a throwaway Unix socket.

use std::ffi::OsString;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use node_cli::{InitConfig, Provider, ResourceManager};
use rstest::{fixture, rstest};
use tempfile::TempDir;

use crate::provider::{CriProvider, DEFAULT_RUNTIME_ENDPOINT, factory_for, runtime_endpoint};

struct RuntimeSocket {
    _dir: TempDir,
    _listener: UnixListener,
    path: PathBuf,
}

#[fixture]
fn runtime() -> RuntimeSocket {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("containerd.sock");
    let listener = UnixListener::bind(&path).expect("bind runtime socket");
    RuntimeSocket {
        _dir: dir,
        _listener: listener,
        path,
    }
}

#[fixture]
fn config() -> InitConfig {
    InitConfig {
        node_name: String::from("node-a"),
        operating_system: String::from("Linux"),
        internal_ip: None,
        daemon_port: 10250,
        resource_manager: ResourceManager::new(Some(String::from("default"))),
        config_path: None,
        cluster_domain: String::from("cluster.local"),
    }
}

#[rstest]
fn connects_and_pings_a_listening_runtime(runtime: RuntimeSocket, config: InitConfig) {
    let provider = CriProvider::connect(&config, runtime.path.clone()).expect("connect");

    assert_eq!(provider.endpoint(), runtime.path.as_path());
    assert_eq!(provider.node_name(), "node-a");
    assert_eq!(provider.daemon_port(), 10250);
    assert_eq!(provider.resource_manager().namespace(), Some("default"));
    provider.ping().expect("ping");
}

#[rstest]
fn factory_materialises_the_provider(runtime: RuntimeSocket, config: InitConfig) {
    let provider = factory_for(runtime.path.clone())(&config).expect("factory");
    provider.ping().expect("ping");
}

#[rstest]
fn missing_runtime_socket_fails(config: InitConfig) {
    let dir = tempfile::tempdir().expect("temp dir");
    let error = CriProvider::connect(&config, dir.path().join("absent.sock"))
        .expect_err("absent socket");
    assert!(error.message().contains("container runtime unreachable"));
}

#[rstest]
fn zero_daemon_port_is_rejected(runtime: RuntimeSocket, mut config: InitConfig) {
    config.daemon_port = 0;
    let error = CriProvider::connect(&config, runtime.path.clone()).expect_err("zero port");
    assert_eq!(error.message(), "daemon port must be non-zero");
}

#[rstest]
fn ping_fails_once_the_runtime_goes_away(config: InitConfig) {
    let RuntimeSocket {
        _dir: dir,
        _listener: listener,
        path,
    } = runtime();
    let provider = CriProvider::connect(&config, path).expect("connect");
    drop(listener);
    drop(dir);
    assert!(provider.ping().is_err());
}

#[rstest]
#[case::unset(None, DEFAULT_RUNTIME_ENDPOINT)]
#[case::empty(Some(""), DEFAULT_RUNTIME_ENDPOINT)]
#[case::bare_path(Some("/var/run/crio/crio.sock"), "/var/run/crio/crio.sock")]
#[case::unix_url(Some("unix:///run/k3s/containerd.sock"), "/run/k3s/containerd.sock")]
fn resolves_runtime_endpoints(#[case] value: Option<&str>, #[case] expected: &str) {
    assert_eq!(
        runtime_endpoint(value.map(OsString::from)),
        PathBuf::from(expected)
    );
}
