//! Backend detection rule order. These tests mutate process environment
//! variables, so they run serially.

use std::fs;
use std::path::PathBuf;

use pgkeeper::environment::{Environment, EnvironmentDetector, KUBERNETES_HOST_VAR};
use pgkeeper::runner::CommandRunner;
use serial_test::serial;

fn detector(socket: PathBuf) -> EnvironmentDetector {
    EnvironmentDetector::with_socket(CommandRunner::detached(), socket)
}

#[tokio::test]
#[serial]
async fn override_wins_over_everything() {
    std::env::set_var(KUBERNETES_HOST_VAR, "10.96.0.1");
    let d = detector(PathBuf::from("/nonexistent/docker.sock"));
    assert_eq!(
        d.detect(Some(Environment::Docker)).await,
        Environment::Docker
    );
    std::env::remove_var(KUBERNETES_HOST_VAR);
}

#[tokio::test]
#[serial]
async fn service_host_variable_selects_kubernetes() {
    std::env::set_var(KUBERNETES_HOST_VAR, "10.96.0.1");
    let d = detector(PathBuf::from("/nonexistent/docker.sock"));
    assert_eq!(d.probe().await, Environment::Kubernetes);
    std::env::remove_var(KUBERNETES_HOST_VAR);
}

#[tokio::test]
#[serial]
async fn empty_service_host_variable_is_ignored() {
    std::env::set_var(KUBERNETES_HOST_VAR, "");
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("docker.sock");
    fs::write(&socket, "").unwrap();

    let d = detector(socket);
    assert_eq!(d.probe().await, Environment::Docker);
    std::env::remove_var(KUBERNETES_HOST_VAR);
}

#[tokio::test]
#[serial]
async fn docker_socket_presence_selects_docker() {
    std::env::remove_var(KUBERNETES_HOST_VAR);
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("docker.sock");
    fs::write(&socket, "").unwrap();

    let d = detector(socket);
    assert_eq!(d.probe().await, Environment::Docker);
}

#[tokio::test]
#[serial]
async fn kubernetes_variable_beats_docker_socket() {
    std::env::set_var(KUBERNETES_HOST_VAR, "10.96.0.1");
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("docker.sock");
    fs::write(&socket, "").unwrap();

    let d = detector(socket);
    assert_eq!(d.probe().await, Environment::Kubernetes);
    std::env::remove_var(KUBERNETES_HOST_VAR);
}
