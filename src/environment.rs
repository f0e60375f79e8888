//! Detection of the container backend the database runs under.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use log::{debug, info};

use crate::runner::{CommandRunner, RunSpec};

/// Conventional Docker daemon socket path.
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Set inside any pod, and by operators pointing at a cluster.
pub const KUBERNETES_HOST_VAR: &str = "KUBERNETES_SERVICE_HOST";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

static DETECTED: OnceLock<Environment> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Docker,
    Kubernetes,
    Unknown,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Docker => write!(f, "docker"),
            Environment::Kubernetes => write!(f, "kubernetes"),
            Environment::Unknown => write!(f, "unknown"),
        }
    }
}

/// Probes host signals to pick a backend. Rule order: user override, then the
/// cluster service-host variable, then the Docker socket or a working
/// `docker ps`. Auto-detection results are cached for the process lifetime;
/// a misdetection is recoverable by re-running with an override flag.
pub struct EnvironmentDetector {
    runner: CommandRunner,
    docker_socket: PathBuf,
}

impl EnvironmentDetector {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            docker_socket: PathBuf::from(DOCKER_SOCKET),
        }
    }

    /// Detector probing a specific socket path instead of the conventional
    /// one; used by tests.
    pub fn with_socket(runner: CommandRunner, docker_socket: PathBuf) -> Self {
        Self {
            runner,
            docker_socket,
        }
    }

    pub async fn detect(&self, forced: Option<Environment>) -> Environment {
        if let Some(env) = forced {
            info!("backend forced to {env}");
            return env;
        }
        if let Some(cached) = DETECTED.get() {
            return *cached;
        }
        let detected = self.probe().await;
        debug!("detected backend: {detected}");
        *DETECTED.get_or_init(|| detected)
    }

    /// Uncached single probe pass.
    pub async fn probe(&self) -> Environment {
        let in_cluster = std::env::var(KUBERNETES_HOST_VAR)
            .map(|v| !v.is_empty())
            .unwrap_or(false);
        if in_cluster {
            debug!("{KUBERNETES_HOST_VAR} is set");
            return Environment::Kubernetes;
        }

        if self.docker_socket.exists() {
            debug!("docker socket present at {}", self.docker_socket.display());
            return Environment::Docker;
        }

        let probe = RunSpec::new("docker", ["ps", "--quiet"]).timeout(PROBE_TIMEOUT);
        match self.runner.run(probe).await {
            Ok(out) if out.success() => {
                debug!("docker client answered `docker ps`");
                Environment::Docker
            }
            _ => Environment::Unknown,
        }
    }
}
