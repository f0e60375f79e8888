//! Backend-specific target operations behind one capability set.
//!
//! Callers hold a [`TargetHandler`] and never branch on the concrete backend;
//! the Docker/Kubernetes divergence (stdin plumbing, environment passing,
//! discovery commands) is contained entirely in the two variants. Handlers
//! never retry; retry policy belongs to callers.

mod docker;
mod kubernetes;

use std::time::Duration;

pub use docker::DockerHandler;
pub use kubernetes::KubernetesHandler;

use crate::runner::{RunOutput, StdinSource, StdoutSink};
use crate::{OrchestratorError, Result};

/// Result of a liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Running,
    NotRunning,
    NotFound,
}

/// A located target: container name, or pod name plus namespace and the
/// in-pod container to exec into.
#[derive(Debug, Clone)]
pub struct TargetId {
    pub name: String,
    pub namespace: Option<String>,
    pub container: Option<String>,
}

pub enum TargetHandler {
    Docker(DockerHandler),
    Kubernetes(KubernetesHandler),
}

impl TargetHandler {
    /// Locates a candidate running target.
    pub async fn discover(&self) -> Result<TargetId> {
        match self {
            TargetHandler::Docker(h) => h.discover().await,
            TargetHandler::Kubernetes(h) => h.discover().await,
        }
    }

    /// Cheap liveness probe.
    pub async fn status(&self, target: &TargetId) -> Result<TargetStatus> {
        match self {
            TargetHandler::Docker(h) => h.status(target).await,
            TargetHandler::Kubernetes(h) => h.status(target).await,
        }
    }

    /// Runs a command inside the target, streaming stdin/stdout through the
    /// host-side pipe. Returns the raw output; callers decide whether a
    /// non-zero exit is fatal.
    pub async fn exec(
        &self,
        target: &TargetId,
        argv: &[String],
        env: &[(String, String)],
        stdin: StdinSource,
        stdout: StdoutSink,
        timeout: Duration,
    ) -> Result<RunOutput> {
        match self {
            TargetHandler::Docker(h) => h.exec(target, argv, env, stdin, stdout, timeout).await,
            TargetHandler::Kubernetes(h) => h.exec(target, argv, env, stdin, stdout, timeout).await,
        }
    }

    /// Stable human-readable identifier recorded in sidecars.
    pub fn identity(&self, target: &TargetId) -> String {
        match self {
            TargetHandler::Docker(h) => h.identity(target),
            TargetHandler::Kubernetes(h) => h.identity(target),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            TargetHandler::Docker(_) => "docker",
            TargetHandler::Kubernetes(_) => "kubernetes",
        }
    }
}

/// Maps a non-zero exit into the exec failure taxonomy.
pub fn ensure_success(out: RunOutput) -> Result<RunOutput> {
    if out.success() {
        Ok(out)
    } else {
        Err(OrchestratorError::ExecNonZero {
            exit: out.exit_code,
            stderr: summarize_stderr(&out.stderr),
        })
    }
}

/// Last few stderr lines, which is where the client tools put the verdict.
pub fn summarize_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = lines.len().saturating_sub(5);
    lines[tail..].join("\n")
}
