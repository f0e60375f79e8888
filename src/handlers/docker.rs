//! Docker container operations via the `docker` CLI.

use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::handlers::{ensure_success, TargetId, TargetStatus};
use crate::runner::{CommandRunner, RunOutput, RunSpec, StdinSource, StdoutSink};
use crate::{OrchestratorError, Result};

const LIST_TIMEOUT: Duration = Duration::from_secs(30);
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Stateless handler; carries only the runner and the optional configured
/// container name.
pub struct DockerHandler {
    runner: CommandRunner,
    container: Option<String>,
}

impl DockerHandler {
    pub fn new(runner: CommandRunner, container: Option<String>) -> Self {
        Self { runner, container }
    }

    pub async fn discover(&self) -> Result<TargetId> {
        if let Some(name) = &self.container {
            debug!("using configured container '{name}'");
            return Ok(TargetId {
                name: name.clone(),
                namespace: None,
                container: None,
            });
        }

        let spec =
            RunSpec::new("docker", ["ps", "--format", "{{json .}}"]).timeout(LIST_TIMEOUT);
        let out = ensure_success(self.runner.run(spec).await?)?;

        for line in out.stdout_utf8().lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let container: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(err) => {
                    warn!("skipping unparseable `docker ps` line: {err}");
                    continue;
                }
            };
            let name = container["Names"].as_str().unwrap_or_default();
            let image = container["Image"].as_str().unwrap_or_default();
            if image.to_lowercase().contains("postgres")
                || name.to_lowercase().contains("postgres")
            {
                debug!("discovered container '{name}' (image {image})");
                return Ok(TargetId {
                    name: name.to_string(),
                    namespace: None,
                    container: None,
                });
            }
        }

        Err(OrchestratorError::TargetNotFound(
            "no running container with a postgres image; pass --container NAME".to_string(),
        ))
    }

    pub async fn status(&self, target: &TargetId) -> Result<TargetStatus> {
        let spec = RunSpec::new(
            "docker",
            ["inspect", "--format", "{{json .State}}", target.name.as_str()],
        )
        .timeout(INSPECT_TIMEOUT);
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Ok(TargetStatus::NotFound);
        }

        match serde_json::from_str::<Value>(out.stdout_utf8().trim()) {
            Ok(state) if state["Running"].as_bool() == Some(true) => Ok(TargetStatus::Running),
            Ok(_) => Ok(TargetStatus::NotRunning),
            Err(err) => {
                warn!("unparseable inspect output for '{}': {err}", target.name);
                Ok(TargetStatus::NotRunning)
            }
        }
    }

    pub async fn exec(
        &self,
        target: &TargetId,
        argv: &[String],
        env: &[(String, String)],
        stdin: StdinSource,
        stdout: StdoutSink,
        timeout: Duration,
    ) -> Result<RunOutput> {
        let mut args = vec!["exec".to_string()];
        if !stdin.is_null() {
            args.push("--interactive".to_string());
        }
        for (key, value) in env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(target.name.clone());
        args.extend(argv.iter().cloned());

        self.runner
            .run(
                RunSpec::new("docker", args)
                    .stdin(stdin)
                    .stdout(stdout)
                    .timeout(timeout),
            )
            .await
    }

    pub fn identity(&self, target: &TargetId) -> String {
        target.name.clone()
    }
}
