//! Kubernetes pod operations via the `kubectl` CLI.
//!
//! `kubectl exec` has no `--env` equivalent, so environment variables are
//! exported through a `sh -c` wrapper inside the pod. That wrapper is the only
//! place a shell appears in the whole pipeline, and every interpolated value
//! is single-quote escaped.

use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;

use crate::handlers::{ensure_success, TargetId, TargetStatus};
use crate::runner::{CommandRunner, RunOutput, RunSpec, StdinSource, StdoutSink};
use crate::{OrchestratorError, Result};

const GET_TIMEOUT: Duration = Duration::from_secs(15);
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default label selector for locating the database pod.
pub const DEFAULT_LABEL_SELECTOR: &str = "app=postgres";

pub struct KubernetesHandler {
    runner: CommandRunner,
    namespace: String,
    labels: Vec<(String, String)>,
    pod: Option<String>,
    container: Option<String>,
}

impl KubernetesHandler {
    pub fn new(
        runner: CommandRunner,
        namespace: String,
        labels: Vec<(String, String)>,
        pod: Option<String>,
        container: Option<String>,
    ) -> Self {
        Self {
            runner,
            namespace,
            labels,
            pod,
            container,
        }
    }

    fn label_selector(&self) -> String {
        if self.labels.is_empty() {
            DEFAULT_LABEL_SELECTOR.to_string()
        } else {
            self.labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",")
        }
    }

    pub async fn discover(&self) -> Result<TargetId> {
        if let Some(pod) = &self.pod {
            debug!("using configured pod '{pod}'");
            let container = match &self.container {
                Some(c) => Some(c.clone()),
                None => self.pod_container(pod).await,
            };
            return Ok(TargetId {
                name: pod.clone(),
                namespace: Some(self.namespace.clone()),
                container,
            });
        }

        let selector = self.label_selector();
        let spec = RunSpec::new(
            "kubectl",
            [
                "get",
                "pods",
                "-n",
                self.namespace.as_str(),
                "-l",
                selector.as_str(),
                "-o",
                "json",
            ],
        )
        .timeout(LIST_TIMEOUT);
        let out = ensure_success(self.runner.run(spec).await?)?;
        let pods: Value = serde_json::from_str(&out.stdout_utf8())?;

        let items = pods["items"].as_array().cloned().unwrap_or_default();
        for item in &items {
            if !pod_is_ready(item) {
                continue;
            }
            let name = item["metadata"]["name"].as_str().unwrap_or_default();
            let container = match &self.container {
                Some(c) => Some(c.clone()),
                None => pick_container(item),
            };
            debug!("discovered pod '{name}' in namespace '{}'", self.namespace);
            return Ok(TargetId {
                name: name.to_string(),
                namespace: Some(self.namespace.clone()),
                container,
            });
        }

        Err(OrchestratorError::TargetNotFound(format!(
            "no ready pod matching '{selector}' in namespace '{}'; pass --pod NAME",
            self.namespace
        )))
    }

    pub async fn status(&self, target: &TargetId) -> Result<TargetStatus> {
        let spec = RunSpec::new(
            "kubectl",
            [
                "get",
                "pod",
                target.name.as_str(),
                "-n",
                self.namespace.as_str(),
                "-o",
                "json",
            ],
        )
        .timeout(GET_TIMEOUT);
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Ok(TargetStatus::NotFound);
        }

        match serde_json::from_str::<Value>(&out.stdout_utf8()) {
            Ok(pod) if pod_is_ready(&pod) => Ok(TargetStatus::Running),
            Ok(_) => Ok(TargetStatus::NotRunning),
            Err(err) => {
                warn!("unparseable pod status for '{}': {err}", target.name);
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
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            self.namespace.clone(),
        ];
        if let Some(container) = target.container.as_ref().or(self.container.as_ref()) {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        if !stdin.is_null() {
            args.push("--stdin".to_string());
            args.push("--tty=false".to_string());
        }
        args.push(target.name.clone());
        args.push("--".to_string());

        if env.is_empty() {
            args.extend(argv.iter().cloned());
        } else {
            args.push("sh".to_string());
            args.push("-c".to_string());
            args.push(compose_shell_command(env, argv));
        }

        self.runner
            .run(
                RunSpec::new("kubectl", args)
                    .stdin(stdin)
                    .stdout(stdout)
                    .timeout(timeout),
            )
            .await
    }

    pub fn identity(&self, target: &TargetId) -> String {
        format!("{}/{}", self.namespace, target.name)
    }

    /// Resolves the container to exec into for a configured pod name.
    async fn pod_container(&self, pod: &str) -> Option<String> {
        let spec = RunSpec::new(
            "kubectl",
            ["get", "pod", pod, "-n", self.namespace.as_str(), "-o", "json"],
        )
        .timeout(GET_TIMEOUT);
        match self.runner.run(spec).await {
            Ok(out) if out.success() => serde_json::from_str::<Value>(&out.stdout_utf8())
                .ok()
                .and_then(|pod| pick_container(&pod)),
            _ => None,
        }
    }
}

/// Running phase with every container reporting ready.
fn pod_is_ready(pod: &Value) -> bool {
    if pod["status"]["phase"].as_str() != Some("Running") {
        return false;
    }
    match pod["status"]["containerStatuses"].as_array() {
        Some(statuses) => statuses
            .iter()
            .all(|s| s["ready"].as_bool() == Some(true)),
        None => false,
    }
}

/// The postgres container if one is recognizable, else the first container.
fn pick_container(pod: &Value) -> Option<String> {
    let containers = pod["spec"]["containers"].as_array()?;
    for container in containers {
        let name = container["name"].as_str().unwrap_or_default();
        let image = container["image"].as_str().unwrap_or_default();
        if name == "postgres" || image.to_lowercase().contains("postgres") {
            return Some(name.to_string());
        }
    }
    containers
        .first()
        .and_then(|c| c["name"].as_str())
        .map(str::to_string)
}

/// `export K='v' && cmd args...` with every value shell-quoted.
fn compose_shell_command(env: &[(String, String)], argv: &[String]) -> String {
    let exports = env
        .iter()
        .map(|(k, v)| format!("{k}={}", shell_quote(v)))
        .collect::<Vec<_>>()
        .join(" ");
    let command = argv
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");
    format!("export {exports} && {command}")
}

fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@%+,".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn shell_quoting_escapes_single_quotes() {
        assert_eq!(shell_quote("plain-value"), "plain-value");
        assert_eq!(shell_quote("pa ss"), "'pa ss'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn composes_export_wrapper() {
        let env = vec![("PGPASSWORD".to_string(), "secret".to_string())];
        let argv = vec![
            "pg_dump".to_string(),
            "--username=postgres".to_string(),
            "--dbname=pc_db".to_string(),
        ];
        let line = compose_shell_command(&env, &argv);
        assert_eq!(
            line,
            "export PGPASSWORD=secret && pg_dump --username=postgres --dbname=pc_db"
        );
    }

    #[test]
    fn readiness_requires_all_containers() {
        let pod = json!({
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"ready": true},
                    {"ready": false}
                ]
            }
        });
        assert!(!pod_is_ready(&pod));
    }

    #[test]
    fn picks_postgres_container_by_image() {
        let pod = json!({
            "spec": {
                "containers": [
                    {"name": "sidecar-proxy", "image": "envoy:latest"},
                    {"name": "db", "image": "registry.local/custom-postgres:16"}
                ]
            }
        });
        assert_eq!(pick_container(&pod), Some("db".to_string()));
    }

    #[test]
    fn falls_back_to_first_container() {
        let pod = json!({
            "spec": {
                "containers": [
                    {"name": "app", "image": "alpine"},
                    {"name": "other", "image": "nginx"}
                ]
            }
        });
        assert_eq!(pick_container(&pod), Some("app".to_string()));
    }
}
