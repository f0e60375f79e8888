//! Child-process execution with streaming stdio, deadlines and cancellation.
//!
//! Commands are always spawned directly from an argument vector; no shell is
//! involved on the host side. Dump payloads can reach hundreds of megabytes,
//! so file handles are passed straight through to the child's stdio instead
//! of buffering in memory.

use std::process::Stdio;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;

use crate::{OrchestratorError, Result};

/// Grace period between SIGTERM and SIGKILL when tearing a child down.
pub const TERM_GRACE: Duration = Duration::from_secs(5);

/// Where the child's stdin comes from.
pub enum StdinSource {
    Null,
    Bytes(Vec<u8>),
    File(std::fs::File),
}

impl StdinSource {
    pub fn is_null(&self) -> bool {
        matches!(self, StdinSource::Null)
    }
}

/// Where the child's stdout goes.
pub enum StdoutSink {
    Captured,
    File(std::fs::File),
}

/// One command invocation: program, argument vector, environment additions,
/// stdio wiring and a hard deadline.
pub struct RunSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: StdinSource,
    pub stdout: StdoutSink,
    pub timeout: Duration,
}

impl RunSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            stdin: StdinSource::Null,
            stdout: StdoutSink::Captured,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, stdin: StdinSource) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, stdout: StdoutSink) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Captured result of a finished child.
#[derive(Debug)]
pub struct RunOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub elapsed: Duration,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_utf8(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Executes commands, observing a process-wide shutdown channel. A shutdown
/// broadcast kills the running child and surfaces `Cancelled`.
#[derive(Clone)]
pub struct CommandRunner {
    shutdown: broadcast::Sender<()>,
}

impl CommandRunner {
    pub fn new(shutdown: broadcast::Sender<()>) -> Self {
        Self { shutdown }
    }

    /// A runner with no signal listener attached; used by tests and probes.
    pub fn detached() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self { shutdown }
    }

    pub async fn run(&self, spec: RunSpec) -> Result<RunOutput> {
        let RunSpec {
            program,
            args,
            env,
            stdin,
            stdout,
            timeout,
        } = spec;

        let started = Instant::now();
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        for (key, value) in &env {
            cmd.env(key, value);
        }
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let stdin_bytes = match stdin {
            StdinSource::Null => {
                cmd.stdin(Stdio::null());
                None
            }
            StdinSource::Bytes(bytes) => {
                cmd.stdin(Stdio::piped());
                Some(bytes)
            }
            StdinSource::File(file) => {
                cmd.stdin(Stdio::from(file));
                None
            }
        };
        let capture_stdout = match stdout {
            StdoutSink::Captured => {
                cmd.stdout(Stdio::piped());
                true
            }
            StdoutSink::File(file) => {
                cmd.stdout(Stdio::from(file));
                false
            }
        };

        debug!("spawning {} {}", program, mask_args(&args).join(" "));
        let mut child = cmd.spawn()?;

        if let Some(bytes) = stdin_bytes {
            if let Some(mut handle) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = handle.write_all(&bytes).await;
                    let _ = handle.shutdown().await;
                });
            }
        }

        let stdout_task = if capture_stdout {
            child.stdout.take().map(|mut out| {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let _ = out.read_to_end(&mut buf).await;
                    buf
                })
            })
        } else {
            None
        };
        let stderr_task = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut cancel = self.shutdown.subscribe();
        let status = tokio::select! {
            status = child.wait() => status?,
            _ = tokio::time::sleep(timeout) => {
                warn!("'{program}' exceeded its {timeout:?} deadline, killing it");
                graceful_kill(&mut child).await;
                return Err(OrchestratorError::ExecTimeout(timeout));
            }
            _ = cancel.recv() => {
                graceful_kill(&mut child).await;
                return Err(OrchestratorError::Cancelled);
            }
        };

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let stderr_bytes = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(RunOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            elapsed: started.elapsed(),
        })
    }
}

/// SIGTERM first, SIGKILL after the grace period.
async fn graceful_kill(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok() {
            return;
        }
        warn!("child {pid} ignored SIGTERM, escalating to SIGKILL");
    }
    let _ = child.kill().await;
}

/// Installs SIGINT/SIGTERM listeners and returns the channel they notify.
pub fn spawn_signal_listener() -> broadcast::Sender<()> {
    let (shutdown, _) = broadcast::channel(1);
    let notify = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        warn!("shutdown signal received, stopping");
        let _ = notify.send(());
    });
    shutdown
}

/// Masks `PGPASSWORD` values so command lines are safe to log.
pub fn mask_args(args: &[String]) -> Vec<String> {
    args.iter().map(|arg| mask_password(arg)).collect()
}

fn mask_password(arg: &str) -> String {
    let Some(start) = arg.find("PGPASSWORD=") else {
        return arg.to_string();
    };
    let value_start = start + "PGPASSWORD=".len();
    let rest = &arg[value_start..];
    let value_len = if let Some(quoted) = rest.strip_prefix('\'') {
        // Quoted value: mask up to and including the closing quote.
        match quoted.find('\'') {
            Some(end) => end + 2,
            None => rest.len(),
        }
    } else {
        rest.find(char::is_whitespace).unwrap_or(rest.len())
    };
    format!(
        "{}PGPASSWORD=*****{}",
        &arg[..start],
        &rest[value_len.min(rest.len())..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = CommandRunner::detached();
        let out = runner
            .run(RunSpec::new("echo", ["hello"]).timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout_utf8().trim(), "hello");
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let runner = CommandRunner::detached();
        let out = runner
            .run(RunSpec::new("false", Vec::<String>::new()).timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 1);
    }

    #[tokio::test]
    async fn pipes_stdin_bytes() {
        let runner = CommandRunner::detached();
        let out = runner
            .run(
                RunSpec::new("cat", Vec::<String>::new())
                    .stdin(StdinSource::Bytes(b"streamed".to_vec()))
                    .timeout(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout_utf8(), "streamed");
    }

    #[tokio::test]
    async fn kills_child_on_timeout() {
        let runner = CommandRunner::detached();
        let err = runner
            .run(RunSpec::new("sleep", ["30"]).timeout(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ExecTimeout(_)));
    }

    #[test]
    fn masks_plain_password_env() {
        let masked = mask_password("PGPASSWORD=hunter2");
        assert_eq!(masked, "PGPASSWORD=*****");
    }

    #[test]
    fn masks_quoted_password_inside_shell_line() {
        let masked = mask_password("export PGPASSWORD='s3cr et' && pg_dump --dbname=pc_db");
        assert_eq!(masked, "export PGPASSWORD=***** && pg_dump --dbname=pc_db");
        assert!(!masked.contains("s3cr"));
    }
}
