use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::platform;

/// Lines of combined stdout/stderr retained per process.
pub const LOG_TAIL_LINES: usize = 200;

/// How to start a long-lived project server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub dir: PathBuf,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, args: &[&str], dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            dir,
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Ring buffer of recent output lines, shared with the pipe readers.
#[derive(Debug, Clone)]
pub struct LogTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().cloned().collect()
    }

    pub fn text(&self) -> String {
        self.lines().join("\n")
    }
}

fn pipe_into_tail<R>(pipe: Option<R>, tail: LogTail, label: String, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else {
        return;
    };
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!(project = %label, stream, "{}", line);
            tail.push(line);
        }
    });
}

/// A spawned project server: the child handle plus its captured output.
///
/// The child runs in its own process group so terminate/kill reach any
/// workers it forked. Dropping a `ManagedProcess` kills the leader.
#[derive(Debug)]
pub struct ManagedProcess {
    child: Child,
    pid: Option<u32>,
    tail: LogTail,
    exit: Option<ExitStatus>,
}

impl ManagedProcess {
    pub fn spawn(label: &str, spec: &LaunchSpec) -> Result<Self, DeployError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        platform::configure_process_group(&mut cmd);

        debug!(project = %label, dir = %spec.dir.display(), "launching: {}", spec.command_line());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeployError::ToolchainUnavailable {
                    tool: spec.program.clone(),
                    remediation: format!("install `{}` and make sure it is on PATH", spec.program),
                });
            }
            Err(e) => {
                return Err(DeployError::LaunchFailed {
                    message: format!("failed to start `{}`: {}", spec.command_line(), e),
                    output: String::new(),
                });
            }
        };

        let pid = child.id();
        let tail = LogTail::new(LOG_TAIL_LINES);
        pipe_into_tail(child.stdout.take(), tail.clone(), label.to_string(), "stdout");
        pipe_into_tail(child.stderr.take(), tail.clone(), label.to_string(), "stderr");

        info!(project = %label, pid = ?pid, "process started");
        Ok(Self {
            child,
            pid,
            tail,
            exit: None,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        self.exit_status().is_none()
    }

    /// The exit status, once the process has exited.
    pub fn exit_status(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => {
                    warn!(pid = ?self.pid, error = %e, "failed to poll process state");
                }
            }
        }
        self.exit
    }

    /// Terminate the group, escalating to a kill once `grace` elapses.
    /// Returns `true` if the kill was needed.
    pub async fn terminate(&mut self, grace: Duration) -> bool {
        if self.exit.is_some() {
            // The leader is gone but forked workers may still hold the port.
            self.force_kill().await;
            return false;
        }
        let forced = platform::terminate_child(&mut self.child, self.pid, grace).await;
        self.exit = self.child.try_wait().ok().flatten();
        forced
    }

    pub async fn force_kill(&mut self) {
        platform::kill_child(&mut self.child, self.pid).await;
        if self.exit.is_none() {
            self.exit = self.child.try_wait().ok().flatten();
        }
    }

    pub fn log_tail(&self) -> &LogTail {
        &self.tail
    }

    pub fn recent_output(&self) -> String {
        self.tail.text()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec::new("sh", &["-c", script], std::env::temp_dir())
    }

    #[test]
    fn tail_evicts_oldest() {
        let tail = LogTail::new(2);
        tail.push("a".into());
        tail.push("b".into());
        tail.push("c".into());
        assert_eq!(tail.lines(), vec!["b", "c"]);
        assert_eq!(tail.text(), "b\nc");
    }

    #[tokio::test]
    async fn captures_output_of_exited_process() {
        let mut proc = ManagedProcess::spawn("t", &sh("echo hello; echo oops >&2; exit 1")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!proc.is_alive());
        assert!(!proc.exit_status().unwrap().success());
        let out = proc.recent_output();
        assert!(out.contains("hello"));
        assert!(out.contains("oops"));
    }

    #[tokio::test]
    async fn env_is_passed_through() {
        let spec = sh("echo port=$PORT").env("PORT", "12345");
        let proc = ManagedProcess::spawn("t", &spec).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(proc.recent_output().contains("port=12345"));
    }

    #[tokio::test]
    async fn terminate_stops_running_process() {
        let mut proc = ManagedProcess::spawn("t", &sh("sleep 60")).unwrap();
        assert!(proc.is_alive());
        let pid = proc.pid().unwrap();

        let forced = proc.terminate(Duration::from_secs(5)).await;
        assert!(!forced);
        assert!(!proc.is_alive());
        assert!(!platform::is_process_alive(pid));
    }

    #[tokio::test]
    async fn missing_program_is_toolchain_error() {
        let spec = LaunchSpec::new("no-such-binary-xyz", &[], std::env::temp_dir());
        let err = ManagedProcess::spawn("t", &spec).unwrap_err();
        assert!(matches!(err, DeployError::ToolchainUnavailable { .. }));
    }
}
