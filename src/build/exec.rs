use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::DeployError;
use crate::platform;

/// How long to keep draining pipes after the process itself has exited.
/// Grandchildren that inherited stdout would otherwise hold the read open.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// One subprocess invocation of a build: `program args...` in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Relative working directory inside the workspace.
    pub subdir: Option<String>,
    pub timeout: Duration,
}

impl Step {
    pub fn new(label: &str, program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
            subdir: None,
            timeout,
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn in_dir(mut self, subdir: &str) -> Self {
        self.subdir = Some(subdir.to_string());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    /// stderr followed by stdout; tools disagree on where errors go.
    pub fn combined(&self) -> String {
        match (self.stderr.trim().is_empty(), self.stdout.trim().is_empty()) {
            (true, _) => self.stdout.clone(),
            (false, true) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stderr, self.stdout),
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf).await {
        debug!(error = %e, "pipe read ended early");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Run `step` to completion inside `workspace`, bounded by its timeout.
///
/// A non-zero exit is reported through `StepOutput::success`; only launch
/// failures and timeouts are errors. On timeout the whole process group is
/// killed before returning.
pub async fn run_step(step: &Step, workspace: &Path) -> Result<StepOutput, DeployError> {
    let dir = match &step.subdir {
        Some(sub) => workspace.join(sub),
        None => workspace.to_path_buf(),
    };
    if !dir.is_dir() {
        return Err(DeployError::Internal(anyhow::anyhow!(
            "working directory {} does not exist",
            dir.display()
        )));
    }

    // Workspace-relative programs (`.venv/bin/python`) resolve against the step dir.
    let program = if step.program.contains('/') {
        dir.join(&step.program)
    } else {
        PathBuf::from(&step.program)
    };
    let mut cmd = Command::new(&program);
    cmd.args(&step.args)
        .current_dir(&dir)
        .envs(&step.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    platform::configure_process_group(&mut cmd);

    debug!(step = %step.label, dir = %dir.display(), "running: {}", step.command_line());
    let started = Instant::now();

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DeployError::ToolchainUnavailable {
                tool: step.program.clone(),
                remediation: format!("install `{}` and make sure it is on PATH", step.program),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let pid = child.id();

    let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
    let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

    let status = match tokio::time::timeout(step.timeout, child.wait()).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                step = %step.label,
                timeout_secs = step.timeout.as_secs(),
                "step timed out, killing process group"
            );
            platform::kill_child(&mut child, pid).await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(DeployError::Timeout {
                what: step.label.clone(),
                after: step.timeout,
            });
        }
    };

    let stdout = tokio::time::timeout(DRAIN_GRACE, stdout_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();
    let stderr = tokio::time::timeout(DRAIN_GRACE, stderr_task)
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or_default();

    info!(
        step = %step.label,
        status = %status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "step finished"
    );

    Ok(StepOutput {
        success: status.success(),
        code: status.code(),
        stdout,
        stderr,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_stderr_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new(
            "echo",
            "sh",
            &["-c", "echo out; echo err >&2; exit 3"],
            Duration::from_secs(10),
        );
        let out = run_step(&step, dir.path()).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.combined(), "err\n\nout\n");
    }

    #[tokio::test]
    async fn runs_in_subdir_with_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("web")).unwrap();
        let step = Step::new("pwd", "sh", &["-c", "basename \"$PWD\"; echo $GREETING"], Duration::from_secs(10))
            .in_dir("web")
            .env("GREETING", "hello");
        let out = run_step(&step, dir.path()).await.unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "web\nhello\n");
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new("slow", "sleep", &["30"], Duration::from_millis(200));
        let started = Instant::now();
        let err = run_step(&step, dir.path()).await.unwrap_err();
        assert!(matches!(err, DeployError::Timeout { ref what, .. } if what == "slow"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_program_is_toolchain_error() {
        let dir = tempfile::tempdir().unwrap();
        let step = Step::new("nope", "definitely-not-a-real-tool-xyz", &[], Duration::from_secs(5));
        let err = run_step(&step, dir.path()).await.unwrap_err();
        assert!(matches!(err, DeployError::ToolchainUnavailable { .. }));
    }

    #[test]
    fn command_line_joins_program_and_args() {
        let step = Step::new("build", "cargo", &["build", "--release"], Duration::from_secs(1));
        assert_eq!(step.command_line(), "cargo build --release");
    }
}
