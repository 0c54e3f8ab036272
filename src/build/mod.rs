pub mod exec;
pub mod npm;
pub mod repair;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DeployError;

pub use exec::{run_step, Step, StepOutput};
pub use repair::{AutoRepair, Repair};

/// The subprocess steps that turn a workspace into something runnable.
#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    /// Dependency installation; re-run when a repair touches the manifest.
    pub install: Vec<Step>,
    pub build: Vec<Step>,
    /// Where the result lands, relative to the workspace.
    pub output: Option<PathBuf>,
    /// Consult the Auto-Repair rules when a step fails.
    pub repairable: bool,
}

impl BuildPlan {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.build.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    pub success: bool,
    /// Absolute path of the build output, when the plan names one.
    pub output_path: Option<PathBuf>,
    pub stdout: String,
    pub stderr: String,
    /// The step that failed, if any.
    pub failed_step: Option<String>,
    pub repairs: Vec<Repair>,
}

impl BuildResult {
    pub fn combined(&self) -> String {
        StepOutput {
            success: self.success,
            code: None,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
        .combined()
    }

    /// Turn an unsuccessful build into `BuildFailed` carrying the tool output.
    pub fn into_result(self) -> Result<BuildResult, DeployError> {
        if self.success {
            return Ok(self);
        }
        let step = self.failed_step.as_deref().unwrap_or("build");
        Err(DeployError::BuildFailed {
            message: format!("{} failed", step),
            output: self.combined(),
        })
    }
}

enum Outcome {
    Passed,
    Failed { step: Step, output: StepOutput },
}

async fn run_all(steps: &[Step], workspace: &Path) -> Result<Outcome, DeployError> {
    for step in steps {
        let output = run_step(step, workspace).await?;
        if !output.success {
            return Ok(Outcome::Failed {
                step: step.clone(),
                output,
            });
        }
    }
    Ok(Outcome::Passed)
}

fn step_dir(workspace: &Path, step: &Step) -> PathBuf {
    match &step.subdir {
        Some(sub) => workspace.join(sub),
        None => workspace.to_path_buf(),
    }
}

/// Run install then build steps, patching and retrying through Auto-Repair
/// when the plan allows it.
///
/// Non-zero exits come back as `BuildResult { success: false, .. }`; a
/// missing tool or a timed-out step is an `Err`.
pub async fn build(workspace: &Path, plan: &BuildPlan) -> Result<BuildResult, DeployError> {
    let mut repairer = AutoRepair::default();
    let mut install_pending = true;

    loop {
        let phase = if install_pending {
            install_pending = false;
            match run_all(&plan.install, workspace).await? {
                Outcome::Passed => run_all(&plan.build, workspace).await?,
                failed => failed,
            }
        } else {
            run_all(&plan.build, workspace).await?
        };

        let (step, output) = match phase {
            Outcome::Passed => {
                info!(
                    workspace = %workspace.display(),
                    repairs = repairer.attempts(),
                    "build succeeded"
                );
                return Ok(BuildResult {
                    success: true,
                    output_path: plan.output.as_ref().map(|o| workspace.join(o)),
                    repairs: repairer.applied().to_vec(),
                    ..Default::default()
                });
            }
            Outcome::Failed { step, output } => (step, output),
        };

        warn!(step = %step.label, code = ?output.code, "build step failed");

        if plan.repairable {
            if let Some(repair) = repairer.try_repair(&step_dir(workspace, &step), &output.combined()) {
                install_pending = repair.reinstall;
                continue;
            }
        }

        return Ok(BuildResult {
            success: false,
            output_path: None,
            stdout: output.stdout,
            stderr: output.stderr,
            failed_step: Some(step.label),
            repairs: repairer.applied().to_vec(),
        });
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(label: &str, script: &str) -> Step {
        Step::new(label, "sh", &["-c", script], Duration::from_secs(10))
    }

    #[tokio::test]
    async fn empty_plan_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let result = build(dir.path(), &BuildPlan::default()).await.unwrap();
        assert!(result.success);
        assert!(result.output_path.is_none());
    }

    #[tokio::test]
    async fn failing_step_reports_output_without_repair() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan {
            build: vec![sh("compile", "echo 'syntax error' >&2; exit 1"), sh("never", "touch ran")],
            ..Default::default()
        };
        let result = build(dir.path(), &plan).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_step.as_deref(), Some("compile"));
        assert!(!dir.path().join("ran").exists());

        let err = result.into_result().unwrap_err();
        match err {
            DeployError::BuildFailed { message, output } => {
                assert_eq!(message, "compile failed");
                assert!(output.contains("syntax error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_module_is_repaired_and_reinstalled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "app"}"#).unwrap();

        // "install" counts its runs; "build" passes once lodash is in the manifest.
        let plan = BuildPlan {
            install: vec![sh("install", "echo x >> installs")],
            build: vec![sh(
                "build",
                "grep -q lodash package.json || { echo \"Cannot find module 'lodash'\" >&2; exit 1; }; mkdir -p dist",
            )],
            output: Some(PathBuf::from("dist")),
            repairable: true,
        };
        let result = build(dir.path(), &plan).await.unwrap();
        assert!(result.success);
        assert_eq!(result.repairs.len(), 1);
        assert_eq!(result.output_path, Some(dir.path().join("dist")));

        let installs = std::fs::read_to_string(dir.path().join("installs")).unwrap();
        assert_eq!(installs.lines().count(), 2);
    }

    #[tokio::test]
    async fn repeated_failure_stops_after_bounded_repairs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"name": "app"}"#).unwrap();

        // Each run names a fresh missing package, so every repair "works"
        // but the build never passes.
        let plan = BuildPlan {
            build: vec![sh(
                "build",
                "echo x >> attempts; n=$(wc -l < attempts); echo \"Cannot find module 'pkg$n'\" >&2; exit 1",
            )],
            repairable: true,
            ..Default::default()
        };
        let result = build(dir.path(), &plan).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.repairs.len(), repair::MAX_REPAIR_ATTEMPTS as usize);

        let attempts = std::fs::read_to_string(dir.path().join("attempts")).unwrap();
        assert_eq!(attempts.lines().count(), repair::MAX_REPAIR_ATTEMPTS as usize + 1);
    }

    #[tokio::test]
    async fn step_timeout_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let plan = BuildPlan {
            build: vec![Step::new("slow", "sleep", &["30"], Duration::from_millis(200))],
            ..Default::default()
        };
        let err = build(dir.path(), &plan).await.unwrap_err();
        assert!(matches!(err, DeployError::Timeout { .. }));
    }
}
