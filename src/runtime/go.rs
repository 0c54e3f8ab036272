use crate::build::{BuildPlan, Step};
use crate::error::DeployError;
use crate::toolchain::Tool;

use super::{files_with_extension, PlanContext, RunCommand, RuntimePlan};

const BINARY: &str = "app";

pub(super) fn plan(ctx: &PlanContext<'_>) -> Result<RuntimePlan, DeployError> {
    if files_with_extension(ctx.workspace, "go").is_empty() {
        return Err(DeployError::invalid("no .go files in project"));
    }
    let timeouts = ctx.timeouts;

    let mut install = Vec::new();
    if !ctx.workspace.join("go.mod").is_file() {
        install.push(Step::new(
            "go mod init",
            "go",
            &["mod", "init", ctx.project_id],
            timeouts.probe(),
        ));
    }
    install.push(Step::new("go mod tidy", "go", &["mod", "tidy"], timeouts.install()));

    let build = vec![Step::new(
        "go build",
        "go",
        &["build", "-o", BINARY, "."],
        timeouts.compile(),
    )];

    let mut run = RunCommand::new(&format!("./{}", BINARY), &[]);
    if ctx.framework_is("gin") {
        run = run.env("GIN_MODE", "release");
    }

    Ok(RuntimePlan {
        tools: vec![Tool::Go],
        build: BuildPlan {
            install,
            build,
            output: Some(BINARY.into()),
            repairable: false,
        },
        run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::TimeoutConfig;

    fn plan_for(files: &[&str], framework: Option<&str>) -> Result<RuntimePlan, DeployError> {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), "package main").unwrap();
        }
        let timeouts = TimeoutConfig::default();
        plan(&PlanContext {
            workspace: dir.path(),
            project_id: "p1",
            framework,
            timeouts: &timeouts,
        })
    }

    #[test]
    fn missing_go_mod_is_initialised() {
        let plan = plan_for(&["main.go"], None).unwrap();
        let labels: Vec<_> = plan.build.install.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["go mod init", "go mod tidy"]);
        assert_eq!(plan.build.install[0].args, vec!["mod", "init", "p1"]);
        assert_eq!(plan.run.program, "./app");
        assert!(plan.run.env.is_empty());
    }

    #[test]
    fn existing_go_mod_only_tidies() {
        let plan = plan_for(&["main.go", "go.mod"], None).unwrap();
        assert_eq!(plan.build.install.len(), 1);
    }

    #[test]
    fn gin_runs_in_release_mode() {
        let plan = plan_for(&["main.go"], Some("gin")).unwrap();
        assert_eq!(plan.run.env["GIN_MODE"], "release");
    }

    #[test]
    fn project_without_go_sources_is_rejected() {
        assert!(plan_for(&["README.md"], None).is_err());
    }
}
