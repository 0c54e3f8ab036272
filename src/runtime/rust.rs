use std::path::Path;

use crate::build::{BuildPlan, Step};
use crate::error::DeployError;
use crate::toolchain::Tool;

use super::{PlanContext, RunCommand, RuntimePlan};

/// Name of the binary `cargo build --release` produces for this manifest.
fn binary_name(manifest: &toml::Value) -> Option<String> {
    let from_bin = manifest
        .get("bin")
        .and_then(|b| b.as_array())
        .and_then(|bins| bins.first())
        .and_then(|b| b.get("name"))
        .and_then(|n| n.as_str());
    let from_package = manifest
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str());
    from_bin.or(from_package).map(str::to_string)
}

/// Cargo package names must start with a letter and avoid dots.
fn crate_name(project_id: &str) -> String {
    let name: String = project_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    match name.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => name,
        _ => format!("app_{}", name),
    }
}

/// Write a minimal manifest around a bare `main.rs`.
fn scaffold_manifest(workspace: &Path, project_id: &str) -> Result<String, DeployError> {
    let main = if workspace.join("src/main.rs").is_file() {
        "src/main.rs"
    } else if workspace.join("main.rs").is_file() {
        "main.rs"
    } else {
        return Err(DeployError::invalid("Rust project needs Cargo.toml or main.rs"));
    };
    let name = crate_name(project_id);
    let manifest = format!(
        "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n[[bin]]\nname = \"{name}\"\npath = \"{main}\"\n"
    );
    std::fs::write(workspace.join("Cargo.toml"), manifest)?;
    Ok(name)
}

pub(super) fn plan(ctx: &PlanContext<'_>) -> Result<RuntimePlan, DeployError> {
    let manifest_path = ctx.workspace.join("Cargo.toml");
    let binary = if manifest_path.is_file() {
        let text = std::fs::read_to_string(&manifest_path)?;
        let manifest: toml::Value = toml::from_str(&text)
            .map_err(|e| DeployError::invalid(format!("invalid Cargo.toml: {}", e)))?;
        binary_name(&manifest)
            .ok_or_else(|| DeployError::invalid("Cargo.toml has no package or [[bin]] name"))?
    } else {
        scaffold_manifest(ctx.workspace, ctx.project_id)?
    };

    let build = vec![Step::new(
        "cargo build",
        "cargo",
        &["build", "--release"],
        ctx.timeouts.compile(),
    )
    .env("CARGO_TERM_COLOR", "never")];

    let output = format!("target/release/{}", binary);
    Ok(RuntimePlan {
        tools: vec![Tool::Cargo],
        build: BuildPlan {
            install: Vec::new(),
            build,
            output: Some(output.clone().into()),
            repairable: false,
        },
        run: RunCommand::new(&output, &[]).env("RUST_LOG", "info"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::TimeoutConfig;

    fn plan_in(dir: &Path, id: &str) -> Result<RuntimePlan, DeployError> {
        let timeouts = TimeoutConfig::default();
        plan(&PlanContext {
            workspace: dir,
            project_id: id,
            framework: None,
            timeouts: &timeouts,
        })
    }

    #[test]
    fn binary_name_prefers_bin_table() {
        let manifest: toml::Value = toml::from_str(
            "[package]\nname = \"pkg\"\n[[bin]]\nname = \"server\"\npath = \"src/main.rs\"\n",
        )
        .unwrap();
        assert_eq!(binary_name(&manifest).as_deref(), Some("server"));

        let manifest: toml::Value = toml::from_str("[package]\nname = \"pkg\"\n").unwrap();
        assert_eq!(binary_name(&manifest).as_deref(), Some("pkg"));
    }

    #[test]
    fn existing_manifest_drives_output_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"hello\"\n").unwrap();
        let plan = plan_in(dir.path(), "p1").unwrap();
        assert_eq!(plan.build.output.unwrap().to_str(), Some("target/release/hello"));
        assert_eq!(plan.run.program, "target/release/hello");
        assert_eq!(plan.build.build[0].args, vec!["build", "--release"]);
    }

    #[test]
    fn bare_main_gets_scaffolded_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        let plan = plan_in(dir.path(), "9lives.v2").unwrap();
        assert_eq!(plan.run.program, "target/release/app_9lives_v2");

        let written = std::fs::read_to_string(dir.path().join("Cargo.toml")).unwrap();
        let manifest: toml::Value = toml::from_str(&written).unwrap();
        assert_eq!(binary_name(&manifest).as_deref(), Some("app_9lives_v2"));
        assert_eq!(manifest["bin"][0]["path"].as_str(), Some("main.rs"));
    }

    #[test]
    fn empty_project_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(plan_in(dir.path(), "p"), Err(DeployError::InvalidInput(_))));
    }
}
