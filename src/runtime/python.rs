use crate::build::{BuildPlan, Step};
use crate::error::DeployError;
use crate::toolchain::Tool;

use super::{PlanContext, RunCommand, RuntimePlan};

const ENTRY_CANDIDATES: &[&str] = &["app.py", "main.py", "server.py", "run.py", "wsgi.py"];

fn entry_point(ctx: &PlanContext<'_>) -> Result<String, DeployError> {
    if let Some(found) = ENTRY_CANDIDATES
        .iter()
        .find(|name| ctx.workspace.join(name).is_file())
    {
        return Ok(found.to_string());
    }
    // Fall back to the only top-level module, if there is exactly one.
    let top_level: Vec<String> = std::fs::read_dir(ctx.workspace)?
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(".py"))
        .collect();
    match top_level.as_slice() {
        [only] => Ok(only.clone()),
        _ => Err(DeployError::invalid(format!(
            "no Python entry point found; add one of {}",
            ENTRY_CANDIDATES.join(", ")
        ))),
    }
}

pub(super) fn plan(ctx: &PlanContext<'_>) -> Result<RuntimePlan, DeployError> {
    let timeouts = ctx.timeouts;
    let has_requirements = ctx.workspace.join("requirements.txt").is_file();
    let python = if has_requirements { ".venv/bin/python" } else { "python3" };

    let mut install = Vec::new();
    if has_requirements {
        install.push(Step::new("venv", "python3", &["-m", "venv", ".venv"], timeouts.install()));
        install.push(Step::new(
            "pip install",
            ".venv/bin/python",
            &["-m", "pip", "install", "--disable-pip-version-check", "-r", "requirements.txt"],
            timeouts.install(),
        ));
    }

    // Byte-compiling everything surfaces syntax errors before launch.
    let build = vec![Step::new(
        "syntax check",
        "python3",
        &["-m", "compileall", "-q", "-x", r"\.venv", "."],
        timeouts.compile(),
    )];

    let run = if ctx.workspace.join("manage.py").is_file() || ctx.framework_is("django") {
        RunCommand::new(python, &["manage.py", "runserver", "{host}:{port}", "--noreload"])
    } else if ctx.framework_is("fastapi") {
        let entry = entry_point(ctx)?;
        let module = format!("{}:app", entry.trim_end_matches(".py"));
        RunCommand::new(
            python,
            &["-m", "uvicorn", module.as_str(), "--host", "{host}", "--port", "{port}"],
        )
    } else {
        let entry = entry_point(ctx)?;
        RunCommand::new(python, &[entry.as_str()])
            .env("FLASK_RUN_HOST", "{host}")
            .env("FLASK_RUN_PORT", "{port}")
    }
    .env("PYTHONUNBUFFERED", "1");

    Ok(RuntimePlan {
        tools: vec![Tool::Python3],
        build: BuildPlan {
            install,
            build,
            output: None,
            repairable: false,
        },
        run,
    })
}
