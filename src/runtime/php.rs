use crate::build::{BuildPlan, Step};
use crate::error::DeployError;
use crate::toolchain::Tool;

use super::{files_with_extension, PlanContext, RunCommand, RuntimePlan};

pub(super) fn plan(ctx: &PlanContext<'_>) -> Result<RuntimePlan, DeployError> {
    let timeouts = ctx.timeouts;
    let sources = files_with_extension(ctx.workspace, "php");
    if sources.is_empty() {
        return Err(DeployError::invalid("no .php files in project"));
    }

    let mut tools = vec![Tool::Php];
    let mut install = Vec::new();
    if ctx.workspace.join("composer.json").is_file() {
        tools.push(Tool::Composer);
        install.push(Step::new(
            "composer install",
            "composer",
            &["install", "--no-interaction", "--no-progress", "--prefer-dist"],
            timeouts.install(),
        ));
    }

    let build = sources
        .iter()
        .map(|file| Step::new(&format!("php -l {}", file), "php", &["-l", file], timeouts.probe()))
        .collect();

    let run = if ctx.workspace.join("artisan").is_file() || ctx.framework_is("laravel") {
        RunCommand::new("php", &["artisan", "serve", "--host={host}", "--port={port}"])
    } else {
        let docroot = if ctx.workspace.join("public/index.php").is_file()
            || ctx.workspace.join("public/index.html").is_file()
        {
            "public"
        } else {
            "."
        };
        RunCommand::new("php", &["-S", "{host}:{port}", "-t", docroot])
    };

    Ok(RuntimePlan {
        tools,
        build: BuildPlan {
            install,
            build,
            output: None,
            repairable: false,
        },
        run,
    })
}
