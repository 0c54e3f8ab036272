use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::build::{npm, BuildPlan, Step};
use crate::config::model::TimeoutConfig;

/// The client-side-routing rule Pages understands.
pub const SPA_FALLBACK: &str = "/* /index.html 200\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SiteFramework {
    Vite,
    Next,
    CreateReactApp,
    Astro,
    /// package.json with a build script but no recognised framework.
    Npm,
    /// Plain files, deployed as-is.
    Static,
}

impl SiteFramework {
    /// Conventional output directory, relative to the project root.
    pub fn output_dir(&self) -> &'static str {
        match self {
            SiteFramework::Vite | SiteFramework::Astro | SiteFramework::Npm => "dist",
            SiteFramework::Next => "out",
            SiteFramework::CreateReactApp => "build",
            SiteFramework::Static => ".",
        }
    }

    pub fn needs_build(&self) -> bool {
        *self != SiteFramework::Static
    }
}

pub fn detect_framework(manifest: Option<&Value>) -> SiteFramework {
    let Some(manifest) = manifest else {
        return SiteFramework::Static;
    };
    let has = |pkg: &str| npm::has_dependency(manifest, pkg);
    let build_script = npm::script(manifest, "build").unwrap_or_default();

    if has("next") {
        SiteFramework::Next
    } else if has("astro") {
        SiteFramework::Astro
    } else if has("vite") || build_script.contains("vite") {
        SiteFramework::Vite
    } else if has("react-scripts") {
        SiteFramework::CreateReactApp
    } else if !build_script.is_empty() {
        SiteFramework::Npm
    } else {
        SiteFramework::Static
    }
}

/// Client-routed apps need every unknown path to serve index.html.
pub fn is_single_page_app(framework: SiteFramework, manifest: Option<&Value>) -> bool {
    const ROUTERS: &[&str] = &["react-router-dom", "react-router", "vue-router", "@tanstack/react-router", "svelte-routing"];
    match framework {
        SiteFramework::Vite | SiteFramework::CreateReactApp => true,
        SiteFramework::Next | SiteFramework::Astro | SiteFramework::Static => false,
        SiteFramework::Npm => manifest.is_some_and(|m| ROUTERS.iter().any(|r| npm::has_dependency(m, r))),
    }
}

/// A prepared static-site project: framework, plan and where output lands.
#[derive(Debug, Clone)]
pub struct SitePlan {
    pub framework: SiteFramework,
    pub spa: bool,
    pub build: BuildPlan,
    pub output_dir: PathBuf,
    /// `--verbose` was removed from the build script.
    pub sanitized: bool,
}

/// Inspect the project in `dir`, sanitise its build script and produce the
/// npm install/build plan.
pub fn prepare(dir: &Path, timeouts: &TimeoutConfig) -> anyhow::Result<SitePlan> {
    let sanitized = npm::strip_verbose_flag(dir)?;
    if sanitized {
        info!("removed --verbose from build script");
    }

    let manifest = npm::read_manifest(dir);
    let framework = detect_framework(manifest.as_ref());
    let spa = is_single_page_app(framework, manifest.as_ref());
    debug!(framework = ?framework, spa, "static site detected");

    let build = if framework.needs_build() {
        BuildPlan {
            install: vec![Step::new(
                "npm install",
                "npm",
                &["install", "--no-audit", "--no-fund", "--loglevel=error"],
                timeouts.install(),
            )],
            build: vec![Step::new("npm run build", "npm", &["run", "build"], timeouts.compile())
                .env("CI", "true")],
            output: Some(framework.output_dir().into()),
            repairable: true,
        }
    } else {
        BuildPlan {
            output: Some(".".into()),
            ..Default::default()
        }
    };

    Ok(SitePlan {
        framework,
        spa,
        output_dir: dir.join(framework.output_dir()),
        build,
        sanitized,
    })
}

/// Write `_redirects` with the SPA rule unless the output already has one.
/// Returns `true` if the file was written.
pub fn ensure_spa_fallback(output_dir: &Path) -> std::io::Result<bool> {
    let path = output_dir.join("_redirects");
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(&path, SPA_FALLBACK)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn framework_detection() {
        assert_eq!(detect_framework(None), SiteFramework::Static);
        assert_eq!(
            detect_framework(Some(&json!({"devDependencies": {"vite": "^5"}}))),
            SiteFramework::Vite
        );
        assert_eq!(
            detect_framework(Some(&json!({"dependencies": {"next": "14", "react": "18"}}))),
            SiteFramework::Next
        );
        assert_eq!(
            detect_framework(Some(&json!({"dependencies": {"react-scripts": "5"}}))),
            SiteFramework::CreateReactApp
        );
        assert_eq!(
            detect_framework(Some(&json!({"scripts": {"build": "parcel build index.html"}}))),
            SiteFramework::Npm
        );
        assert_eq!(detect_framework(Some(&json!({"name": "x"}))), SiteFramework::Static);
    }

    #[test]
    fn output_dirs_differ_per_framework() {
        assert_eq!(SiteFramework::Vite.output_dir(), "dist");
        assert_eq!(SiteFramework::Next.output_dir(), "out");
        assert_eq!(SiteFramework::CreateReactApp.output_dir(), "build");
        assert_eq!(SiteFramework::Static.output_dir(), ".");
    }

    #[test]
    fn spa_heuristic() {
        assert!(is_single_page_app(SiteFramework::Vite, None));
        assert!(!is_single_page_app(SiteFramework::Static, None));
        let routed = json!({"dependencies": {"vue-router": "4"}});
        assert!(is_single_page_app(SiteFramework::Npm, Some(&routed)));
        assert!(!is_single_page_app(SiteFramework::Npm, Some(&json!({}))));
    }

    #[test]
    fn prepare_strips_verbose_and_plans_npm_build() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"scripts": {"build": "vite build --verbose"}, "devDependencies": {"vite": "^5"}}"#,
        )
        .unwrap();
        let plan = prepare(dir.path(), &TimeoutConfig::default()).unwrap();
        assert!(plan.sanitized);
        assert!(plan.spa);
        assert_eq!(plan.framework, SiteFramework::Vite);
        assert_eq!(plan.output_dir, dir.path().join("dist"));
        assert!(plan.build.repairable);
        assert_eq!(plan.build.build[0].command_line(), "npm run build");

        let manifest = npm::read_manifest(dir.path()).unwrap();
        assert_eq!(npm::script(&manifest, "build"), Some("vite build"));
    }

    #[test]
    fn plain_site_has_no_steps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        let plan = prepare(dir.path(), &TimeoutConfig::default()).unwrap();
        assert_eq!(plan.framework, SiteFramework::Static);
        assert!(plan.build.is_empty());
        assert!(!plan.sanitized);
    }

    #[test]
    fn spa_fallback_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_spa_fallback(dir.path()).unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("_redirects")).unwrap(),
            "/* /index.html 200\n"
        );
        std::fs::write(dir.path().join("_redirects"), "/old /new 301\n").unwrap();
        assert!(!ensure_spa_fallback(dir.path()).unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("_redirects")).unwrap(),
            "/old /new 301\n"
        );
    }
}
