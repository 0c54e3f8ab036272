mod go;
pub mod manager;
mod php;
mod python;
mod rust;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::build::BuildPlan;
use crate::config::model::{PortConfig, TimeoutConfig};
use crate::error::DeployError;
use crate::orchestrator::ports::PortPool;
use crate::orchestrator::process::LaunchSpec;
use crate::toolchain::Tool;

pub use manager::{DeployRequest, DeployResponse, ProjectListing, RuntimeManager};

/// Address launched servers bind to; the proxy is their only client.
pub const LOOPBACK: &str = "127.0.0.1";

/// Ecosystems that run as long-lived servers behind the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Python,
    Php,
    Rust,
    Go,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 4] = [
        RuntimeKind::Python,
        RuntimeKind::Php,
        RuntimeKind::Rust,
        RuntimeKind::Go,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RuntimeKind::Python => "python",
            RuntimeKind::Php => "php",
            RuntimeKind::Rust => "rust",
            RuntimeKind::Go => "go",
        }
    }

    pub fn port_pool(&self, ports: &PortConfig) -> PortPool {
        let base = match self {
            RuntimeKind::Python => ports.python_base,
            RuntimeKind::Php => ports.php_base,
            RuntimeKind::Rust => ports.rust_base,
            RuntimeKind::Go => ports.go_base,
        };
        PortPool::new(base, ports.pool_size)
    }

    /// Tools every project of this kind needs; plans may add more.
    pub fn required_tools(&self) -> &'static [Tool] {
        match self {
            RuntimeKind::Python => &[Tool::Python3],
            RuntimeKind::Php => &[Tool::Php],
            RuntimeKind::Rust => &[Tool::Cargo],
            RuntimeKind::Go => &[Tool::Go],
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuntimeKind {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuntimeKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| DeployError::invalid(format!("unknown runtime '{}'", s)))
    }
}

/// Project ids appear in URL paths, directory names and Go module paths.
pub fn validate_project_id(id: &str) -> Result<(), DeployError> {
    if id.is_empty() {
        return Err(DeployError::invalid("project_id is required"));
    }
    if id.len() > 64 {
        return Err(DeployError::invalid("project_id must be at most 64 characters"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || id.starts_with('.')
    {
        return Err(DeployError::invalid(format!(
            "project_id '{}' may only contain letters, digits, '-', '_' and '.'",
            id
        )));
    }
    Ok(())
}

/// How to start the built project. `{host}` and `{port}` in arguments are
/// substituted at launch time; a program containing `/` is resolved
/// against the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl RunCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn render(&self, workspace: &Path, host: &str, port: u16) -> LaunchSpec {
        let fill = |s: &str| s.replace("{host}", host).replace("{port}", &port.to_string());
        let program = if self.program.contains('/') {
            workspace.join(&self.program).to_string_lossy().into_owned()
        } else {
            self.program.clone()
        };
        let mut spec = LaunchSpec {
            program,
            args: self.args.iter().map(|a| fill(a)).collect(),
            env: self.env.iter().map(|(k, v)| (k.clone(), fill(v))).collect(),
            dir: workspace.to_path_buf(),
        };
        spec.env.insert("PORT".to_string(), port.to_string());
        spec.env.insert("HOST".to_string(), host.to_string());
        spec
    }
}

/// Everything needed to build and start one project.
#[derive(Debug, Clone)]
pub struct RuntimePlan {
    pub tools: Vec<Tool>,
    pub build: BuildPlan,
    pub run: RunCommand,
}

/// Inputs to plan construction.
pub struct PlanContext<'a> {
    pub workspace: &'a Path,
    pub project_id: &'a str,
    pub framework: Option<&'a str>,
    pub timeouts: &'a TimeoutConfig,
}

impl PlanContext<'_> {
    pub fn framework_is(&self, name: &str) -> bool {
        self.framework
            .map(|f| f.trim().eq_ignore_ascii_case(name))
            .unwrap_or(false)
    }
}

/// Per-kind parameters of the generic runtime manager.
#[derive(Debug, Clone)]
pub struct RuntimeDescriptor {
    pub kind: RuntimeKind,
    pub pool: PortPool,
}

impl RuntimeDescriptor {
    pub fn new(kind: RuntimeKind, ports: &PortConfig) -> Self {
        Self {
            kind,
            pool: kind.port_pool(ports),
        }
    }

    /// Path segment the proxy serves this kind under, e.g. `go-app`.
    pub fn proxy_prefix(&self) -> String {
        format!("{}-app", self.kind)
    }

    pub fn plan(&self, ctx: &PlanContext<'_>) -> Result<RuntimePlan, DeployError> {
        match self.kind {
            RuntimeKind::Python => python::plan(ctx),
            RuntimeKind::Php => php::plan(ctx),
            RuntimeKind::Rust => rust::plan(ctx),
            RuntimeKind::Go => go::plan(ctx),
        }
    }
}

/// Relative paths of files under `root` with the given extension, skipping
/// dependency and build directories.
pub(crate) fn files_with_extension(root: &Path, ext: &str) -> Vec<String> {
    const SKIP: &[&str] = &["vendor", "node_modules", ".venv", "target", ".git"];

    fn walk(root: &Path, dir: &Path, ext: &str, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = entry.file_name();
                if !SKIP.iter().any(|s| name == *s) {
                    walk(root, &path, ext, out);
                }
            } else if path.extension().is_some_and(|e| e == ext) {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
    }

    let mut out = Vec::new();
    walk(root, root, ext, &mut out);
    out.sort();
    out
}
