use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::error::DeployError;

/// External tools the orchestrator shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    Node,
    Npm,
    Wrangler,
    Python3,
    Pip,
    Php,
    Composer,
    Cargo,
    Rustc,
    Go,
    Java,
    Gradle,
    AndroidSdk,
}

impl Tool {
    pub const ALL: [Tool; 13] = [
        Tool::Node,
        Tool::Npm,
        Tool::Wrangler,
        Tool::Python3,
        Tool::Pip,
        Tool::Php,
        Tool::Composer,
        Tool::Cargo,
        Tool::Rustc,
        Tool::Go,
        Tool::Java,
        Tool::Gradle,
        Tool::AndroidSdk,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Node => "node",
            Tool::Npm => "npm",
            Tool::Wrangler => "wrangler",
            Tool::Python3 => "python3",
            Tool::Pip => "pip",
            Tool::Php => "php",
            Tool::Composer => "composer",
            Tool::Cargo => "cargo",
            Tool::Rustc => "rustc",
            Tool::Go => "go",
            Tool::Java => "java",
            Tool::Gradle => "gradle",
            Tool::AndroidSdk => "android-sdk",
        }
    }

    /// Program and arguments that print a version and exit 0 when present.
    fn version_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Tool::Node => ("node", &["--version"]),
            Tool::Npm => ("npm", &["--version"]),
            Tool::Wrangler => ("npx", &["--no-install", "wrangler", "--version"]),
            Tool::Python3 => ("python3", &["--version"]),
            Tool::Pip => ("python3", &["-m", "pip", "--version"]),
            Tool::Php => ("php", &["--version"]),
            Tool::Composer => ("composer", &["--version"]),
            Tool::Cargo => ("cargo", &["--version"]),
            Tool::Rustc => ("rustc", &["--version"]),
            Tool::Go => ("go", &["version"]),
            Tool::Java => ("java", &["-version"]),
            Tool::Gradle => ("gradle", &["--version"]),
            // Checked by directory layout, see `probe_android_sdk`.
            Tool::AndroidSdk => ("sdkmanager", &["--version"]),
        }
    }

    /// Exact command an operator runs to install the tool.
    pub fn remediation(&self) -> &'static str {
        match self {
            Tool::Node | Tool::Npm => {
                "curl -fsSL https://deb.nodesource.com/setup_20.x | bash - && apt-get install -y nodejs"
            }
            Tool::Wrangler => "npm install -g wrangler",
            Tool::Python3 => "apt-get install -y python3",
            Tool::Pip => "apt-get install -y python3-pip",
            Tool::Php => "apt-get install -y php-cli",
            Tool::Composer => {
                "curl -sS https://getcomposer.org/installer | php -- --install-dir=/usr/local/bin --filename=composer"
            }
            Tool::Cargo | Tool::Rustc => "curl --proto '=https' --tlsv1.2 -sSf https://sh.rustup.rs | sh -s -- -y",
            Tool::Go => "apt-get install -y golang-go",
            Tool::Java => "apt-get install -y openjdk-17-jdk",
            Tool::Gradle => "apt-get install -y gradle",
            Tool::AndroidSdk => {
                "install the Android command-line tools, run `sdkmanager \"platforms;android-34\" \"build-tools;34.0.0\"` and export ANDROID_HOME"
            }
        }
    }
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: Tool,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Read-only capability detection for the external toolchains.
#[derive(Debug, Clone)]
pub struct Toolchain {
    timeout: Duration,
    android_home: Option<PathBuf>,
}

impl Toolchain {
    pub fn new(timeout: Duration, android_home: Option<PathBuf>) -> Self {
        Self {
            timeout,
            android_home,
        }
    }

    pub fn android_home(&self) -> Option<&Path> {
        self.android_home.as_deref()
    }

    pub async fn available(&self, tool: Tool) -> bool {
        self.probe(tool).await.available
    }

    /// Probe a single tool. Never fails: a missing tool, a non-zero exit and
    /// a timeout all report `available: false`.
    pub async fn probe(&self, tool: Tool) -> ToolStatus {
        if tool == Tool::AndroidSdk {
            return probe_android_sdk(self.android_home.as_deref());
        }

        let (program, args) = tool.version_command();
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let version = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                // Some tools (java) print their version to stderr.
                let text = if stdout.trim().is_empty() {
                    String::from_utf8_lossy(&output.stderr).to_string()
                } else {
                    stdout.to_string()
                };
                Some(text.lines().next().unwrap_or_default().trim().to_string())
            }
            Ok(Ok(output)) => {
                debug!(tool = %tool, code = ?output.status.code(), "version check exited non-zero");
                None
            }
            Ok(Err(e)) => {
                debug!(tool = %tool, error = %e, "version check could not launch");
                None
            }
            Err(_) => {
                debug!(tool = %tool, "version check timed out");
                None
            }
        };

        ToolStatus {
            tool,
            available: version.is_some(),
            version,
        }
    }

    pub async fn probe_all(&self) -> Vec<ToolStatus> {
        join_all(Tool::ALL.iter().map(|tool| self.probe(*tool))).await
    }

    /// Fail with `ToolchainUnavailable` for the first missing tool.
    pub async fn require(&self, tools: &[Tool]) -> Result<(), DeployError> {
        for tool in tools {
            if !self.available(*tool).await {
                return Err(DeployError::ToolchainUnavailable {
                    tool: tool.name().to_string(),
                    remediation: tool.remediation().to_string(),
                });
            }
        }
        Ok(())
    }
}

fn probe_android_sdk(home: Option<&Path>) -> ToolStatus {
    let found = home
        .filter(|h| h.is_dir())
        .filter(|h| h.join("platforms").is_dir() || h.join("build-tools").is_dir());
    ToolStatus {
        tool: Tool::AndroidSdk,
        available: found.is_some(),
        version: found.map(|h| h.display().to_string()),
    }
}
