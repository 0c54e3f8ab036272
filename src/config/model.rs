use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ListenConfig,
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub ports: PortConfig,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub android: AndroidConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base used when handing addressable URLs back to callers.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ListenConfig {
    pub fn public_base(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudflareConfig {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub zone_id: Option<String>,
    /// Domain under which `<subdomain>.<base_domain>` custom domains are attached.
    #[serde(default)]
    pub base_domain: Option<String>,
}

fn default_probe_secs() -> u64 {
    10
}

fn default_install_secs() -> u64 {
    300
}

fn default_compile_secs() -> u64 {
    600
}

fn default_launch_grace_ms() -> u64 {
    2500
}

fn default_terminate_grace_secs() -> u64 {
    5
}

fn default_proxy_secs() -> u64 {
    30
}

fn default_deploy_cli_secs() -> u64 {
    300
}

fn default_domain_cli_secs() -> u64 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_install_secs")]
    pub install_secs: u64,
    #[serde(default = "default_compile_secs")]
    pub compile_secs: u64,
    #[serde(default = "default_launch_grace_ms")]
    pub launch_grace_ms: u64,
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
    #[serde(default = "default_proxy_secs")]
    pub proxy_secs: u64,
    #[serde(default = "default_deploy_cli_secs")]
    pub deploy_cli_secs: u64,
    #[serde(default = "default_domain_cli_secs")]
    pub domain_cli_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            install_secs: default_install_secs(),
            compile_secs: default_compile_secs(),
            launch_grace_ms: default_launch_grace_ms(),
            terminate_grace_secs: default_terminate_grace_secs(),
            proxy_secs: default_proxy_secs(),
            deploy_cli_secs: default_deploy_cli_secs(),
            domain_cli_secs: default_domain_cli_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn compile(&self) -> Duration {
        Duration::from_secs(self.compile_secs)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn proxy(&self) -> Duration {
        Duration::from_secs(self.proxy_secs)
    }

    pub fn deploy_cli(&self) -> Duration {
        Duration::from_secs(self.deploy_cli_secs)
    }

    pub fn domain_cli(&self) -> Duration {
        Duration::from_secs(self.domain_cli_secs)
    }
}

fn default_python_base() -> u16 {
    10000
}

fn default_php_base() -> u16 {
    11000
}

fn default_rust_base() -> u16 {
    12000
}

fn default_go_base() -> u16 {
    13000
}

fn default_pool_size() -> u16 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    #[serde(default = "default_python_base")]
    pub python_base: u16,
    #[serde(default = "default_php_base")]
    pub php_base: u16,
    #[serde(default = "default_rust_base")]
    pub rust_base: u16,
    #[serde(default = "default_go_base")]
    pub go_base: u16,
    #[serde(default = "default_pool_size")]
    pub pool_size: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            python_base: default_python_base(),
            php_base: default_php_base(),
            rust_base: default_rust_base(),
            go_base: default_go_base(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_deploy_attempts() -> u32 {
    3
}

fn default_deploy_backoff_secs() -> u64 {
    5
}

fn default_domain_attempts() -> u32 {
    3
}

fn default_domain_backoff_secs() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    #[serde(default = "default_deploy_attempts")]
    pub deploy_attempts: u32,
    #[serde(default = "default_deploy_backoff_secs")]
    pub deploy_backoff_secs: u64,
    #[serde(default = "default_domain_attempts")]
    pub domain_attempts: u32,
    #[serde(default = "default_domain_backoff_secs")]
    pub domain_backoff_secs: u64,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            deploy_attempts: default_deploy_attempts(),
            deploy_backoff_secs: default_deploy_backoff_secs(),
            domain_attempts: default_domain_attempts(),
            domain_backoff_secs: default_domain_backoff_secs(),
        }
    }
}

fn default_artifact_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct AndroidConfig {
    #[serde(default)]
    pub android_home: Option<PathBuf>,
    #[serde(default = "default_artifact_ttl_secs")]
    pub artifact_ttl_secs: u64,
    /// Where built APKs are kept until they expire. Defaults to the OS temp dir.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

impl Default for AndroidConfig {
    fn default() -> Self {
        Self {
            android_home: None,
            artifact_ttl_secs: default_artifact_ttl_secs(),
            artifact_dir: None,
        }
    }
}

impl AndroidConfig {
    pub fn artifact_ttl(&self) -> Duration {
        Duration::from_secs(self.artifact_ttl_secs)
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("shipwright-apks"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.timeouts.install(), Duration::from_secs(300));
        assert_eq!(cfg.timeouts.compile(), Duration::from_secs(600));
        assert_eq!(cfg.timeouts.proxy(), Duration::from_secs(30));
        assert_eq!(cfg.ports.go_base, 13000);
        assert_eq!(cfg.pages.deploy_attempts, 3);
        assert_eq!(cfg.android.artifact_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let cfg: ServerConfig = toml::from_str(
            r#"
[server]
port = 8080
public_url = "https://api.example.com/"

[timeouts]
compile_secs = 120

[ports]
go_base = 20000
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.public_base(), "https://api.example.com");
        assert_eq!(cfg.timeouts.compile_secs, 120);
        assert_eq!(cfg.timeouts.install_secs, 300);
        assert_eq!(cfg.ports.go_base, 20000);
        assert_eq!(cfg.ports.python_base, 10000);
    }

    #[test]
    fn public_base_defaults_to_localhost() {
        let listen = ListenConfig {
            port: 9000,
            ..ListenConfig::default()
        };
        assert_eq!(listen.public_base(), "http://localhost:9000");
    }
}
