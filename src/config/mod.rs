pub mod model;

use std::path::Path;

use model::ServerConfig;

/// Looked up in the working directory when no `--file` is given.
pub const DEFAULT_CONFIG_FILE: &str = "shipwright.toml";

pub fn load_config(path: &Path) -> anyhow::Result<ServerConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: ServerConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok(config)
}

/// Load the explicit config file, else `shipwright.toml` if present, else
/// defaults; then fill gaps from the environment.
pub fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<ServerConfig> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).is_file() => load_config(Path::new(DEFAULT_CONFIG_FILE))?,
        None => ServerConfig::default(),
    };
    apply_env(&mut config);
    Ok(config)
}

/// Fill credentials and SDK paths from the process environment where the
/// config file left them unset.
pub fn apply_env(config: &mut ServerConfig) {
    fn env(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    let cf = &mut config.cloudflare;
    if cf.api_token.is_none() {
        cf.api_token = env("CLOUDFLARE_API_TOKEN");
    }
    if cf.account_id.is_none() {
        cf.account_id = env("CLOUDFLARE_ACCOUNT_ID");
    }
    if cf.zone_id.is_none() {
        cf.zone_id = env("CLOUDFLARE_ZONE_ID");
    }
    if cf.base_domain.is_none() {
        cf.base_domain = env("PAGES_BASE_DOMAIN");
    }

    if config.android.android_home.is_none() {
        config.android.android_home = env("ANDROID_HOME")
            .or_else(|| env("ANDROID_SDK_ROOT"))
            .map(Into::into);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipwright.toml");
        std::fs::write(&path, "[server\nport = 1").unwrap();
        let err = load_config(&path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
        assert!(err.contains("shipwright.toml"));
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipwright.toml");
        std::fs::write(&path, "[cloudflare]\naccount_id = \"abc\"\n").unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.cloudflare.account_id.as_deref(), Some("abc"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn apply_env_keeps_explicit_values() {
        let mut cfg = ServerConfig::default();
        cfg.cloudflare.account_id = Some("from-file".into());
        apply_env(&mut cfg);
        assert_eq!(cfg.cloudflare.account_id.as_deref(), Some("from-file"));
    }
}
