use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::config::model::ServerConfig;
use crate::config::resolve_config;
use crate::orchestrator::Orchestrator;
use crate::server;

/// Flags and their environment variables win over the config file.
pub fn apply_overrides(config: &mut ServerConfig, args: ServeArgs) {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(url) = args.public_url {
        config.server.public_url = Some(url);
    }
}

pub async fn run(config_file: Option<&Path>, args: ServeArgs) -> Result<()> {
    let mut config = resolve_config(config_file)?;
    apply_overrides(&mut config, args);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let orchestrator = Arc::new(Orchestrator::new(config).context("initialising orchestrator")?);

    let missing: Vec<&str> = orchestrator
        .toolchain()
        .probe_all()
        .await
        .into_iter()
        .filter(|s| !s.available)
        .map(|s| s.tool.name())
        .collect();
    if !missing.is_empty() {
        warn!(tools = %missing.join(", "), "some toolchains are missing; run `shipwright doctor`");
    }

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(public_url = %orchestrator.config().server.public_base(), "shipwright ready");

    let cancel = CancellationToken::new();
    server::cancel_on_signal(cancel.clone());
    server::serve(orchestrator, listener, cancel).await
}
