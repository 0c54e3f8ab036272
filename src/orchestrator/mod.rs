pub mod ports;
pub mod process;
pub mod registry;

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use tracing::info;

use crate::android::AndroidDriver;
use crate::config::model::ServerConfig;
use crate::error::DeployError;
use crate::pages::PagesDriver;
use crate::proxy::{ProxyRequest, ReverseProxy};
use crate::runtime::{RuntimeKind, RuntimeManager};
use crate::toolchain::{Tool, ToolStatus, Toolchain};

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub running_projects: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeCounts {
    pub running: usize,
    pub port_base: u16,
    pub port_limit: u16,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub success: bool,
    pub tools: Vec<ToolStatus>,
    pub runtimes: BTreeMap<RuntimeKind, RuntimeCounts>,
    pub pages_available: bool,
    pub android_available: bool,
    pub android_builds: usize,
}

/// Owns every runtime manager plus the Pages and Android drivers.
///
/// The server holds one of these behind an `Arc`; tests can build as
/// many isolated instances as they like.
pub struct Orchestrator {
    config: ServerConfig,
    toolchain: Toolchain,
    managers: BTreeMap<RuntimeKind, RuntimeManager>,
    proxy: ReverseProxy,
    pages: PagesDriver,
    android: AndroidDriver,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let pools: Vec<_> = RuntimeKind::ALL
            .iter()
            .map(|kind| (*kind, kind.port_pool(&config.ports)))
            .collect();
        for (i, (a, pool_a)) in pools.iter().enumerate() {
            for (b, pool_b) in &pools[i + 1..] {
                if pool_a.overlaps(pool_b) {
                    bail!(
                        "port pools for {} ({}+{}) and {} ({}+{}) overlap",
                        a,
                        pool_a.base,
                        pool_a.size,
                        b,
                        pool_b.base,
                        pool_b.size
                    );
                }
            }
        }

        let toolchain = Toolchain::new(config.timeouts.probe(), config.android.android_home.clone());
        let managers = RuntimeKind::ALL
            .iter()
            .map(|kind| (*kind, RuntimeManager::new(*kind, &config, toolchain.clone())))
            .collect();
        let proxy = ReverseProxy::new(config.timeouts.proxy()).context("building proxy client")?;
        let pages = PagesDriver::new(
            config.cloudflare.clone(),
            config.pages.clone(),
            config.timeouts.clone(),
            toolchain.clone(),
        );
        let android = AndroidDriver::new(&config.android, toolchain.clone(), &config.server.public_base());

        Ok(Self {
            config,
            toolchain,
            managers,
            proxy,
            pages,
            android,
            started_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn manager(&self, kind: RuntimeKind) -> Result<&RuntimeManager, DeployError> {
        self.managers
            .get(&kind)
            .ok_or_else(|| DeployError::NotFound(format!("runtime '{}'", kind)))
    }

    pub fn pages(&self) -> &PagesDriver {
        &self.pages
    }

    pub fn android(&self) -> &AndroidDriver {
        &self.android
    }

    /// Relay a request to a running project, reaping it first if it died.
    pub async fn forward(&self, kind: RuntimeKind, req: ProxyRequest<'_>) -> Result<Response, DeployError> {
        let port = self.manager(kind)?.resolve(req.project_id).await?;
        self.proxy.forward(port, req).await
    }

    pub fn running_projects(&self) -> usize {
        self.managers.values().map(|m| m.registry().len()).sum()
    }

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            running_projects: self.running_projects(),
        }
    }

    /// Probe every tool and count what each runtime is running.
    pub async fn status(&self) -> RuntimeStatus {
        let tools = self.toolchain.probe_all().await;
        let has = |wanted: &[Tool]| {
            wanted
                .iter()
                .all(|t| tools.iter().any(|s| s.tool == *t && s.available))
        };

        let mut runtimes = BTreeMap::new();
        for (kind, manager) in &self.managers {
            manager.reap().await;
            let pool = manager.descriptor().pool;
            runtimes.insert(
                *kind,
                RuntimeCounts {
                    running: manager.registry().len(),
                    port_base: pool.base,
                    port_limit: pool.base.saturating_add(pool.size.saturating_sub(1)),
                    available: has(kind.required_tools()),
                },
            );
        }

        RuntimeStatus {
            success: true,
            pages_available: has(&[Tool::Node, Tool::Npm]),
            android_available: has(&[Tool::Java, Tool::AndroidSdk]),
            android_builds: self.android.store().list().len(),
            tools,
            runtimes,
        }
    }

    /// Tear down every running project.
    pub async fn shutdown(&self) {
        let running = self.running_projects();
        if running > 0 {
            info!(count = running, "shutting down running projects");
        }
        join_all(self.managers.values().map(|m| m.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::PortConfig;

    #[test]
    fn overlapping_pools_are_rejected() {
        let mut config = ServerConfig::default();
        config.ports = PortConfig {
            python_base: 10000,
            php_base: 10500,
            rust_base: 12000,
            go_base: 13000,
            pool_size: 1000,
        };
        let err = Orchestrator::new(config).err().unwrap().to_string();
        assert!(err.contains("overlap"), "{err}");
    }

    #[tokio::test]
    async fn fresh_orchestrator_reports_empty_registries() {
        let orch = Orchestrator::new(ServerConfig::default()).unwrap();
        let health = orch.health();
        assert_eq!(health.status, "ok");
        assert_eq!(health.running_projects, 0);

        let status = orch.status().await;
        assert_eq!(status.runtimes.len(), RuntimeKind::ALL.len());
        assert_eq!(status.runtimes[&RuntimeKind::Go].port_base, 13000);
        assert_eq!(status.runtimes[&RuntimeKind::Go].port_limit, 13999);
        assert!(status.runtimes.values().all(|r| r.running == 0));
    }

    #[tokio::test]
    async fn forwarding_to_unknown_project_is_not_found() {
        let orch = Orchestrator::new(ServerConfig::default()).unwrap();
        let headers = axum::http::HeaderMap::new();
        let err = orch
            .forward(
                RuntimeKind::Python,
                ProxyRequest {
                    project_id: "ghost",
                    prefix: "/python-app/ghost",
                    method: axum::http::Method::GET,
                    path: "",
                    query: None,
                    headers: &headers,
                    body: axum::body::Bytes::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }
}
