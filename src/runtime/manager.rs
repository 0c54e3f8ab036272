use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::build;
use crate::config::model::{ServerConfig, TimeoutConfig};
use crate::error::DeployError;
use crate::orchestrator::process::ManagedProcess;
use crate::orchestrator::registry::{Lookup, ProjectRecord, ProjectSummary, Registry};
use crate::toolchain::Toolchain;
use crate::workspace::{FileTree, Workspace};

use super::{validate_project_id, PlanContext, RuntimeDescriptor, RuntimeKind, LOOPBACK};

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub files: FileTree,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployResponse {
    pub success: bool,
    pub project_id: String,
    pub runtime: RuntimeKind,
    pub port: u16,
    pub url: String,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub repairs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub success: bool,
    pub project_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectListing {
    #[serde(flatten)]
    pub summary: ProjectSummary,
    pub url: String,
}

/// Deploy, proxy-resolve, stop and list for one runtime kind.
///
/// Operations on the same project id are serialized: a redeploy builds
/// while the old server keeps running, then stops it before launching
/// the replacement. Different ids proceed independently.
pub struct RuntimeManager {
    descriptor: RuntimeDescriptor,
    registry: Registry,
    toolchain: Toolchain,
    timeouts: TimeoutConfig,
    public_base: String,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RuntimeManager {
    pub fn new(kind: RuntimeKind, config: &ServerConfig, toolchain: Toolchain) -> Self {
        let descriptor = RuntimeDescriptor::new(kind, &config.ports);
        let registry = Registry::new(kind, descriptor.pool);
        Self {
            descriptor,
            registry,
            toolchain,
            timeouts: config.timeouts.clone(),
            public_base: config.server.public_base(),
            locks: DashMap::new(),
        }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.descriptor.kind
    }

    pub fn descriptor(&self) -> &RuntimeDescriptor {
        &self.descriptor
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn url_for(&self, project_id: &str) -> String {
        format!(
            "{}/{}/{}/",
            self.public_base,
            self.descriptor.proxy_prefix(),
            project_id
        )
    }

    /// Remove and clean up every registered project whose process exited.
    pub async fn reap(&self) {
        for record in self.registry.sweep() {
            record.teardown(self.timeouts.terminate_grace()).await;
        }
    }

    fn project_lock(&self, project_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(project_id.to_string()).or_default().clone()
    }

    fn release_lock(&self, project_id: &str) {
        self.locks
            .remove_if(project_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployResponse, DeployError> {
        validate_project_id(&request.project_id)?;
        if request.files.is_empty() {
            return Err(DeployError::invalid("files must contain at least one file"));
        }
        self.reap().await;

        let project_id = request.project_id.clone();
        let lock = self.project_lock(&project_id);
        let result = {
            let _guard = lock.lock().await;
            self.deploy_locked(request).await
        };
        drop(lock);
        self.release_lock(&project_id);

        if let Err(e) = &result {
            warn!(project_id = %project_id, runtime = %self.kind(), error = %e, "deploy failed");
        }
        result
    }

    async fn deploy_locked(&self, request: DeployRequest) -> Result<DeployResponse, DeployError> {
        let kind = self.kind();
        let DeployRequest {
            project_id,
            framework,
            files,
        } = request;

        info!(project_id = %project_id, runtime = %kind, phase = "materialize", "deploy started");
        let workspace = Workspace::materialize(&format!("{}-{}", kind, project_id), &files.into_map())?;

        let plan = self.descriptor.plan(&PlanContext {
            workspace: workspace.path(),
            project_id: &project_id,
            framework: framework.as_deref(),
            timeouts: &self.timeouts,
        })?;
        self.toolchain.require(&plan.tools).await?;

        info!(project_id = %project_id, runtime = %kind, phase = "build", "building");
        let built = build::build(workspace.path(), &plan.build).await?.into_result()?;

        // The previous deployment keeps serving until the new build is ready.
        if let Some(previous) = self.registry.take(&project_id) {
            info!(project_id = %project_id, runtime = %kind, port = previous.port, "replacing previous deployment");
            previous.teardown(self.timeouts.terminate_grace()).await;
        }

        let reservation = self.registry.reserve_port()?;
        let port = reservation.port();
        let spec = plan.run.render(workspace.path(), LOOPBACK, port);

        info!(project_id = %project_id, runtime = %kind, port, phase = "launch", "launching");
        let label = format!("{}/{}", kind, project_id);
        let mut process = ManagedProcess::spawn(&label, &spec)?;

        tokio::time::sleep(self.timeouts.launch_grace()).await;
        if let Some(status) = process.exit_status() {
            let output = process.recent_output();
            process.force_kill().await;
            return Err(DeployError::LaunchFailed {
                message: format!("{} project '{}' exited during startup ({})", kind, project_id, status),
                output,
            });
        }

        let pid = process.pid();
        let record = ProjectRecord {
            project_id: project_id.clone(),
            kind,
            port,
            framework: framework.clone(),
            created_at: Utc::now(),
            process,
            workspace,
        };
        if let Some(stale) = self.registry.insert(reservation, record) {
            stale.teardown(self.timeouts.terminate_grace()).await;
        }

        info!(project_id = %project_id, runtime = %kind, port, pid = ?pid, "project running");
        Ok(DeployResponse {
            success: true,
            url: self.url_for(&project_id),
            project_id,
            runtime: kind,
            port,
            pid,
            framework,
            repairs: built.repairs.into_iter().map(|r| r.description).collect(),
        })
    }

    /// Stop a project and delete its workspace. A second stop reports
    /// `NotFound`.
    pub async fn stop(&self, project_id: &str) -> Result<StopResponse, DeployError> {
        let lock = self.project_lock(project_id);
        let record = {
            let _guard = lock.lock().await;
            self.registry.take(project_id)
        };
        drop(lock);
        self.release_lock(project_id);

        let record = record
            .ok_or_else(|| DeployError::NotFound(format!("{} project '{}'", self.kind(), project_id)))?;
        record.teardown(self.timeouts.terminate_grace()).await;

        Ok(StopResponse {
            success: true,
            project_id: project_id.to_string(),
            message: format!("{} project '{}' stopped", self.kind(), project_id),
        })
    }

    pub async fn list(&self) -> Vec<ProjectListing> {
        self.reap().await;
        self.registry
            .summaries()
            .into_iter()
            .map(|summary| ProjectListing {
                url: self.url_for(&summary.project_id),
                summary,
            })
            .collect()
    }

    /// Port of a live project, reaping it first if its process died.
    pub async fn resolve(&self, project_id: &str) -> Result<u16, DeployError> {
        match self.registry.lookup(project_id) {
            Lookup::Live { port } => Ok(port),
            Lookup::Dead(record) => {
                record.teardown(self.timeouts.terminate_grace()).await;
                Err(DeployError::NotFound(format!("{} project '{}'", self.kind(), project_id)))
            }
            Lookup::Missing => Err(DeployError::NotFound(format!(
                "{} project '{}'",
                self.kind(),
                project_id
            ))),
        }
    }

    pub fn logs(&self, project_id: &str) -> Result<Vec<String>, DeployError> {
        self.registry
            .logs(project_id)
            .ok_or_else(|| DeployError::NotFound(format!("{} project '{}'", self.kind(), project_id)))
    }

    /// Stop everything; used on server shutdown.
    pub async fn shutdown(&self) {
        let records = self.registry.drain();
        if records.is_empty() {
            return;
        }
        info!(runtime = %self.kind(), count = records.len(), "stopping projects");
        let grace = self.timeouts.terminate_grace();
        join_all(records.into_iter().map(|r| r.teardown(grace))).await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::model::PortConfig;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn config() -> ServerConfig {
        let mut cfg = ServerConfig::default();
        cfg.timeouts.launch_grace_ms = 300;
        cfg.timeouts.terminate_grace_secs = 2;
        cfg.ports = PortConfig {
            python_base: 41000,
            php_base: 42000,
            rust_base: 43000,
            go_base: 44000,
            pool_size: 200,
        };
        cfg
    }

    fn manager(kind: RuntimeKind) -> RuntimeManager {
        RuntimeManager::new(kind, &config(), Toolchain::new(Duration::from_secs(10), None))
    }

    fn request(id: &str, files: &[(&str, &str)]) -> DeployRequest {
        DeployRequest {
            project_id: id.to_string(),
            framework: None,
            files: FileTree::from(
                files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
        }
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_work() {
        let mgr = manager(RuntimeKind::Go);
        let err = mgr.deploy(request("", &[("main.go", "")])).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidInput(_)));
        let err = mgr.deploy(request("p1", &[])).await.unwrap_err();
        assert!(matches!(err, DeployError::InvalidInput(_)));
        let err = mgr
            .deploy(request("p1", &[("../main.go", "package main")]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidPath(_)));
        assert!(mgr.list().await.is_empty());
    }

    #[tokio::test]
    async fn stop_unknown_project_is_not_found() {
        let mgr = manager(RuntimeKind::Php);
        let err = mgr.stop("ghost").await.unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
        assert!(matches!(mgr.resolve("ghost").await, Err(DeployError::NotFound(_))));
        assert!(mgr.logs("ghost").is_err());
    }

    #[test]
    fn urls_are_addressed_by_kind_and_id() {
        let mgr = manager(RuntimeKind::Go);
        assert_eq!(mgr.url_for("p1"), "http://localhost:5000/go-app/p1/");
    }

    /// Workspace directories left in the temp dir for one project.
    fn workspaces_for(kind: RuntimeKind, id: &str) -> Vec<std::path::PathBuf> {
        let prefix = format!("{}-{}-", kind, id);
        std::fs::read_dir(std::env::temp_dir())
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with(&prefix)))
            .collect()
    }

    async fn has_python() -> bool {
        Toolchain::new(Duration::from_secs(10), None)
            .available(crate::toolchain::Tool::Python3)
            .await
    }

    #[tokio::test]
    async fn process_exiting_during_grace_is_launch_failure() {
        if !has_python().await {
            eprintln!("python3 not installed, skipping");
            return;
        }
        let id = format!("exits{}", std::process::id());
        let mgr = manager(RuntimeKind::Python);
        let err = mgr
            .deploy(request(
                &id,
                &[("app.py", "import sys\nprint('boom-diag')\nsys.exit(3)\n")],
            ))
            .await
            .unwrap_err();

        match &err {
            DeployError::LaunchFailed { message, output } => {
                assert!(message.contains("exited during startup"), "{message}");
                assert!(output.contains("boom-diag"), "{output}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        assert!(mgr.list().await.is_empty());
        assert!(mgr.registry().is_empty());
        assert!(workspaces_for(RuntimeKind::Python, &id).is_empty());
    }

    #[tokio::test]
    async fn stop_removes_workspace_and_second_stop_is_not_found() {
        if !has_python().await {
            eprintln!("python3 not installed, skipping");
            return;
        }
        let id = format!("stops{}", std::process::id());
        let mgr = manager(RuntimeKind::Python);
        let deployed = mgr
            .deploy(request(&id, &[("app.py", "import time\nwhile True:\n    time.sleep(1)\n")]))
            .await
            .unwrap();
        assert!(deployed.success);
        assert_eq!(workspaces_for(RuntimeKind::Python, &id).len(), 1);
        assert_eq!(mgr.list().await.len(), 1);

        let stopped = mgr.stop(&id).await.unwrap();
        assert!(stopped.success);
        assert!(workspaces_for(RuntimeKind::Python, &id).is_empty());
        assert!(mgr.registry().is_empty());

        let err = mgr.stop(&id).await.unwrap_err();
        assert!(matches!(err, DeployError::NotFound(_)));
    }

    #[tokio::test]
    async fn project_locks_are_released() {
        let mgr = manager(RuntimeKind::Go);
        let _ = mgr.stop("p1").await;
        assert!(mgr.locks.is_empty());
    }
}
