use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DeployError;
use crate::orchestrator::ports::{self, PortPool};
use crate::orchestrator::process::ManagedProcess;
use crate::runtime::RuntimeKind;
use crate::workspace::Workspace;

/// A live project: its server process, port and workspace travel together
/// and are released together.
#[derive(Debug)]
pub struct ProjectRecord {
    pub project_id: String,
    pub kind: RuntimeKind,
    pub port: u16,
    pub framework: Option<String>,
    pub created_at: DateTime<Utc>,
    pub process: ManagedProcess,
    pub workspace: Workspace,
}

impl ProjectRecord {
    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }

    /// Stop the process and delete the workspace. Consumes the record so
    /// teardown happens exactly once.
    pub async fn teardown(mut self, grace: Duration) {
        let forced = self.process.terminate(grace).await;
        info!(
            project_id = %self.project_id,
            runtime = %self.kind,
            port = self.port,
            forced,
            "project stopped"
        );
        // Workspace is removed when `self` drops here.
    }
}

/// Point-in-time view of a record for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub runtime: RuntimeKind,
    pub status: &'static str,
    pub pid: Option<u32>,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: u64,
    pub uptime: String,
}

impl ProjectSummary {
    fn of(record: &ProjectRecord) -> Self {
        let uptime = Duration::from_secs(record.uptime().as_secs());
        Self {
            project_id: record.project_id.clone(),
            runtime: record.kind,
            status: "running",
            pid: record.process.pid(),
            port: record.port,
            framework: record.framework.clone(),
            created_at: record.created_at,
            uptime_secs: uptime.as_secs(),
            uptime: humantime::format_duration(uptime).to_string(),
        }
    }
}

/// Result of an entry-specific liveness check.
#[derive(Debug)]
pub enum Lookup {
    Live { port: u16 },
    /// The process had exited; the record was removed and is handed back
    /// for cleanup.
    Dead(ProjectRecord),
    Missing,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, ProjectRecord>,
    /// Ports handed out to deploys that have not registered yet.
    reserved: HashSet<u16>,
}

impl Inner {
    fn held_ports(&self) -> HashSet<u16> {
        self.records
            .values()
            .map(|r| r.port)
            .chain(self.reserved.iter().copied())
            .collect()
    }
}

/// The live project table for one runtime kind, plus its port pool.
///
/// Every mutation happens under one lock. Process termination and
/// workspace deletion always happen after the record has been removed,
/// outside the lock.
#[derive(Debug, Clone)]
pub struct Registry {
    kind: RuntimeKind,
    pool: PortPool,
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    pub fn new(kind: RuntimeKind, pool: PortPool) -> Self {
        Self {
            kind,
            pool,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    pub fn pool(&self) -> PortPool {
        self.pool
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the smallest free port in the pool. The port stays claimed
    /// until the reservation is committed into a record or dropped.
    pub fn reserve_port(&self) -> Result<PortReservation, DeployError> {
        self.reserve_port_with(ports::check_port_available)
    }

    pub(crate) fn reserve_port_with(
        &self,
        is_free: impl Fn(u16) -> bool,
    ) -> Result<PortReservation, DeployError> {
        let mut inner = self.lock();
        let held = inner.held_ports();
        let port = ports::first_free_port_with(&self.pool, &held, is_free).ok_or_else(|| {
            DeployError::Internal(anyhow::anyhow!(
                "no free port left in the {} pool ({}..{})",
                self.kind,
                self.pool.base,
                u32::from(self.pool.base) + u32::from(self.pool.size)
            ))
        })?;
        inner.reserved.insert(port);
        debug!(runtime = %self.kind, port, "port reserved");
        Ok(PortReservation {
            port,
            inner: Arc::clone(&self.inner),
            committed: false,
        })
    }

    /// Register a record on a reserved port. Any record already under the
    /// same id is returned for teardown.
    pub fn insert(&self, mut reservation: PortReservation, record: ProjectRecord) -> Option<ProjectRecord> {
        debug_assert_eq!(reservation.port, record.port);
        let mut inner = self.lock();
        inner.reserved.remove(&reservation.port);
        reservation.committed = true;
        inner.records.insert(record.project_id.clone(), record)
    }

    pub fn take(&self, project_id: &str) -> Option<ProjectRecord> {
        self.lock().records.remove(project_id)
    }

    pub fn drain(&self) -> Vec<ProjectRecord> {
        self.lock().records.drain().map(|(_, r)| r).collect()
    }

    /// Reaper pass: remove every record whose process has exited.
    pub fn sweep(&self) -> Vec<ProjectRecord> {
        let mut inner = self.lock();
        let dead: Vec<String> = inner
            .records
            .iter_mut()
            .filter_map(|(id, r)| (!r.process.is_alive()).then(|| id.clone()))
            .collect();
        let removed: Vec<ProjectRecord> = dead
            .iter()
            .filter_map(|id| inner.records.remove(id))
            .collect();
        for record in &removed {
            info!(
                project_id = %record.project_id,
                runtime = %self.kind,
                port = record.port,
                "reaped exited project"
            );
        }
        removed
    }

    /// Reaper check for a single entry.
    pub fn lookup(&self, project_id: &str) -> Lookup {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(project_id) else {
            return Lookup::Missing;
        };
        if record.process.is_alive() {
            return Lookup::Live { port: record.port };
        }
        match inner.records.remove(project_id) {
            Some(record) => {
                info!(project_id, runtime = %self.kind, "reaped exited project");
                Lookup::Dead(record)
            }
            None => Lookup::Missing,
        }
    }

    pub fn contains(&self, project_id: &str) -> bool {
        self.lock().records.contains_key(project_id)
    }

    pub fn summaries(&self) -> Vec<ProjectSummary> {
        let inner = self.lock();
        let mut out: Vec<ProjectSummary> = inner.records.values().map(ProjectSummary::of).collect();
        out.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        out
    }

    pub fn logs(&self, project_id: &str) -> Option<Vec<String>> {
        self.lock()
            .records
            .get(project_id)
            .map(|r| r.process.log_tail().lines())
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A claimed port not yet owned by a record.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    inner: Arc<Mutex<Inner>>,
    committed: bool,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        if !self.committed {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.reserved.remove(&self.port);
            debug!(port = self.port, "port reservation released");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::orchestrator::process::LaunchSpec;
    use std::collections::BTreeMap;

    fn registry() -> Registry {
        Registry::new(RuntimeKind::Go, PortPool::new(30000, 50))
    }

    fn record(id: &str, port: u16, script: &str) -> ProjectRecord {
        let workspace = Workspace::materialize("reg-test", &BTreeMap::from([("a.txt".to_string(), "a".to_string())]))
            .unwrap();
        let spec = LaunchSpec::new("sh", &["-c", script], workspace.path().to_path_buf());
        ProjectRecord {
            project_id: id.to_string(),
            kind: RuntimeKind::Go,
            port,
            framework: None,
            created_at: Utc::now(),
            process: ManagedProcess::spawn(id, &spec).unwrap(),
            workspace,
        }
    }

    #[test]
    fn reservations_are_distinct_and_released_on_drop() {
        let reg = registry();
        let a = reg.reserve_port_with(|_| true).unwrap();
        let b = reg.reserve_port_with(|_| true).unwrap();
        assert_eq!(a.port(), 30000);
        assert_eq!(b.port(), 30001);
        drop(a);
        let c = reg.reserve_port_with(|_| true).unwrap();
        assert_eq!(c.port(), 30000);
    }

    #[test]
    fn exhausted_pool_is_an_error() {
        let reg = Registry::new(RuntimeKind::Php, PortPool::new(30000, 1));
        let _held = reg.reserve_port_with(|_| true).unwrap();
        assert!(reg.reserve_port_with(|_| true).is_err());
    }

    #[tokio::test]
    async fn insert_commits_port_and_returns_replaced_record() {
        let reg = registry();
        let res = reg.reserve_port_with(|_| true).unwrap();
        let port = res.port();
        assert!(reg.insert(res, record("p1", port, "sleep 30")).is_none());

        // Committed port stays held by the record.
        let next = reg.reserve_port_with(|_| true).unwrap();
        assert_ne!(next.port(), port);

        let replaced = reg.insert(next, record("p1", 30001, "sleep 30")).unwrap();
        assert_eq!(replaced.port, port);
        replaced.teardown(Duration::from_secs(5)).await;
        assert_eq!(reg.len(), 1);

        for r in reg.drain() {
            r.teardown(Duration::from_secs(5)).await;
        }
        assert!(reg.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_exited_processes_and_their_workspaces() {
        let reg = registry();
        let live = reg.reserve_port_with(|_| true).unwrap();
        let live_port = live.port();
        reg.insert(live, record("live", live_port, "sleep 30"));
        let dead = reg.reserve_port_with(|_| true).unwrap();
        let dead_port = dead.port();
        reg.insert(dead, record("dead", dead_port, "exit 0"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        let reaped = reg.sweep();
        assert_eq!(reaped.len(), 1);
        let workspace = reaped[0].workspace.path().to_path_buf();
        assert_eq!(reaped[0].project_id, "dead");
        drop(reaped);
        assert!(!workspace.exists());

        let listed = reg.summaries();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_id, "live");
        assert_eq!(listed[0].status, "running");

        for r in reg.drain() {
            r.teardown(Duration::from_secs(5)).await;
        }
    }

    #[tokio::test]
    async fn lookup_reaps_dead_entry() {
        let reg = registry();
        let res = reg.reserve_port_with(|_| true).unwrap();
        let port = res.port();
        reg.insert(res, record("gone", port, "exit 3"));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(matches!(reg.lookup("gone"), Lookup::Dead(_)));
        assert!(matches!(reg.lookup("gone"), Lookup::Missing));
        assert!(!reg.contains("gone"));
    }
}
