use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::scaffold::AppIdentity;

/// A built APK kept on disk until its TTL runs out.
#[derive(Debug, Clone, Serialize)]
pub struct ApkArtifact {
    pub project_id: String,
    pub app_name: String,
    pub package_name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    built: Instant,
}

impl ApkArtifact {
    pub fn age(&self) -> Duration {
        self.built.elapsed()
    }

    /// Name offered to the browser on download.
    pub fn file_name(&self) -> String {
        let stem: String = self
            .app_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}.apk", if stem.is_empty() { "app" } else { &stem })
    }
}

/// Time-bounded store of built APKs, keyed by project id.
///
/// Expired entries are purged lazily on every read.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, ApkArtifact>>>,
}

impl ArtifactStore {
    pub fn new(dir: PathBuf, ttl: Duration) -> Self {
        Self {
            dir,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, ApkArtifact>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy `apk` into the store, replacing any earlier build of the project.
    pub fn insert(&self, project_id: &str, identity: &AppIdentity, apk: &Path) -> std::io::Result<ApkArtifact> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.apk", project_id));
        let size = std::fs::copy(apk, &path)?;
        let artifact = ApkArtifact {
            project_id: project_id.to_string(),
            app_name: identity.app_name.clone(),
            package_name: identity.package_name.clone(),
            path,
            size,
            created_at: Utc::now(),
            built: Instant::now(),
        };
        self.entries().insert(project_id.to_string(), artifact.clone());
        info!(project_id, size, "apk stored");
        Ok(artifact)
    }

    /// Drop every artifact older than the TTL and delete its file.
    pub fn purge_expired(&self) -> usize {
        let expired: Vec<ApkArtifact> = {
            let mut entries = self.entries();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, a)| a.age() >= self.ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        for artifact in &expired {
            match std::fs::remove_file(&artifact.path) {
                Ok(()) => debug!(project_id = %artifact.project_id, "expired apk removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(project_id = %artifact.project_id, error = %e, "failed to remove expired apk"),
            }
        }
        expired.len()
    }

    pub fn get(&self, project_id: &str) -> Option<ApkArtifact> {
        self.purge_expired();
        self.entries().get(project_id).cloned()
    }

    /// Live artifacts, newest first.
    pub fn list(&self) -> Vec<ApkArtifact> {
        self.purge_expired();
        let mut all: Vec<ApkArtifact> = self.entries().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
