use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::DeployError;

/// Project source as submitted by the caller: either a `{path: content}`
/// object or a list of `{path, content}` entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileTree {
    Map(BTreeMap<String, String>),
    List(Vec<FileEntry>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileEntry {
    #[serde(alias = "name", alias = "file")]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

impl Default for FileTree {
    fn default() -> Self {
        FileTree::Map(BTreeMap::new())
    }
}

impl FileTree {
    pub fn into_map(self) -> BTreeMap<String, String> {
        match self {
            FileTree::Map(map) => map,
            FileTree::List(list) => list.into_iter().map(|f| (f.path, f.content)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FileTree::Map(map) => map.is_empty(),
            FileTree::List(list) => list.is_empty(),
        }
    }
}

impl From<BTreeMap<String, String>> for FileTree {
    fn from(map: BTreeMap<String, String>) -> Self {
        FileTree::Map(map)
    }
}

/// Lexically normalise a caller-supplied relative path, refusing anything
/// that would land outside the workspace root.
pub fn normalize_relative(raw: &str) -> Result<PathBuf, DeployError> {
    let cleaned = raw.replace('\\', "/");
    let trimmed = cleaned.trim_start_matches('/');

    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(DeployError::InvalidPath(raw.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(DeployError::InvalidPath(raw.to_string()));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(DeployError::InvalidPath(raw.to_string()));
    }
    Ok(out)
}

/// An ephemeral directory holding one project's source tree. The directory
/// is removed when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create a fresh uniquely-named directory and write `files` into it.
    /// Either every file is written or the directory is discarded.
    pub fn materialize(
        prefix: &str,
        files: &BTreeMap<String, String>,
    ) -> Result<Self, DeployError> {
        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files {
            entries.push((normalize_relative(path)?, content));
        }

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-", prefix))
            .tempdir()?;

        for (relative, content) in entries {
            let target = dir.path().join(&relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, content)?;
        }

        let workspace = Workspace { root: dir.keep() };
        debug!(path = %workspace.root.display(), files = files.len(), "workspace materialized");
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    /// Delete the directory now. Failures are logged, never raised.
    pub fn remove(self) {
        drop(self)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "failed to remove workspace"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[test]
    fn normalize_strips_leading_slashes_and_dots() {
        assert_eq!(normalize_relative("/src/main.go").unwrap(), PathBuf::from("src/main.go"));
        assert_eq!(normalize_relative("./a/./b.txt").unwrap(), PathBuf::from("a/b.txt"));
        assert_eq!(normalize_relative("a/../b.txt").unwrap(), PathBuf::from("b.txt"));
        assert_eq!(normalize_relative("a\\b.txt").unwrap(), PathBuf::from("a/b.txt"));
    }

    #[test]
    fn normalize_rejects_traversal() {
        for bad in ["../etc/passwd", "a/../../x", "/../x", "", "/", "./"] {
            assert!(
                matches!(normalize_relative(bad), Err(DeployError::InvalidPath(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn materialize_writes_nested_tree() {
        let ws = Workspace::materialize(
            "test",
            &files(&[("main.go", "package main"), ("static/css/site.css", "body{}")]),
        )
        .unwrap();
        assert_eq!(std::fs::read_to_string(ws.join("main.go")).unwrap(), "package main");
        assert!(ws.contains("static/css/site.css"));
        assert!(ws.path().file_name().unwrap().to_string_lossy().starts_with("test-"));
    }

    #[test]
    fn materialize_rejects_escape_without_creating_directory() {
        let err = Workspace::materialize(
            "test",
            &files(&[("ok.txt", "fine"), ("../../escape.txt", "nope")]),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::InvalidPath(p) if p == "../../escape.txt"));
    }

    #[test]
    fn dropping_workspace_removes_directory() {
        let ws = Workspace::materialize("test", &files(&[("a.txt", "a")])).unwrap();
        let root = ws.path().to_path_buf();
        assert!(root.exists());
        ws.remove();
        assert!(!root.exists());
    }

    #[test]
    fn file_tree_accepts_map_and_list() {
        let map: FileTree = serde_json::from_str(r#"{"index.html": "<h1>hi</h1>"}"#).unwrap();
        assert_eq!(map.into_map()["index.html"], "<h1>hi</h1>");

        let list: FileTree =
            serde_json::from_str(r#"[{"path": "a.txt", "content": "a"}, {"name": "b.txt", "content": "b"}]"#)
                .unwrap();
        let map = list.into_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["b.txt"], "b");
    }
}
