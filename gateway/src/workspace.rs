//! Workspace coordinator (spec §4.8): holds the single active workspace and
//! fans `switch_workspace` out to every already-started backend.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use lspbridge_core::error::{BackendError, ErrorEnvelope, ErrorKind};

use crate::manager::BackendManager;

/// Holds the process-wide active workspace (spec §3, §5).
pub struct WorkspaceCoordinator {
    active: RwLock<Option<PathBuf>>,
}

impl WorkspaceCoordinator {
    /// Starts with no active workspace set.
    pub fn new() -> Self {
        Self { active: RwLock::new(None) }
    }

    /// The current active workspace, if any has been set.
    pub async fn active(&self) -> Option<PathBuf> {
        self.active.read().await.clone()
    }

    /// Validates `path` is an existing directory, records it, and pushes a
    /// `switch_workspace` call to every backend that has already started.
    /// Backends that haven't started yet pick the path up from this
    /// coordinator the first time they're spawned (spec §4.8).
    pub async fn switch(&self, manager: &BackendManager, path: &Path) -> Result<serde_json::Value, ErrorEnvelope> {
        if !path.is_dir() {
            return Err(ErrorEnvelope::new(ErrorKind::InvalidInput, format!("{} is not a directory", path.display())));
        }

        let canonical = path.canonicalize().map_err(|e| ErrorEnvelope::new(ErrorKind::InvalidInput, e.to_string()))?;
        *self.active.write().await = Some(canonical.clone());

        let mut results = serde_json::Map::new();
        for backend in manager.all_existing().await {
            let language = backend.language;
            let mut args = serde_json::Map::new();
            args.insert("path".to_string(), serde_json::Value::String(canonical.display().to_string()));

            let outcome = match backend.call_tool("switch_workspace", Some(args)).await {
                Ok(_) => serde_json::json!("ok"),
                Err(BackendError::Unavailable(msg)) => serde_json::json!({ "error": msg }),
                Err(err) => serde_json::json!({ "error": err.to_string() }),
            };
            results.insert(language.as_str().to_string(), outcome);
        }

        Ok(serde_json::json!({
            "success": true,
            "workspace": canonical.display().to_string(),
            "results": results,
        }))
    }

    /// Applies the active workspace to a single backend that was just
    /// started, before any user tool call reaches it (spec §4.8 invariant:
    /// "propagated to a backend before any of that backend's tool calls").
    pub async fn sync_to(&self, backend: &crate::backend::ChildBackend) {
        let Some(path) = self.active().await else { return };
        let mut args = serde_json::Map::new();
        args.insert("path".to_string(), serde_json::Value::String(path.display().to_string()));
        let _ = backend.call_tool("switch_workspace", Some(args)).await;
    }
}

impl Default for WorkspaceCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lspbridge_core::config::GatewayConfig;

    #[tokio::test]
    async fn test_switch_rejects_non_directory() {
        let coordinator = WorkspaceCoordinator::new();
        let manager = BackendManager::new(GatewayConfig::default());
        let result = coordinator.switch(&manager, Path::new("/definitely/not/a/dir")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_switch_with_no_backends_started_still_records_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = WorkspaceCoordinator::new();
        let manager = BackendManager::new(GatewayConfig::default());
        let result = coordinator.switch(&manager, tmp.path()).await.unwrap();
        assert_eq!(result["success"], true);
        assert!(coordinator.active().await.is_some());
    }
}
