//! Vue-specific bridge between the gateway's `typescript_*` tool calls and
//! Volar's companion `tsserver.js` process (spec §4.4).
//!
//! Volar runs in "hybrid mode": its main LSP connection handles Vue
//! template/script diagnostics directly, while anything requiring full
//! TypeScript semantics (refactors, some navigation) is proxied to a
//! private tsserver instance it spawns. This module owns that proxy path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use lspbridge_core::error::LspError;

use crate::transport::TsServerTransport;

/// Locates `tsserver.js` inside the project's own `typescript` dependency,
/// preferring the local install over a global one (spec §4.4: "the
/// project's own TypeScript version, not the worker's bundled one").
pub fn resolve_tsserver_path(project_root: &Path) -> Option<PathBuf> {
    let candidate = project_root
        .join("node_modules")
        .join("typescript")
        .join("lib")
        .join("tsserver.js");
    candidate.exists().then_some(candidate)
}

/// Picks the tsconfig Vue's `_vue:projectInfo` synthetic command should
/// report, preferring an app-specific config over the root one (spec
/// §4.4).
pub fn resolve_project_info_config(project_root: &Path) -> Option<PathBuf> {
    let app_config = project_root.join("tsconfig.app.json");
    if app_config.exists() {
        return Some(app_config);
    }
    let root_config = project_root.join("tsconfig.json");
    root_config.exists().then_some(root_config)
}

/// Owns the companion process and answers Vue's synthetic commands
/// without a round trip when possible.
pub struct TsServerBridge {
    transport: TsServerTransport,
    project_root: PathBuf,
}

impl TsServerBridge {
    /// Spawns the companion tsserver.js for `project_root`, using the
    /// node executable on `PATH`.
    ///
    /// ## Errors
    /// Returns [`LspError::ServerStartFailed`] if `tsserver.js` can't be
    /// located under the project's `node_modules`, or if the process
    /// fails to spawn.
    pub async fn spawn(project_root: &Path) -> Result<Self, LspError> {
        let tsserver_js = resolve_tsserver_path(project_root).ok_or_else(|| {
            LspError::ServerStartFailed(format!(
                "no typescript/lib/tsserver.js under {}/node_modules",
                project_root.display()
            ))
        })?;

        let transport = TsServerTransport::spawn(
            "node",
            &[tsserver_js.to_string_lossy().into_owned()],
            project_root,
        )
        .await
        .map_err(|e| LspError::ServerStartFailed(e.to_string()))?;

        Ok(Self {
            transport,
            project_root: project_root.to_path_buf(),
        })
    }

    /// Forwards a `_vue:`-prefixed command to the companion process,
    /// handling the synthetic `_vue:projectInfo` command locally instead
    /// of forwarding it (spec §4.4).
    pub async fn dispatch(&self, command: &str, arguments: Value) -> Result<Value, LspError> {
        if command == "_vue:projectInfo" {
            return Ok(self.project_info());
        }

        let forwarded = command.strip_prefix("_vue:").unwrap_or(command);
        self.transport
            .request(forwarded.to_string(), arguments)
            .await
            .map_err(|e| LspError::RequestFailed(e.to_string()))
    }

    fn project_info(&self) -> Value {
        let config_file_name = resolve_project_info_config(&self.project_root)
            .map(|p| p.to_string_lossy().into_owned());
        serde_json::json!({ "configFileName": config_file_name })
    }

    /// Terminates the companion process.
    pub async fn shutdown(&self) -> Result<(), LspError> {
        self.transport
            .shutdown()
            .await
            .map_err(|e| LspError::RequestFailed(e.to_string()))
    }
}

/// Wraps a bridge for shared ownership inside a [`crate::pool::Connection`].
pub type SharedBridge = Arc<TsServerBridge>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_tsserver_path_missing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(resolve_tsserver_path(tmp.path()).is_none());
    }

    #[test]
    fn test_resolve_tsserver_path_found() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("node_modules").join("typescript").join("lib");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("tsserver.js"), "").unwrap();
        assert_eq!(resolve_tsserver_path(tmp.path()), Some(dir.join("tsserver.js")));
    }

    #[test]
    fn test_resolve_project_info_prefers_app_config() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("tsconfig.json"), "{}").unwrap();
        fs::write(tmp.path().join("tsconfig.app.json"), "{}").unwrap();
        assert_eq!(
            resolve_project_info_config(tmp.path()),
            Some(tmp.path().join("tsconfig.app.json"))
        );
    }

    #[test]
    fn test_resolve_project_info_falls_back_to_root_config() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("tsconfig.json"), "{}").unwrap();
        assert_eq!(
            resolve_project_info_config(tmp.path()),
            Some(tmp.path().join("tsconfig.json"))
        );
    }

    #[test]
    fn test_resolve_project_info_none_when_no_config() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(resolve_project_info_config(tmp.path()), None);
    }
}
