//! Backend manager (spec §4.6): owns the `language → child backend` map,
//! serializes concurrent spawn demand per language, and forwards tool calls
//! with a single implicit restart-and-retry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use lspbridge_core::config::{GatewayConfig, Language, PythonProvider};
use lspbridge_core::error::BackendError;

use crate::backend::{BackendLaunch, BackendSnapshot, ChildBackend};

/// Builds the spawn command for a language worker (spec §6 `LSP_MCP_AUTO_UPDATE`).
///
/// Normal invocation runs the installed `lspbridge-worker` binary found on
/// `PATH`. When auto-update is enabled, the fetch-latest invocation instead
/// runs it through `cargo run`, which rebuilds against whatever source is
/// checked out before launching — the closest analogue, for a binary built
/// from source, to the npx/uvx "always fetch latest" pattern the other
/// backends use.
pub fn launch_for(language: Language, config: &GatewayConfig) -> BackendLaunch {
    let mut worker_args = vec!["--language".to_string(), language.as_str().to_string()];
    if language == Language::Python {
        worker_args.push("--python-provider".to_string());
        worker_args.push(config.python_provider.as_str().to_string());
    }

    if config.auto_update {
        let mut args = vec!["run".to_string(), "--quiet".to_string(), "--bin".to_string(), "lspbridge-worker".to_string(), "--".to_string()];
        args.extend(worker_args);
        BackendLaunch { command: "cargo".to_string(), args }
    } else {
        BackendLaunch { command: "lspbridge-worker".to_string(), args: worker_args }
    }
}

/// Owns every language's backend.
pub struct BackendManager {
    config: RwLock<GatewayConfig>,
    backends: Mutex<HashMap<Language, Arc<ChildBackend>>>,
}

impl BackendManager {
    /// Creates an empty manager over the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: RwLock::new(config),
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// A snapshot of the configuration this manager is currently using.
    pub async fn config(&self) -> GatewayConfig {
        self.config.read().await.clone()
    }

    /// Changes which provider backs the Python worker. Takes effect the
    /// next time the Python backend is (re)spawned (spec §6
    /// `switch_python_backend`: "requires restart").
    pub async fn set_python_provider(&self, provider: PythonProvider) {
        self.config.write().await.python_provider = provider;
    }

    async fn backend_for(&self, language: Language) -> Arc<ChildBackend> {
        self.backends.lock().await.entry(language).or_insert_with(|| Arc::new(ChildBackend::new(language))).clone()
    }

    /// Returns the ready backend for `language`, spawning it on first
    /// demand. Concurrent callers for the same language share the same
    /// in-flight spawn (spec §8 property 2).
    pub async fn get_or_spawn(&self, language: Language) -> Result<Arc<ChildBackend>, BackendError> {
        let config = self.config().await;
        if !config.is_enabled(language) {
            return Err(BackendError::Disabled(language.as_str().to_string()));
        }

        let backend = self.backend_for(language).await;
        let launch = launch_for(language, &config);
        backend.ensure_ready(&launch).await?;
        Ok(backend)
    }

    /// Returns the backend for `language` only if it already exists, without spawning.
    pub async fn existing(&self, language: Language) -> Option<Arc<ChildBackend>> {
        self.backends.lock().await.get(&language).cloned()
    }

    /// Every backend that has ever been demanded, regardless of current status.
    pub async fn all_existing(&self) -> Vec<Arc<ChildBackend>> {
        self.backends.lock().await.values().cloned().collect()
    }

    /// Drops the in-memory record for `language` entirely. Used by tests and
    /// by `update_backend`, which wants a genuinely fresh backend (new crash
    /// history) rather than a reset of the old one.
    pub async fn forget(&self, language: Language) {
        self.backends.lock().await.remove(&language);
    }

    /// Forwards a tool call to `language`'s backend. Per spec §7, the three
    /// kinds of call failure get different treatment:
    /// - `Timeout` leaves the connection as-is and is returned directly; a
    ///   slow request isn't evidence the backend needs restarting.
    /// - `Crashed` records the crash for the supervisor's backoff sweep to
    ///   pick up, but does not retry inline here.
    /// - everything else (`ToolCallFailed`) gets the manager's masked retry:
    ///   restart once and retry the same call before giving up.
    pub async fn call_tool(
        &self,
        language: Language,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<rmcp::model::CallToolResult, BackendError> {
        let backend = self.get_or_spawn(language).await?;

        match backend.call_tool(name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(err @ BackendError::Timeout(_)) => Err(err),
            Err(err @ BackendError::Crashed(_)) => {
                backend.mark_crashed(err.to_string()).await;
                Err(err)
            }
            Err(err) => {
                let restart_count = backend.mark_crashed(err.to_string()).await;
                if restart_count >= crate::supervisor::CRASH_RETRY_LIMIT {
                    let message = format!("{language} backend failed {restart_count} times; use start_backend to retry");
                    backend.mark_terminal(message.clone()).await;
                    return Err(BackendError::Terminal(message));
                }
                let launch = launch_for(language, &self.config().await);
                backend.ensure_ready(&launch).await?;
                backend.call_tool(name, arguments).await
            }
        }
    }

    /// Snapshots of every backend that has been spawned.
    pub async fn snapshots(&self) -> Vec<BackendSnapshot> {
        let backends = self.all_existing().await;
        let mut snapshots = Vec::with_capacity(backends.len());
        for backend in backends {
            snapshots.push(backend.snapshot().await);
        }
        snapshots
    }

    /// Ensures `language`'s backend is started, clearing a terminal error
    /// first if one is set (spec §6 `start_backend`). Idempotent when the
    /// backend is already `ready`.
    pub async fn start(&self, language: Language) -> Result<Arc<ChildBackend>, BackendError> {
        if let Some(backend) = self.existing(language).await {
            if backend.status().await == crate::backend::BackendStatus::Error {
                backend.reset().await;
            }
        }
        self.get_or_spawn(language).await
    }

    /// Forgets and respawns `language`'s backend against the current
    /// configuration, for `update_backend` (spec §6) and for clearing a
    /// terminal error via a fresh `start_backend`.
    pub async fn restart(&self, language: Language) -> Result<Arc<ChildBackend>, BackendError> {
        let previous_version = self.existing(language).await;
        if let Some(backend) = &previous_version {
            backend.mark_stopped().await;
        }
        self.forget(language).await;
        self.get_or_spawn(language).await
    }

    /// Stops every spawned backend, used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let backends = self.all_existing().await;
        for backend in backends {
            backend.mark_stopped().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_for_normal_python() {
        let config = GatewayConfig::default();
        let launch = launch_for(Language::Python, &config);
        assert_eq!(launch.command, "lspbridge-worker");
        assert!(launch.args.contains(&"--python-provider".to_string()));
    }

    #[test]
    fn test_launch_for_auto_update_uses_cargo_run() {
        let mut config = GatewayConfig::default();
        config.auto_update = true;
        let launch = launch_for(Language::TypeScript, &config);
        assert_eq!(launch.command, "cargo");
        assert!(launch.args.contains(&"lspbridge-worker".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_backend_rejected_without_spawn() {
        let mut config = GatewayConfig::default();
        config.typescript_enabled = false;
        let manager = BackendManager::new(config);
        let result = manager.get_or_spawn(Language::TypeScript).await;
        assert!(matches!(result, Err(BackendError::Disabled(_))));
    }

    #[tokio::test]
    async fn test_existing_is_none_before_spawn() {
        let manager = BackendManager::new(GatewayConfig::default());
        assert!(manager.existing(Language::Python).await.is_none());
    }
}
