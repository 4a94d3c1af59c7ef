//! A single child backend: the aggregator's handle on one language worker's
//! MCP child process (spec §3 "Child backend", §4.6).

use std::time::Instant;

use rmcp::RoleClient;
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParam, CallToolResult};
use rmcp::service::RunningService;
use tokio::process::Command;
use tokio::sync::Mutex;

use lspbridge_core::config::Language;
use lspbridge_core::error::BackendError;

/// Where a backend currently sits in the state machine of spec §4.9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    /// Never spawned, or deliberately stopped (idle reap, shutdown).
    Stopped,
    /// Handshake in progress.
    Starting,
    /// Connected, initialized, and serving tool calls.
    Ready,
    /// Most recent spawn or handshake failed, or the connection crashed.
    /// May still be auto-restarted unless `terminal` is set.
    Error,
}

/// The command line used to spawn a language worker.
#[derive(Debug, Clone)]
pub struct BackendLaunch {
    /// The executable to run.
    pub command: String,
    /// Arguments passed to it.
    pub args: Vec<String>,
}

/// One language worker's child MCP connection plus its supervision state.
///
/// A `ChildBackend` is created once per language and persists across
/// restarts so its crash history survives them; only the handle inside
/// [`Inner::client`] is replaced on each respawn.
pub struct ChildBackend {
    /// The language this backend serves.
    pub language: Language,
    inner: Mutex<Inner>,
    /// Serializes concurrent spawn attempts so at most one is ever in
    /// flight for this backend (spec §8 property 2).
    spawn_lock: Mutex<()>,
}

struct Inner {
    status: BackendStatus,
    client: Option<RunningService<RoleClient, ()>>,
    tools: Vec<String>,
    server_name: Option<String>,
    server_version: Option<String>,
    last_used: Instant,
    restart_count: u32,
    last_crash: Option<Instant>,
    last_error: Option<String>,
    terminal: bool,
}

impl ChildBackend {
    /// Creates a backend record in the `stopped` state with no client yet.
    pub fn new(language: Language) -> Self {
        Self {
            language,
            inner: Mutex::new(Inner {
                status: BackendStatus::Stopped,
                client: None,
                tools: Vec::new(),
                server_name: None,
                server_version: None,
                last_used: Instant::now(),
                restart_count: 0,
                last_crash: None,
                last_error: None,
                terminal: false,
            }),
            spawn_lock: Mutex::new(()),
        }
    }

    /// Returns immediately if already `ready`; otherwise serializes on
    /// [`Self::spawn_lock`] and spawns. Fails fast with
    /// [`BackendError::Terminal`] if the backend previously exhausted its
    /// crash-retry budget and hasn't been explicitly reset.
    pub async fn ensure_ready(&self, launch: &BackendLaunch) -> Result<(), BackendError> {
        if self.status().await == BackendStatus::Ready {
            return Ok(());
        }

        let _guard = self.spawn_lock.lock().await;

        {
            let mut inner = self.inner.lock().await;
            if inner.status == BackendStatus::Ready {
                return Ok(());
            }
            if inner.terminal {
                return Err(BackendError::Terminal(inner.last_error.clone().unwrap_or_default()));
            }
            inner.status = BackendStatus::Starting;
        }

        self.spawn(launch).await
    }

    /// Spawns the child process, performs the MCP handshake, and records the
    /// discovered tool list and advertised server identity.
    async fn spawn(&self, launch: &BackendLaunch) -> Result<(), BackendError> {
        let mut cmd = Command::new(&launch.command);
        cmd.args(&launch.args);

        let transport = rmcp::transport::TokioChildProcess::new(cmd)
            .map_err(|e| BackendError::Unavailable(format!("failed to spawn {}: {e}", launch.command)))?;

        let client = ()
            .serve(transport)
            .await
            .map_err(|e| BackendError::Unavailable(format!("MCP handshake with {} failed: {e}", launch.command)))?;

        let tools = client
            .list_all_tools()
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to list tools from {}: {e}", launch.command)))?
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();

        let (server_name, server_version) = client
            .peer_info()
            .map(|info| (Some(info.server_info.name.clone()), Some(info.server_info.version.clone())))
            .unwrap_or((None, None));

        let mut inner = self.inner.lock().await;
        inner.client = Some(client);
        inner.tools = tools;
        inner.server_name = server_name;
        inner.server_version = server_version;
        inner.status = BackendStatus::Ready;
        inner.last_used = Instant::now();
        Ok(())
    }

    /// Forwards one tool call to the child, classifying a failure into
    /// [`BackendError::Timeout`], [`BackendError::Crashed`], or
    /// [`BackendError::ToolCallFailed`] (spec §7) without touching
    /// supervision state itself — the caller decides what each one means
    /// for restart/retry.
    pub async fn call_tool(&self, name: &str, arguments: Option<serde_json::Map<String, serde_json::Value>>) -> Result<CallToolResult, BackendError> {
        let mut inner = self.inner.lock().await;
        inner.last_used = Instant::now();
        let client = inner
            .client
            .as_ref()
            .ok_or_else(|| BackendError::Unavailable("backend has no active client".into()))?;

        client
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(classify_call_error)
    }

    /// Whether this backend's discovered tool list includes `name`.
    pub async fn supports_tool(&self, name: &str) -> bool {
        self.inner.lock().await.tools.iter().any(|t| t == name)
    }

    /// Current status.
    pub async fn status(&self) -> BackendStatus {
        self.inner.lock().await.status
    }

    /// Marks the backend as having crashed: closes out its client handle and
    /// bumps the restart counter, resetting it first if the previous crash
    /// was over an hour ago (spec §4.9, §8 property 7). Returns the updated
    /// restart count.
    pub async fn mark_crashed(&self, message: impl Into<String>) -> u32 {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(last) = inner.last_crash {
            if now.duration_since(last) > std::time::Duration::from_secs(3600) {
                inner.restart_count = 0;
            }
        }
        inner.restart_count += 1;
        inner.last_crash = Some(now);
        inner.last_error = Some(message.into());
        inner.status = BackendStatus::Error;
        inner.client = None;
        inner.restart_count
    }

    /// Marks the backend as terminally failed: no further automatic restart
    /// will be attempted until `reset()` is called (`start_backend`/`update_backend`).
    pub async fn mark_terminal(&self, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.status = BackendStatus::Error;
        inner.last_error = Some(message.into());
        inner.client = None;
        inner.terminal = true;
    }

    /// Clears the terminal flag and crash counters so the next
    /// `ensure_ready` attempts a fresh spawn (user-initiated `start_backend`/`update_backend`).
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.terminal = false;
        inner.restart_count = 0;
        inner.last_crash = None;
        inner.last_error = None;
        inner.status = BackendStatus::Stopped;
    }

    /// Marks the backend as deliberately stopped (idle reap or shutdown).
    pub async fn mark_stopped(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.client.take() {
            let _ = client.cancel().await;
        }
        inner.status = BackendStatus::Stopped;
    }

    /// Age of the backend's last tool-call activity.
    pub async fn idle_for(&self) -> std::time::Duration {
        self.inner.lock().await.last_used.elapsed()
    }

    /// Current restart counter and time elapsed since the last recorded
    /// crash, for the supervisor's backoff scheduling.
    pub async fn crash_info(&self) -> (u32, Option<std::time::Duration>) {
        let inner = self.inner.lock().await;
        (inner.restart_count, inner.last_crash.map(|t| t.elapsed()))
    }

    /// Snapshot of the backend's status for `status`/`list_backends`.
    pub async fn snapshot(&self) -> BackendSnapshot {
        let inner = self.inner.lock().await;
        BackendSnapshot {
            language: self.language,
            status: inner.status,
            tools_registered: inner.tools.len(),
            server_name: inner.server_name.clone(),
            server_version: inner.server_version.clone(),
            restart_count: inner.restart_count,
            last_error: inner.last_error.clone(),
        }
    }
}

/// Classifies a child MCP call failure from its surfaced error text.
///
/// `rmcp`'s client-side service error doesn't give call sites a structured
/// way to tell "the request timed out" apart from "the transport closed
/// mid-call", so the distinction spec §7 requires for recovery behavior is
/// recovered here from the error's own message instead.
fn classify_call_error(err: impl std::fmt::Display) -> BackendError {
    let message = err.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") {
        BackendError::Timeout(message)
    } else if lowered.contains("closed") || lowered.contains("disconnected") || lowered.contains("broken pipe") {
        BackendError::Crashed(message)
    } else {
        BackendError::ToolCallFailed(message)
    }
}

/// A point-in-time view of a backend's supervision state, serialized
/// directly into the `status`/`list_backends` tool results.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendSnapshot {
    /// The language this snapshot describes.
    pub language: Language,
    /// Current state-machine position.
    pub status: BackendStatus,
    /// Number of tools the backend's child MCP client discovered.
    pub tools_registered: usize,
    /// Advertised server name, once known.
    pub server_name: Option<String>,
    /// Advertised server version, once known.
    pub server_version: Option<String>,
    /// Consecutive crash count since the last quiet hour.
    pub restart_count: u32,
    /// Most recent error message, if any.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_backend_starts_stopped() {
        let backend = ChildBackend::new(Language::Python);
        assert_eq!(backend.status().await, BackendStatus::Stopped);
    }

    #[tokio::test]
    async fn test_mark_crashed_increments_restart_count() {
        let backend = ChildBackend::new(Language::Python);
        let first = backend.mark_crashed("boom").await;
        assert_eq!(first, 1);
        let second = backend.mark_crashed("boom again").await;
        assert_eq!(second, 2);
        assert_eq!(backend.status().await, BackendStatus::Error);
    }

    #[tokio::test]
    async fn test_mark_crashed_resets_after_quiet_hour() {
        let backend = ChildBackend::new(Language::Python);
        backend.mark_crashed("boom").await;
        {
            let mut inner = backend.inner.lock().await;
            inner.last_crash = Some(Instant::now() - std::time::Duration::from_secs(3601));
        }
        let after_quiet = backend.mark_crashed("boom again").await;
        assert_eq!(after_quiet, 1);
    }

    #[tokio::test]
    async fn test_ensure_ready_fails_fast_when_terminal() {
        let backend = ChildBackend::new(Language::Python);
        backend.mark_terminal("too many crashes").await;
        let launch = BackendLaunch { command: "does-not-matter".into(), args: vec![] };
        let result = backend.ensure_ready(&launch).await;
        assert!(matches!(result, Err(BackendError::Terminal(_))));
    }

    #[test]
    fn test_classify_call_error_detects_timeout() {
        let err = classify_call_error("request timed out after 30s");
        assert!(matches!(err, BackendError::Timeout(_)));
    }

    #[test]
    fn test_classify_call_error_detects_closed_transport() {
        let err = classify_call_error("transport closed");
        assert!(matches!(err, BackendError::Crashed(_)));
    }

    #[test]
    fn test_classify_call_error_falls_back_to_tool_call_failed() {
        let err = classify_call_error("method not found");
        assert!(matches!(err, BackendError::ToolCallFailed(_)));
    }

    #[tokio::test]
    async fn test_reset_clears_terminal_state() {
        let backend = ChildBackend::new(Language::Python);
        backend.mark_terminal("too many crashes").await;
        backend.reset().await;
        assert_eq!(backend.status().await, BackendStatus::Stopped);
        let (restart_count, _) = backend.crash_info().await;
        assert_eq!(restart_count, 0);
    }
}
