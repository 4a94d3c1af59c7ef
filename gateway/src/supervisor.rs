//! Supervisor loop (spec §4.9): idle reaper and crash-backoff restart,
//! both driven by a single periodic sweep over every spawned backend.
//!
//! The manager (§4.6) already retries a failed in-flight tool call once,
//! immediately, against a freshly spawned backend — that is the
//! `TransientToolError` path. This module instead catches backends that
//! went quiet between calls (crashed or sat idle) and decides, on a timer,
//! whether to reap them or schedule a backoff restart.

use std::sync::Arc;
use std::time::Duration;

use lspbridge_core::config::Language;
use tracing::{info, warn};

use crate::backend::BackendStatus;
use crate::manager::BackendManager;

/// How often the sweep runs (spec §4.9 "every 60 s").
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Consecutive crashes within the backoff window before a backend goes terminal.
pub const CRASH_RETRY_LIMIT: u32 = 5;

/// `min(2^(n-1) × 1s, 30s)` where `n` is the current retry count.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let n = retry_count.max(1);
    let scaled = 1u64.checked_shl(n - 1).unwrap_or(u64::MAX);
    Duration::from_secs(scaled.min(30))
}

/// Owns the periodic sweep; `run` never returns except on cancellation.
pub struct Supervisor {
    manager: Arc<BackendManager>,
    idle_timeout: Option<Duration>,
}

impl Supervisor {
    /// Builds a supervisor over `manager`, reaping backends idle longer than
    /// `idle_timeout` (`None` disables the idle reaper, per `LSP_MCP_IDLE_TIMEOUT=0`).
    pub fn new(manager: Arc<BackendManager>, idle_timeout: Option<Duration>) -> Self {
        Self { manager, idle_timeout }
    }

    /// Runs the sweep loop forever on the current task. Intended to be
    /// spawned once at startup and left running until shutdown.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// Runs a single sweep pass; exposed separately so tests don't need a
    /// live 60-second timer.
    pub async fn sweep_once(&self) {
        for backend in self.manager.all_existing().await {
            match backend.status().await {
                BackendStatus::Ready => {
                    if let Some(idle_timeout) = self.idle_timeout {
                        if backend.idle_for().await >= idle_timeout {
                            info!(language = %backend.language, "reaping idle backend");
                            backend.mark_stopped().await;
                        }
                    }
                }
                BackendStatus::Error => self.maybe_restart(backend.language, &backend).await,
                BackendStatus::Starting | BackendStatus::Stopped => {}
            }
        }
    }

    async fn maybe_restart(&self, language: Language, backend: &crate::backend::ChildBackend) {
        let (restart_count, since_crash) = backend.crash_info().await;

        if restart_count >= CRASH_RETRY_LIMIT {
            backend.mark_terminal(format!("{language} backend failed {restart_count} times; use start_backend to retry")).await;
            return;
        }

        let Some(since_crash) = since_crash else { return };
        if since_crash < backoff_delay(restart_count) {
            return;
        }

        warn!(language = %language, restart_count, "attempting backoff restart");
        if let Err(err) = self.manager.get_or_spawn(language).await {
            warn!(language = %language, error = %err, "backoff restart failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_until_cap() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(30));
        assert_eq!(backoff_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_delay_monotonic_non_decreasing() {
        let mut previous = Duration::from_secs(0);
        for n in 1..20 {
            let delay = backoff_delay(n);
            assert!(delay >= previous);
            previous = delay;
        }
    }
}
