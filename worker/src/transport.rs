//! Newline-delimited JSON-RPC transport for Volar's companion `tsserver.js`
//! process (spec §4.1, §4.4).
//!
//! Unlike the main Volar connection (Content-Length framed LSP, handled by
//! `async-lsp`), the companion process speaks tsserver's native wire format:
//! one JSON object per line, no headers. Nothing in the workspace's
//! dependency stack covers that framing, so it's hand-rolled here.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_process::{Child, ChildStdin, ChildStdout, Command};
use futures::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};

use lspbridge_core::error::TransportError;

/// How long a forwarded tsserver command may run before the transport
/// gives up and reports a `null` body for that sub-id (spec §4.4).
pub const TSSERVER_REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// A request queued for the companion process, tagged with the gateway's
/// `sub_id` so its reply can be routed back.
#[derive(Debug, Clone, Serialize)]
struct TsServerCommand {
    seq: i64,
    #[serde(rename = "type")]
    kind: &'static str,
    command: String,
    arguments: Value,
}

/// A raw line read back from the companion process.
#[derive(Debug, Clone, Deserialize)]
struct TsServerReply {
    #[serde(rename = "request_seq")]
    request_seq: Option<i64>,
    #[serde(flatten)]
    body: Value,
}

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;

/// Owns the companion `tsserver.js` child process and multiplexes requests
/// onto it by sequence number.
pub struct TsServerTransport {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: PendingMap,
    next_seq: AtomicI64,
}

impl TsServerTransport {
    /// Spawns the companion process and starts its reader loop.
    ///
    /// `command` and `args` describe how to launch tsserver.js (resolved by
    /// the caller from the active TypeScript SDK, per spec §4.4).
    ///
    /// ## Errors
    /// Returns [`TransportError::IoError`] if the process can't be spawned.
    pub async fn spawn(command: &str, args: &[String], cwd: &std::path::Path) -> Result<Self, TransportError> {
        let mut child = Command::new(command)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::InvalidFraming("tsserver.js child has no stdin".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::InvalidFraming("tsserver.js child has no stdout".into())
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        spawn_reader(stdout, Arc::clone(&pending));

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_seq: AtomicI64::new(1),
        })
    }

    /// Sends `command` with `arguments` to the companion process and awaits
    /// its reply, or `Value::Null` if it doesn't answer within
    /// [`TSSERVER_REQUEST_TIMEOUT`] (spec §4.4: one reply per sub-id,
    /// replies may arrive out of order).
    pub async fn request(&self, command: String, arguments: Value) -> Result<Value, TransportError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(seq, tx);

        let payload = TsServerCommand {
            seq,
            kind: "request",
            command,
            arguments,
        };
        let mut line = serde_json::to_string(&payload)
            .map_err(|e| TransportError::SerializationError(e.to_string()))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(TransportError::IoError)?;
            stdin.flush().await.map_err(TransportError::IoError)?;
        }

        match tokio::time::timeout(TSSERVER_REQUEST_TIMEOUT, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Ok(Value::Null), // reader loop dropped the sender: process died
            Err(_) => {
                self.pending.lock().await.remove(&seq);
                Ok(Value::Null)
            }
        }
    }

    /// Terminates the companion process.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        let mut child = self.child.lock().await;
        child.kill().map_err(TransportError::IoError)?;
        Ok(())
    }
}

fn spawn_reader(stdout: ChildStdout, pending: PendingMap) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match futures::StreamExt::next(&mut lines).await {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let Ok(reply) = serde_json::from_str::<TsServerReply>(&line) else {
                        continue;
                    };
                    let Some(seq) = reply.request_seq else {
                        continue;
                    };
                    if let Some(tx) = pending.lock().await.remove(&seq) {
                        let _ = tx.send(reply.body);
                    }
                }
                _ => break,
            }
        }
        // Process exited: answer everything still outstanding with null
        // rather than leaving callers hanging on their timeout.
        let mut pending = pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Value::Null);
        }
    });
}

/// Custom LSP notification carrying a gateway-originated tsserver command
/// over Volar's main connection (spec §4.4). Volar forwards the payload to
/// its companion process and relays the reply via
/// [`TsServerResponseNotification`].
#[derive(Debug, Clone)]
pub enum TsServerRequestNotification {}

impl lsp_types::notification::Notification for TsServerRequestNotification {
    type Params = Value;
    const METHOD: &'static str = "tsserver/request";
}

/// Custom LSP notification Volar sends back with a tsserver reply.
#[derive(Debug, Clone)]
pub enum TsServerResponseNotification {}

impl lsp_types::notification::Notification for TsServerResponseNotification {
    type Params = Value;
    const METHOD: &'static str = "tsserver/response";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serializes_with_type_request() {
        let cmd = TsServerCommand {
            seq: 3,
            kind: "request",
            command: "_vue:projectInfo".into(),
            arguments: serde_json::json!({}),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["seq"], 3);
    }

    #[test]
    fn test_reply_parses_request_seq() {
        let line = r#"{"request_seq": 7, "success": true, "body": {"x": 1}}"#;
        let reply: TsServerReply = serde_json::from_str(line).unwrap();
        assert_eq!(reply.request_seq, Some(7));
    }

    #[test]
    fn test_reply_without_request_seq_is_ignorable() {
        let line = r#"{"type": "event", "event": "projectsUpdatedInBackground"}"#;
        let reply: TsServerReply = serde_json::from_str(line).unwrap();
        assert_eq!(reply.request_seq, None);
    }
}
