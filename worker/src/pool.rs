//! Workspace-keyed pool of live LSP connections (spec §4.2, §5).
//!
//! Exactly one [`Connection`] exists per project root at a time. Callers
//! obtain one through [`ConnectionPool::get_or_spawn`], which uses a
//! `tokio::sync::OnceCell` per key so concurrent requests for the same
//! root share a single in-flight spawn+initialize instead of racing.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_lsp::concurrency::ConcurrencyLayer;
use async_lsp::panic::CatchUnwindLayer;
use async_lsp::router::Router;
use async_lsp::tracing::TracingLayer;
use async_lsp::{LanguageServer, ServerSocket};
use lsp_types::{
    notification, ClientCapabilities, ClientInfo, CompletionClientCapabilities,
    CompletionItemCapability, DidChangeTextDocumentParams, DidChangeWatchedFilesClientCapabilities,
    DidCloseTextDocumentParams, DidOpenTextDocumentParams, DocumentSymbolClientCapabilities,
    DynamicRegistrationClientCapabilities, GotoCapability, HoverClientCapabilities,
    InitializeParams, InitializedParams, MarkupKind, PublishDiagnosticsParams, RenameClientCapabilities,
    ServerCapabilities, SignatureHelpClientCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentItem, TextDocumentSyncClientCapabilities,
    TraceValue, Url, WindowClientCapabilities, WorkDoneProgressParams, WorkspaceClientCapabilities,
    WorkspaceEditClientCapabilities, WorkspaceFolder, WorkspaceSymbolClientCapabilities,
};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tower::ServiceBuilder;

use lspbridge_core::config::Language;
use lspbridge_core::error::LspError;
use lspbridge_core::paths::path_to_url;

use crate::document::DocumentCache;
use crate::tsserver_bridge::TsServerBridge;
use crate::transport::{TsServerRequestNotification, TsServerResponseNotification};

/// How a per-language worker launches its backing LSP server.
#[derive(Debug, Clone)]
pub struct ServerLaunch {
    /// Executable to spawn (`pyright-langserver`, `typescript-language-server`, `vue-language-server`, ...).
    pub command: String,
    /// Arguments, typically `["--stdio"]`.
    pub args: Vec<String>,
    /// LSP `languageId` used for `didOpen` on documents served by this connection.
    pub language_id: String,
}

/// Diagnostics cache fed by `textDocument/publishDiagnostics` pushes
/// (spec §4.2: last push per URI wins).
#[derive(Debug, Default)]
pub struct DiagnosticCache {
    inner: Mutex<HashMap<Url, PublishDiagnosticsParams>>,
}

impl DiagnosticCache {
    fn new() -> Self {
        Self::default()
    }

    async fn record(&self, params: PublishDiagnosticsParams) {
        self.inner.lock().await.insert(params.uri.clone(), params);
    }

    /// Returns the most recently pushed diagnostics for `uri`, if any.
    pub async fn get(&self, uri: &Url) -> Option<PublishDiagnosticsParams> {
        self.inner.lock().await.get(uri).cloned()
    }
}

#[derive(Clone)]
struct RouterState {
    diagnostics: Arc<DiagnosticCache>,
    crashed: Arc<AtomicBool>,
    tsserver_bridge: Arc<OnceCell<Arc<TsServerBridge>>>,
    workspace_root: PathBuf,
    client: ServerSocket,
}

impl RouterState {
    /// Handles a `tsserver/request` notification forwarded by Volar (spec
    /// §4.4 points 4-5): dispatches the command to the companion process
    /// and replies with exactly one `tsserver/response` notification,
    /// spawning the bridge on first use if it isn't already running.
    async fn handle_tsserver_request(&self, params: Value) {
        let seq = params.get("seq").and_then(Value::as_i64);
        let command = params.get("command").and_then(Value::as_str).map(str::to_string);
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let (seq, command) = match (seq, command) {
            (Some(seq), Some(command)) => (seq, command),
            _ => {
                tracing::warn!(?params, "malformed tsserver/request notification, ignoring");
                return;
            }
        };

        let bridge = match self
            .tsserver_bridge
            .get_or_try_init(|| async { TsServerBridge::spawn(&self.workspace_root).await.map(Arc::new) })
            .await
        {
            Ok(bridge) => Arc::clone(bridge),
            Err(err) => {
                tracing::warn!(error = %err, "failed to spawn tsserver bridge for forwarded request");
                self.reply(seq, Value::Null);
                return;
            }
        };

        let body = bridge.dispatch(&command, arguments).await.unwrap_or_else(|err| {
            tracing::warn!(error = %err, command = %command, "tsserver bridge dispatch failed");
            Value::Null
        });
        self.reply(seq, body);
    }

    fn reply(&self, seq: i64, body: Value) {
        let params = serde_json::json!({ "seq": seq, "body": body });
        if let Err(err) = self.client.notify::<TsServerResponseNotification>(params) {
            tracing::warn!(error = %err, "failed to send tsserver/response notification");
        }
    }
}

/// One live LSP connection for a single project root.
pub struct Connection {
    /// The project root this connection was initialized against.
    pub workspace_root: PathBuf,
    server: Arc<Mutex<ServerSocket>>,
    mainloop_handle: tokio::task::JoinHandle<()>,
    /// Capabilities advertised by the server at `initialize` time.
    pub capabilities: Arc<ServerCapabilities>,
    /// Open documents tracked for this connection.
    pub documents: Arc<Mutex<DocumentCache>>,
    /// Diagnostics last pushed by the server, keyed by URI.
    pub diagnostics: Arc<DiagnosticCache>,
    /// Set if the mainloop task observes the connection die.
    crashed: Arc<AtomicBool>,
    /// Companion tsserver.js bridge for the Vue path. Spawned lazily on
    /// first use, not at connection handshake time (spec §4.4). Shared with
    /// the notification router so a bridge spawned to answer a forwarded
    /// `tsserver/request` is reused by direct dispatcher calls, and vice versa.
    tsserver_bridge: Arc<OnceCell<Arc<TsServerBridge>>>,
    last_used: Mutex<Instant>,
    _child: Mutex<async_process::Child>,
}

impl Connection {
    /// Spawns the language server, performs the LSP handshake, and returns
    /// a ready connection.
    ///
    /// ## Errors
    /// Returns [`LspError::ServerStartFailed`] if the process can't be
    /// spawned, or [`LspError::InitializationFailed`]/[`LspError::Timeout`]
    /// if the handshake doesn't complete in time.
    pub async fn spawn(
        launch: &ServerLaunch,
        workspace_root: &Path,
        init_timeout: std::time::Duration,
    ) -> Result<Self, LspError> {
        let mut cmd = async_process::Command::new(&launch.command);
        cmd.args(&launch.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LspError::ServerStartFailed(format!("'{}': {}", launch.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LspError::ServerStartFailed("no stdout".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LspError::ServerStartFailed("no stdin".into()))?;

        let diagnostics = Arc::new(DiagnosticCache::new());
        let crashed = Arc::new(AtomicBool::new(false));
        let tsserver_bridge: Arc<OnceCell<Arc<TsServerBridge>>> = Arc::new(OnceCell::new());
        let workspace_root_buf = workspace_root.to_path_buf();

        let (mainloop, server) = async_lsp::MainLoop::new_client(|client| {
            let state = RouterState {
                diagnostics: Arc::clone(&diagnostics),
                crashed: Arc::clone(&crashed),
                tsserver_bridge: Arc::clone(&tsserver_bridge),
                workspace_root: workspace_root_buf,
                client,
            };
            let mut router = Router::new(state);

            router.notification::<notification::Progress>(|_, _| ControlFlow::Continue(()));
            router.notification::<notification::PublishDiagnostics>(|this, params| {
                let diagnostics = Arc::clone(&this.diagnostics);
                tokio::spawn(async move { diagnostics.record(params).await });
                ControlFlow::Continue(())
            });
            router.notification::<TsServerRequestNotification>(|this, params| {
                let this = this.clone();
                tokio::spawn(async move { this.handle_tsserver_request(params).await });
                ControlFlow::Continue(())
            });

            // Server-initiated requests every worker-managed server may
            // send during a session; none of them carry information the
            // gateway needs, so they're acknowledged with empty/null bodies.
            router.request::<lsp_types::request::WorkspaceConfiguration, _>(|_, params| {
                let count = params.items.len();
                async move { Ok(vec![serde_json::Value::Null; count]) }
            });
            router.request::<lsp_types::request::RegisterCapability, _>(|_, _| async move { Ok(()) });
            router.request::<lsp_types::request::WorkDoneProgressCreate, _>(|_, _| async move { Ok(()) });

            ServiceBuilder::new()
                .layer(TracingLayer::default())
                .layer(CatchUnwindLayer::default())
                .layer(ConcurrencyLayer::default())
                .service(router)
        });

        let mainloop_handle = tokio::spawn({
            let crashed = Arc::clone(&crashed);
            async move {
                mainloop.run_buffered(stdout, stdin).await.ok();
                crashed.store(true, Ordering::SeqCst);
            }
        });

        let workspace_uri = path_to_url(workspace_root)?;
        let init_params = build_initialize_params(workspace_root, workspace_uri);

        let server = Arc::new(Mutex::new(server));
        let init_result = tokio::time::timeout(init_timeout, server.lock().await.initialize(init_params))
            .await
            .map_err(|_| LspError::Timeout(init_timeout))?
            .map_err(|e| LspError::InitializationFailed(format!("{e:?}")))?;

        server
            .lock()
            .await
            .initialized(InitializedParams {})
            .map_err(|e| LspError::InitializationFailed(format!("{e:?}")))?;

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            server,
            mainloop_handle,
            capabilities: Arc::new(init_result.capabilities),
            documents: Arc::new(Mutex::new(DocumentCache::new())),
            diagnostics,
            crashed,
            tsserver_bridge,
            last_used: Mutex::new(Instant::now()),
            _child: Mutex::new(child),
        })
    }

    /// Whether the underlying process/mainloop has terminated.
    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst) || self.mainloop_handle.is_finished()
    }

    /// Marks the connection as recently used, for idle-reap accounting.
    pub async fn touch(&self) {
        *self.last_used.lock().await = Instant::now();
    }

    /// Seconds since the connection was last used.
    pub async fn idle_for(&self) -> std::time::Duration {
        self.last_used.lock().await.elapsed()
    }

    /// Ensures `path`'s content is open on the server, sending `didOpen`
    /// only the first time (spec §4.2).
    ///
    /// ## Errors
    /// Propagates read or protocol errors.
    pub async fn ensure_open(&self, path: &Path, language_id: &str) -> Result<Url, LspError> {
        let uri = path_to_url(path)?;
        let mut docs = self.documents.lock().await;
        if docs.is_open(&uri) {
            return Ok(uri);
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LspError::DocumentNotFound(format!("{}: {}", path.display(), e)))?;

        self.server
            .lock()
            .await
            .did_open(DidOpenTextDocumentParams {
                text_document: TextDocumentItem {
                    uri: uri.clone(),
                    language_id: language_id.to_string(),
                    version: 1,
                    text: content.clone(),
                },
            })
            .map_err(|e| LspError::RequestFailed(format!("didOpen: {e:?}")))?;

        docs.open(uri.clone(), language_id.to_string(), content);
        Ok(uri)
    }

    /// Pushes a full-text update for an already-open document.
    ///
    /// ## Errors
    /// Returns [`LspError::DocumentNotFound`] if the document isn't open.
    pub async fn update_document(&self, uri: &Url, content: String) -> Result<(), LspError> {
        let mut docs = self.documents.lock().await;
        let version = docs.update(uri, content.clone())?;

        self.server
            .lock()
            .await
            .did_change(DidChangeTextDocumentParams {
                text_document: lsp_types::VersionedTextDocumentIdentifier {
                    uri: uri.clone(),
                    version,
                },
                content_changes: vec![TextDocumentContentChangeEvent {
                    range: None,
                    range_length: None,
                    text: content,
                }],
            })
            .map_err(|e| LspError::RequestFailed(format!("didChange: {e:?}")))
    }

    /// Closes a document, releasing it from the cache.
    ///
    /// ## Errors
    /// Propagates protocol errors.
    pub async fn close_document(&self, uri: &Url) -> Result<(), LspError> {
        self.server
            .lock()
            .await
            .did_close(DidCloseTextDocumentParams {
                text_document: lsp_types::TextDocumentIdentifier { uri: uri.clone() },
            })
            .map_err(|e| LspError::RequestFailed(format!("didClose: {e:?}")))?;
        self.documents.lock().await.close(uri);
        Ok(())
    }

    /// Shared handle to the underlying server socket, for dispatcher-level
    /// requests this module doesn't wrap directly.
    pub fn socket(&self) -> Arc<Mutex<ServerSocket>> {
        Arc::clone(&self.server)
    }

    /// Lazily spawns (on first call) and returns the companion tsserver.js
    /// bridge for this connection's workspace root (spec §4.4, Vue path
    /// only; harmless but unused on other connections).
    ///
    /// ## Errors
    /// Propagates [`LspError::ServerStartFailed`] if the companion process
    /// can't be located or spawned.
    pub async fn tsserver_bridge(&self) -> Result<Arc<TsServerBridge>, LspError> {
        self.tsserver_bridge
            .get_or_try_init(|| async { TsServerBridge::spawn(&self.workspace_root).await.map(Arc::new) })
            .await
            .cloned()
    }

    /// Sends `shutdown` then `exit` to the server.
    ///
    /// ## Errors
    /// Propagates protocol errors.
    pub async fn shutdown(&self) -> Result<(), LspError> {
        self.server
            .lock()
            .await
            .shutdown(())
            .await
            .map_err(|e| LspError::RequestFailed(format!("shutdown: {e:?}")))?;
        self.server
            .lock()
            .await
            .exit(())
            .map_err(|e| LspError::RequestFailed(format!("exit: {e:?}")))
    }
}

fn build_initialize_params(workspace_root: &Path, workspace_uri: Url) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: workspace_uri,
            name: workspace_root
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("workspace")
                .to_string(),
        }]),
        initialization_options: None,
        capabilities: ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                apply_edit: Some(true),
                workspace_edit: Some(WorkspaceEditClientCapabilities {
                    document_changes: Some(true),
                    ..Default::default()
                }),
                did_change_configuration: Some(DynamicRegistrationClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                did_change_watched_files: Some(DidChangeWatchedFilesClientCapabilities {
                    dynamic_registration: Some(false),
                    relative_pattern_support: None,
                }),
                symbol: Some(WorkspaceSymbolClientCapabilities {
                    dynamic_registration: Some(false),
                    ..Default::default()
                }),
                execute_command: Some(DynamicRegistrationClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                configuration: Some(true),
                ..Default::default()
            }),
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    dynamic_registration: Some(false),
                    will_save: Some(false),
                    will_save_wait_until: Some(false),
                    did_save: Some(false),
                }),
                completion: Some(CompletionClientCapabilities {
                    dynamic_registration: Some(false),
                    completion_item: Some(CompletionItemCapability {
                        snippet_support: Some(false),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                hover: Some(HoverClientCapabilities {
                    dynamic_registration: Some(false),
                    content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                }),
                signature_help: Some(SignatureHelpClientCapabilities {
                    dynamic_registration: Some(false),
                    ..Default::default()
                }),
                definition: Some(GotoCapability {
                    dynamic_registration: Some(false),
                    link_support: Some(false),
                }),
                references: Some(DynamicRegistrationClientCapabilities {
                    dynamic_registration: Some(false),
                }),
                document_symbol: Some(DocumentSymbolClientCapabilities {
                    dynamic_registration: Some(false),
                    hierarchical_document_symbol_support: Some(true),
                    ..Default::default()
                }),
                rename: Some(RenameClientCapabilities {
                    dynamic_registration: Some(false),
                    prepare_support: Some(true),
                    ..Default::default()
                }),
                publish_diagnostics: Some(lsp_types::PublishDiagnosticsClientCapabilities {
                    related_information: Some(true),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            window: Some(WindowClientCapabilities {
                work_done_progress: Some(true),
                ..Default::default()
            }),
            experimental: Some(true.into()),
            ..Default::default()
        },
        trace: Some(TraceValue::Off),
        client_info: Some(ClientInfo {
            name: "lspbridge-worker".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        locale: None,
        work_done_progress_params: WorkDoneProgressParams::default(),
        ..Default::default()
    }
}

/// A workspace-keyed set of connections, one per project root, per
/// language worker process (spec §4.2: "at most one connection per
/// workspace root").
#[derive(Default)]
pub struct ConnectionPool {
    cells: Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<Connection>>>>>,
    language: Option<Language>,
}

impl ConnectionPool {
    /// Creates an empty pool for the given language (used for log context
    /// only; the pool itself is language-agnostic).
    pub fn new(language: Language) -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
            language: Some(language),
        }
    }

    /// Returns the live connection for `workspace_root`, spawning one if
    /// none exists. Concurrent callers for the same root share a single
    /// in-flight spawn (spec §5: "at most one in-flight initialize per
    /// workspace").
    ///
    /// ## Errors
    /// Propagates [`LspError`] from [`Connection::spawn`].
    pub async fn get_or_spawn<F, Fut>(&self, workspace_root: &Path, spawn: F) -> Result<Arc<Connection>, LspError>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: std::future::Future<Output = Result<Connection, LspError>>,
    {
        let key = workspace_root.to_path_buf();
        let cell = {
            let mut cells = self.cells.lock().await;
            Arc::clone(cells.entry(key.clone()).or_insert_with(|| Arc::new(OnceCell::new())))
        };

        let connection = cell
            .get_or_try_init(|| async { spawn(key.clone()).await.map(Arc::new) })
            .await?;

        if connection.is_crashed() {
            // The cached connection died after it was cached: drop its cell
            // so the next caller (and this one, on retry) spawns fresh.
            self.cells.lock().await.remove(&key);
            let fresh = Arc::new(spawn(key.clone()).await?);
            let new_cell = Arc::new(OnceCell::new());
            let _ = new_cell.set(Arc::clone(&fresh));
            self.cells.lock().await.insert(key, new_cell);
            return Ok(fresh);
        }

        connection.touch().await;
        Ok(Arc::clone(connection))
    }

    /// Drops the cached connection for `workspace_root`, if any, without
    /// shutting it down gracefully (used when a crash is observed
    /// externally).
    pub async fn evict(&self, workspace_root: &Path) {
        self.cells.lock().await.remove(workspace_root);
    }

    /// Drops every cached connection (used by `switch_workspace`).
    pub async fn clear(&self) {
        self.cells.lock().await.clear();
    }

    /// All project roots currently holding a connection.
    pub async fn active_roots(&self) -> Vec<PathBuf> {
        self.cells.lock().await.keys().cloned().collect()
    }

    /// The language this pool was constructed for, if tagged.
    pub fn language(&self) -> Option<Language> {
        self.language
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_diagnostic_cache_last_push_wins() {
        let cache = DiagnosticCache::new();
        let uri = Url::parse("file:///a.py").unwrap();
        cache
            .record(PublishDiagnosticsParams {
                uri: uri.clone(),
                diagnostics: vec![],
                version: Some(1),
            })
            .await;
        cache
            .record(PublishDiagnosticsParams {
                uri: uri.clone(),
                diagnostics: vec![],
                version: Some(2),
            })
            .await;
        let latest = cache.get(&uri).await.unwrap();
        assert_eq!(latest.version, Some(2));
    }

    #[test]
    fn test_pool_is_tagged_with_language() {
        let pool = ConnectionPool::new(Language::Python);
        assert_eq!(pool.language(), Some(Language::Python));
    }
}
