//! The `#[tool_router]`/`#[tool_handler]` MCP surface exposed by a single
//! language worker (spec §4.5). Tool bodies resolve the file against the
//! active workspace, get or spawn a connection, and delegate to
//! `dispatcher::*` for the LSP round trip and JSON translation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ErrorCode, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use tokio::sync::RwLock;

use lspbridge_core::config::Language;
use lspbridge_core::error::LspError;
use lspbridge_core::paths::detect_project_root;

use crate::dispatcher;
use crate::pool::{Connection, ConnectionPool, ServerLaunch};
use crate::tools::{
    CompletionsParams, DiagnosticsParams, HoverParams, PythonChangeSignatureParams, PythonMoveParams,
    ReferencesParams, RenameParams, SearchParams, SymbolsParams, TypeScriptApplyRefactorParams,
    TypeScriptAvailableRefactorsParams, UpdateDocumentParams,
};

const INIT_TIMEOUT: Duration = Duration::from_secs(10);

fn lsp_error_to_mcp(e: LspError) -> McpError {
    let code = match &e {
        LspError::OutsideWorkspace(_) => ErrorCode::INVALID_PARAMS,
        LspError::InvalidPosition { .. } => ErrorCode::INVALID_PARAMS,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    McpError::new(code, e.to_string(), None)
}

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, format!("failed to encode result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// One language worker: owns a [`ConnectionPool`] keyed by project root and
/// exposes MCP tools over stdio.
#[derive(Clone)]
pub struct Worker {
    language: Language,
    launch: ServerLaunch,
    active_workspace: Arc<RwLock<Option<PathBuf>>>,
    pool: Arc<ConnectionPool>,
    tool_router: rmcp::handler::server::tool::ToolRouter<Worker>,
}

impl Worker {
    /// Creates a worker for `language`, using `launch` to start the
    /// backing LSP server on first demand.
    pub fn new(language: Language, launch: ServerLaunch) -> Self {
        Self {
            language,
            launch,
            active_workspace: Arc::new(RwLock::new(None)),
            pool: Arc::new(ConnectionPool::new(language)),
            tool_router: Self::tool_router(),
        }
    }

    /// The language this worker was started for.
    pub fn language(&self) -> Language {
        self.language
    }

    /// Resolves a file argument, detects its project root, and returns a
    /// ready connection for that root (spec §4.3, §4.5).
    async fn connection_for(&self, file: &str) -> Result<(Arc<Connection>, PathBuf), McpError> {
        let workspace_root = {
            let guard = self.active_workspace.read().await;
            guard.clone().unwrap_or_else(|| PathBuf::from("."))
        };

        let resolved = dispatcher::resolve_in_workspace(file, &workspace_root).map_err(lsp_error_to_mcp)?;
        let project_root = detect_project_root(&resolved);
        let launch = self.launch.clone();

        let connection = self
            .pool
            .get_or_spawn(&project_root, move |root| {
                let launch = launch.clone();
                async move { Connection::spawn(&launch, &root, INIT_TIMEOUT).await }
            })
            .await
            .map_err(lsp_error_to_mcp)?;

        Ok((connection, resolved))
    }

    /// Clears every cached connection, forcing the next call to rebuild a
    /// fresh pool rooted at whatever workspace is active at that time
    /// (spec §4.8).
    pub async fn clear_connections(&self) {
        self.pool.clear().await;
    }

    /// Sets the active workspace path.
    pub async fn set_active_workspace(&self, path: PathBuf) {
        *self.active_workspace.write().await = Some(path);
    }
}

#[tool_router]
impl Worker {
    #[tool(description = "Resolve the type signature and documentation for the symbol at a position.")]
    async fn hover(&self, Parameters(params): Parameters<HoverParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::hover(&conn, &path, params.line, params.column)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Jump to the definition site of the symbol at a position.")]
    async fn definition(&self, Parameters(params): Parameters<HoverParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::definition(&conn, &path, params.line, params.column)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Find every reference to the symbol at a position.")]
    async fn references(&self, Parameters(params): Parameters<ReferencesParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::references(&conn, &path, params.line, params.column, params.include_declaration)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "List completion candidates at a position.")]
    async fn completions(&self, Parameters(params): Parameters<CompletionsParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::completions(&conn, &path, params.line, params.column, params.limit)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Show the active call signature and parameter at a position.")]
    async fn signature_help(&self, Parameters(params): Parameters<HoverParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::signature_help(&conn, &path, params.line, params.column)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "List symbols defined in a file, optionally filtered by a name substring.")]
    async fn symbols(&self, Parameters(params): Parameters<SymbolsParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::symbols(&conn, &path, params.query.as_deref())
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(
        description = "Preview renaming the symbol at a position to newName. Returns a list of edits; nothing is written to disk."
    )]
    async fn rename(&self, Parameters(params): Parameters<RenameParams>) -> Result<CallToolResult, McpError> {
        if !lspbridge_core::capability::supports_unified(self.language, "rename") {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("rename is not available on the {} worker", self.language),
                None,
            ));
        }
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::rename(&conn, &path, params.line, params.column, &params.new_name)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Return diagnostics currently known for a file.")]
    async fn diagnostics(&self, Parameters(params): Parameters<DiagnosticsParams>) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::diagnostics(&conn, &path).await.map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Push new full-text content for a file to the language server without writing to disk.")]
    async fn update_document(
        &self,
        Parameters(params): Parameters<UpdateDocumentParams>,
    ) -> Result<CallToolResult, McpError> {
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::update_document(&conn, &path, params.content)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Search the active workspace's text content with ripgrep.")]
    async fn search(&self, Parameters(params): Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        let workspace_root = {
            let guard = self.active_workspace.read().await;
            guard.clone().unwrap_or_else(|| PathBuf::from("."))
        };
        let value = dispatcher::search(&workspace_root, &params.pattern, params.path.as_deref(), params.glob.as_deref())
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Move a Python symbol to a new module (Python worker only).")]
    async fn python_move(&self, Parameters(params): Parameters<PythonMoveParams>) -> Result<CallToolResult, McpError> {
        if self.language != Language::Python {
            return Err(McpError::new(ErrorCode::METHOD_NOT_FOUND, "python_move is only available on the Python worker", None));
        }
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::python_move(&conn, &path, params.line, params.column, &params.destination, "pylsp.move_symbol")
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Change a Python function's parameter list (Python worker only).")]
    async fn python_change_signature(
        &self,
        Parameters(params): Parameters<PythonChangeSignatureParams>,
    ) -> Result<CallToolResult, McpError> {
        if self.language != Language::Python {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                "python_change_signature is only available on the Python worker",
                None,
            ));
        }
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::python_change_signature(
            &conn,
            &path,
            params.line,
            params.column,
            &params.new_parameters,
            "pylsp.change_signature",
        )
        .await
        .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "List refactors available at a position (TypeScript worker only).")]
    async fn typescript_available_refactors(
        &self,
        Parameters(params): Parameters<TypeScriptAvailableRefactorsParams>,
    ) -> Result<CallToolResult, McpError> {
        if self.language != Language::TypeScript {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                "typescript_available_refactors is only available on the TypeScript worker",
                None,
            ));
        }
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::typescript_available_refactors(&conn, &path, params.line, params.column)
            .await
            .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Preview applying a named refactor action at a position (TypeScript worker only).")]
    async fn typescript_apply_refactor(
        &self,
        Parameters(params): Parameters<TypeScriptApplyRefactorParams>,
    ) -> Result<CallToolResult, McpError> {
        if self.language != Language::TypeScript {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                "typescript_apply_refactor is only available on the TypeScript worker",
                None,
            ));
        }
        let (conn, path) = self.connection_for(&params.file).await?;
        let value = dispatcher::typescript_apply_refactor(
            &conn,
            &path,
            params.line,
            params.column,
            &params.refactor_name,
            &params.action_name,
        )
        .await
        .map_err(lsp_error_to_mcp)?;
        json_result(value)
    }

    #[tool(description = "Clear cached connections so the next call rebuilds against a new workspace root.")]
    async fn switch_workspace(&self, Parameters(params): Parameters<SwitchWorkspaceParams>) -> Result<CallToolResult, McpError> {
        let path = PathBuf::from(&params.path);
        if !path.is_dir() {
            return Err(McpError::new(ErrorCode::INVALID_PARAMS, format!("{} is not a directory", path.display()), None));
        }
        self.set_active_workspace(path.clone()).await;
        self.clear_connections().await;
        json_result(serde_json::json!({ "success": true, "workspace": path.display().to_string() }))
    }
}

/// Parameters for `switch_workspace`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
struct SwitchWorkspaceParams {
    /// Absolute path to the new active workspace.
    path: String,
}

#[tool_handler]
impl ServerHandler for Worker {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: format!("lspbridge-worker-{}", self.language.as_str()),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(format!(
                "Language-intelligence worker for {}, backed by the Language Server Protocol. \
                 Forwarded by the lspbridge gateway under the unified tool surface or the \
                 `{}_*` prefix.",
                self.language,
                self.language.as_str(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch() -> ServerLaunch {
        ServerLaunch {
            command: "pyright-langserver".into(),
            args: vec!["--stdio".into()],
            language_id: "python".into(),
        }
    }

    #[test]
    fn test_worker_reports_its_language() {
        let worker = Worker::new(Language::Python, launch());
        assert_eq!(worker.language(), Language::Python);
    }

    #[tokio::test]
    async fn test_switch_workspace_rejects_non_directory() {
        let worker = Worker::new(Language::Python, launch());
        let result = worker
            .switch_workspace(Parameters(SwitchWorkspaceParams {
                path: "/definitely/does/not/exist".into(),
            }))
            .await;
        assert!(result.is_err());
    }
}
