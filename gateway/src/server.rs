//! The aggregator's own MCP surface (spec §6): the `#[tool_router]` exposing
//! `status`/`check_versions`/`list_backends`/`start_backend`/
//! `update_backend`/`switch_workspace`/`switch_python_backend`, plus the
//! unified tools and the `<lang>_<tool>` forwarders. Every tool body
//! resolves a target language, makes sure that backend has seen the active
//! workspace, and delegates to [`crate::router`] for the actual dispatch.

use std::sync::Arc;

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ErrorCode, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde::Serialize;
use serde_json::json;

use lspbridge_core::config::{Language, PythonProvider};
use lspbridge_core::error::{ErrorEnvelope, ErrorKind};

use crate::manager::BackendManager;
use crate::router;
use crate::tools::{
    self, CompletionsParams, DiagnosticsParams, HoverParams, LanguageParams, PythonChangeSignatureParams, PythonMoveParams, ReferencesParams,
    RenameParams, SearchParams, SwitchPythonBackendParams, SwitchWorkspaceParams, SymbolsParams, TypeScriptApplyRefactorParams,
    TypeScriptAvailableRefactorsParams, UpdateDocumentParams,
};
use crate::workspace::WorkspaceCoordinator;

fn envelope_to_mcp(envelope: ErrorEnvelope) -> McpError {
    let code = match envelope.error {
        ErrorKind::InvalidInput | ErrorKind::ContextMismatch => ErrorCode::INVALID_PARAMS,
        ErrorKind::NotImplemented => ErrorCode::METHOD_NOT_FOUND,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    let data = serde_json::to_value(&envelope).ok();
    McpError::new(code, envelope.message, data)
}

fn json_result(value: serde_json::Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| McpError::new(ErrorCode::INTERNAL_ERROR, format!("failed to encode result: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn parse_language(s: &str) -> Result<Language, McpError> {
    Language::parse(s).ok_or_else(|| McpError::new(ErrorCode::INVALID_PARAMS, format!("unknown language: {s}"), None))
}

/// The aggregator core: owns the backend manager and the active workspace,
/// and exposes everything over one MCP tool surface.
#[derive(Clone)]
pub struct Gateway {
    manager: Arc<BackendManager>,
    workspace: Arc<WorkspaceCoordinator>,
    tool_router: rmcp::handler::server::tool::ToolRouter<Gateway>,
}

impl Gateway {
    /// Builds a gateway over an existing manager and workspace coordinator
    /// (both also shared with the supervisor's background sweep task).
    pub fn new(manager: Arc<BackendManager>, workspace: Arc<WorkspaceCoordinator>) -> Self {
        Self {
            manager,
            workspace,
            tool_router: Self::tool_router(),
        }
    }

    async fn sync_workspace_for(&self, language: Language) {
        if let Ok(backend) = self.manager.get_or_spawn(language).await {
            self.workspace.sync_to(&backend).await;
        }
    }

    async fn forward_unified<T: Serialize>(&self, tool: &str, params: &T) -> Result<CallToolResult, McpError> {
        let args = tools::to_arguments(params);
        if let Some(language) = router::infer_language(&args) {
            self.sync_workspace_for(language).await;
        }
        match router::route_unified(&self.manager, tool, args).await {
            Ok(value) => json_result(value),
            Err(envelope) => Err(envelope_to_mcp(envelope)),
        }
    }

    async fn forward_specific<T: Serialize>(&self, language: Language, tool: &str, params: &T) -> Result<CallToolResult, McpError> {
        self.sync_workspace_for(language).await;
        let args = tools::to_arguments(params);
        match router::route_specific(&self.manager, language, tool, args).await {
            Ok(value) => json_result(value),
            Err(envelope) => Err(envelope_to_mcp(envelope)),
        }
    }

    async fn forward_search(&self, params: &SearchParams) -> Result<CallToolResult, McpError> {
        let args = tools::to_arguments(params);
        if let Some(language) = router::infer_language(&args) {
            self.sync_workspace_for(language).await;
            return match router::route_unified(&self.manager, "search", args).await {
                Ok(value) => json_result(value),
                Err(envelope) => Err(envelope_to_mcp(envelope)),
            };
        }
        match router::route_search_unscoped(&self.manager, args).await {
            Ok(value) => json_result(value),
            Err(envelope) => Err(envelope_to_mcp(envelope)),
        }
    }
}

#[tool_router]
impl Gateway {
    #[tool(description = "Report aggregator configuration and per-backend status and version.")]
    async fn status(&self) -> Result<CallToolResult, McpError> {
        let config = self.manager.config().await;
        let backends = self.manager.snapshots().await;
        json_result(json!({
            "config": {
                "pythonEnabled": config.python_enabled,
                "pythonProvider": config.python_provider.as_str(),
                "typescriptEnabled": config.typescript_enabled,
                "vueEnabled": config.vue_enabled,
                "autoUpdate": config.auto_update,
                "eagerStart": config.eager_start,
                "idleTimeoutSecs": config.idle_timeout.map(|d| d.as_secs()),
            },
            "activeWorkspace": self.workspace.active().await.map(|p| p.display().to_string()),
            "backends": backends,
        }))
    }

    #[tool(description = "Report version/command info known for each backend.")]
    async fn check_versions(&self) -> Result<CallToolResult, McpError> {
        let config = self.manager.config().await;
        let mut entries = Vec::new();
        for language in Language::ALL {
            let launch = crate::manager::launch_for(language, &config);
            let server_version = match self.manager.existing(language).await {
                Some(backend) => backend.snapshot().await.server_version,
                None => None,
            };
            entries.push(json!({
                "language": language.as_str(),
                "command": launch.command,
                "args": launch.args,
                "serverVersion": server_version,
            }));
        }
        json_result(json!({ "backends": entries }))
    }

    #[tool(description = "List enabled backends with their provider, status, and discovered tool count.")]
    pub async fn list_backends(&self) -> Result<CallToolResult, McpError> {
        let config = self.manager.config().await;
        let mut entries = Vec::new();
        for language in Language::ALL {
            let snapshot = self.manager.existing(language).await;
            entries.push(json!({
                "language": language.as_str(),
                "enabled": config.is_enabled(language),
                "provider": (language == Language::Python).then(|| config.python_provider.as_str()),
                "status": match &snapshot {
                    Some(backend) => serde_json::to_value(backend.status().await).ok(),
                    None => Some(json!("stopped")),
                },
                "toolCount": match &snapshot {
                    Some(backend) => backend.snapshot().await.tools_registered,
                    None => 0,
                },
            }));
        }
        json_result(json!({ "backends": entries }))
    }

    #[tool(description = "Start (or ensure started) the backend for a language. Clears a terminal error state.")]
    async fn start_backend(&self, Parameters(params): Parameters<LanguageParams>) -> Result<CallToolResult, McpError> {
        let language = parse_language(&params.language)?;
        match self.manager.start(language).await {
            Ok(backend) => {
                self.workspace.sync_to(&backend).await;
                let snapshot = backend.snapshot().await;
                json_result(json!({
                    "success": true,
                    "language": language.as_str(),
                    "status": snapshot.status,
                    "toolsRegistered": snapshot.tools_registered,
                    "serverName": snapshot.server_name,
                    "version": snapshot.server_version,
                }))
            }
            Err(err) => Err(McpError::new(ErrorCode::INTERNAL_ERROR, err.to_string(), None)),
        }
    }

    #[tool(description = "Restart a backend against the current configuration, reporting old and new versions.")]
    async fn update_backend(&self, Parameters(params): Parameters<LanguageParams>) -> Result<CallToolResult, McpError> {
        let language = parse_language(&params.language)?;
        let old_version = match self.manager.existing(language).await {
            Some(backend) => backend.snapshot().await.server_version,
            None => None,
        };

        match self.manager.restart(language).await {
            Ok(backend) => {
                self.workspace.sync_to(&backend).await;
                let new_version = backend.snapshot().await.server_version;
                json_result(json!({
                    "oldVersion": old_version,
                    "newVersion": new_version,
                    "updated": true,
                }))
            }
            Err(err) => Err(McpError::new(ErrorCode::INTERNAL_ERROR, err.to_string(), None)),
        }
    }

    #[tool(description = "Set the single active workspace, fanning the switch out to every started backend.")]
    pub async fn switch_workspace(&self, Parameters(params): Parameters<SwitchWorkspaceParams>) -> Result<CallToolResult, McpError> {
        let path = std::path::PathBuf::from(&params.path);
        match self.workspace.switch(&self.manager, &path).await {
            Ok(value) => json_result(value),
            Err(envelope) => Err(envelope_to_mcp(envelope)),
        }
    }

    #[tool(description = "Switch which LSP implementation backs the Python worker. Requires restarting the Python backend.")]
    async fn switch_python_backend(&self, Parameters(params): Parameters<SwitchPythonBackendParams>) -> Result<CallToolResult, McpError> {
        let provider = PythonProvider::parse(&params.provider)
            .ok_or_else(|| McpError::new(ErrorCode::INVALID_PARAMS, format!("unknown python provider: {}", params.provider), None))?;
        self.manager.set_python_provider(provider).await;
        json_result(json!({
            "acknowledged": true,
            "provider": provider.as_str(),
            "note": "restart the python backend (start_backend or update_backend) for this to take effect",
        }))
    }

    #[tool(description = "Resolve the type signature and documentation for the symbol at a position.")]
    pub async fn hover(&self, Parameters(params): Parameters<HoverParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("hover", &params).await
    }

    #[tool(description = "Jump to the definition site of the symbol at a position.")]
    async fn definition(&self, Parameters(params): Parameters<HoverParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("definition", &params).await
    }

    #[tool(description = "Find every reference to the symbol at a position.")]
    async fn references(&self, Parameters(params): Parameters<ReferencesParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("references", &params).await
    }

    #[tool(description = "List completion candidates at a position.")]
    async fn completions(&self, Parameters(params): Parameters<CompletionsParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("completions", &params).await
    }

    #[tool(description = "Show the active call signature and parameter at a position.")]
    async fn signature_help(&self, Parameters(params): Parameters<HoverParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("signature_help", &params).await
    }

    #[tool(description = "List symbols defined in a file, optionally filtered by a name substring.")]
    async fn symbols(&self, Parameters(params): Parameters<SymbolsParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("symbols", &params).await
    }

    #[tool(
        description = "Preview renaming the symbol at a position to newName. Returns a list of edits; nothing is written to disk."
    )]
    pub async fn rename(&self, Parameters(params): Parameters<RenameParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("rename", &params).await
    }

    #[tool(description = "Return diagnostics currently known for a file.")]
    async fn diagnostics(&self, Parameters(params): Parameters<DiagnosticsParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("diagnostics", &params).await
    }

    #[tool(description = "Push new full-text content for a file to the owning language server without writing to disk.")]
    async fn update_document(&self, Parameters(params): Parameters<UpdateDocumentParams>) -> Result<CallToolResult, McpError> {
        self.forward_unified("update_document", &params).await
    }

    #[tool(
        description = "Search workspace text content with ripgrep. Omit path to fan out across every already-started backend."
    )]
    pub async fn search(&self, Parameters(params): Parameters<SearchParams>) -> Result<CallToolResult, McpError> {
        self.forward_search(&params).await
    }

    #[tool(description = "Move a Python symbol to a new module.")]
    async fn python_move(&self, Parameters(params): Parameters<PythonMoveParams>) -> Result<CallToolResult, McpError> {
        self.forward_specific(Language::Python, "move", &params).await
    }

    #[tool(description = "Change a Python function's parameter list.")]
    async fn python_change_signature(&self, Parameters(params): Parameters<PythonChangeSignatureParams>) -> Result<CallToolResult, McpError> {
        self.forward_specific(Language::Python, "change_signature", &params).await
    }

    #[tool(description = "List TypeScript refactors available at a position.")]
    async fn typescript_available_refactors(
        &self,
        Parameters(params): Parameters<TypeScriptAvailableRefactorsParams>,
    ) -> Result<CallToolResult, McpError> {
        self.forward_specific(Language::TypeScript, "available_refactors", &params).await
    }

    #[tool(description = "Preview applying a named TypeScript refactor action at a position.")]
    async fn typescript_apply_refactor(&self, Parameters(params): Parameters<TypeScriptApplyRefactorParams>) -> Result<CallToolResult, McpError> {
        self.forward_specific(Language::TypeScript, "apply_refactor", &params).await
    }
}

#[tool_handler]
impl ServerHandler for Gateway {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "lspbridge-gateway".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(
                "Multi-language code-intelligence gateway. Routes hover/definition/references/\
                 completions/signature_help/symbols/rename/diagnostics/update_document/search by \
                 file extension to a lazily spawned per-language worker (python, typescript, vue). \
                 Language-specific operations are exposed under a `<lang>_` prefix."
                    .into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lspbridge_core::config::GatewayConfig;

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(BackendManager::new(GatewayConfig::default())), Arc::new(WorkspaceCoordinator::new()))
    }

    #[tokio::test]
    async fn test_status_reports_default_config() {
        let gateway = gateway();
        let result = gateway.status().await.unwrap();
        assert!(!result.content.is_empty());
    }

    #[tokio::test]
    async fn test_switch_python_backend_rejects_unknown_provider() {
        let gateway = gateway();
        let result = gateway
            .switch_python_backend(Parameters(SwitchPythonBackendParams { provider: "not-a-provider".into() }))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_backend_rejects_unknown_language() {
        let gateway = gateway();
        let result = gateway.start_backend(Parameters(LanguageParams { language: "cobol".into() })).await;
        assert!(result.is_err());
    }
}
