//! MCP tool parameter structs for the aggregator's own tools (spec §6) and
//! for the unified/language-specific tools it forwards (spec §4.5, §4.7).
//!
//! The forwarding tools mirror the worker's parameter shapes exactly so the
//! router can re-serialize them verbatim into the child MCP call.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_completion_limit() -> usize {
    20
}

fn default_include_declaration() -> bool {
    true
}

/// Parameters for `start_backend`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LanguageParams {
    /// Which backend to target.
    pub language: String,
}

/// Parameters for `switch_workspace`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchWorkspaceParams {
    /// Absolute or relative path to the new active workspace.
    pub path: String,
}

/// Parameters for `switch_python_backend`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SwitchPythonBackendParams {
    /// `python-lsp-mcp` or `pyright-mcp`.
    pub provider: String,
}

/// Parameters shared by every position-anchored unified operation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HoverParams {
    /// Path to the source file, absolute or relative to the active workspace.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

/// Parameters for `references`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesParams {
    /// Path to the source file.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// Whether to include the declaration site itself.
    #[serde(default = "default_include_declaration")]
    pub include_declaration: bool,
}

/// Parameters for `completions`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsParams {
    /// Path to the source file.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// Maximum number of completion items to return.
    #[serde(default = "default_completion_limit")]
    pub limit: usize,
}

/// Parameters for `symbols`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsParams {
    /// Path to the source file.
    pub file: String,
    /// Optional case-insensitive substring filter on symbol name.
    #[serde(default)]
    pub query: Option<String>,
}

/// Parameters for `rename`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameParams {
    /// Path to the source file.
    pub file: String,
    /// 1-based line number of the symbol to rename.
    pub line: u32,
    /// 1-based column number of the symbol to rename.
    pub column: u32,
    /// The replacement identifier.
    pub new_name: String,
}

/// Parameters for `diagnostics`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsParams {
    /// Path to the source file.
    pub file: String,
}

/// Parameters for `update_document`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentParams {
    /// Path to the source file.
    pub file: String,
    /// New full-text content. Never written to disk.
    pub content: String,
}

/// Parameters for `search`. `path` is optional: omitting it fans the search
/// out across every already-started backend (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Regex pattern passed to ripgrep.
    pub pattern: String,
    /// Optional path to scope the search to.
    #[serde(default)]
    pub path: Option<String>,
    /// Optional glob to restrict matched files.
    #[serde(default)]
    pub glob: Option<String>,
}

/// Parameters for the Python-specific `move` refactor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PythonMoveParams {
    /// Path to the source file containing the symbol.
    pub file: String,
    /// 1-based line of the symbol to move.
    pub line: u32,
    /// 1-based column of the symbol to move.
    pub column: u32,
    /// Destination module path.
    pub destination: String,
}

/// Parameters for the Python-specific `change_signature` refactor.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PythonChangeSignatureParams {
    /// Path to the source file containing the function.
    pub file: String,
    /// 1-based line of the function definition.
    pub line: u32,
    /// 1-based column of the function definition.
    pub column: u32,
    /// New parameter list, verbatim, e.g. `"a: int, b: str = 'x'"`.
    pub new_parameters: String,
}

/// Parameters for the TypeScript-specific `available_refactors` query.
pub type TypeScriptAvailableRefactorsParams = HoverParams;

/// Parameters for the TypeScript-specific `apply_refactor` action.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeScriptApplyRefactorParams {
    /// Path to the source file.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
    /// The refactor name, as reported by `available_refactors`.
    pub refactor_name: String,
    /// The action name within the refactor.
    pub action_name: String,
}

/// Converts any serializable parameter struct into the JSON object the
/// router forwards to a child backend.
pub fn to_arguments<T: Serialize>(params: &T) -> serde_json::Map<String, serde_json::Value> {
    match serde_json::to_value(params) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}
