//! MCP tool parameter structs for the worker's exported operations
//! (spec §4.5, §4.7).
//!
//! Every unified operation takes a `file` path plus operation-specific
//! fields; positions are always 1-based on this surface (see
//! `lspbridge_core::paths` for the conversion to LSP's 0-based positions).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_completion_limit() -> usize {
    20
}

fn default_include_declaration() -> bool {
    true
}

/// Parameters shared by every position-anchored operation.
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

/// Parameters for `definition`.
pub type DefinitionParams = HoverParams;

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

/// Parameters for `signature_help`.
pub type SignatureHelpParams = HoverParams;

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
///
/// Accepts `newName` (camelCase, the MCP-facing spelling) and falls back to
/// `new_name` since the router forwards both keys to downstream workers
/// that expect either spelling (spec §4.7).
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
    #[serde(alias = "new_name")]
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
    /// New full-text content. Never written to disk (spec §4.5).
    pub content: String,
}

/// Parameters for `search`.
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
