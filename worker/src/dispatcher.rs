//! Translates worker tool calls into LSP requests and their replies back
//! into the compact JSON shapes spec §4.5 prescribes.
//!
//! Kept separate from `server.rs` so the `#[tool]` methods stay thin:
//! resolve workspace, get a connection, call a `dispatcher::*` function.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_lsp::LanguageServer;
use lsp_types::{
    CompletionContext, CompletionParams, CompletionResponse, CompletionTriggerKind,
    DocumentSymbolParams, DocumentSymbolResponse, GotoDefinitionParams, GotoDefinitionResponse,
    HoverContents, HoverParams as LspHoverParams, Location, MarkedString, PartialResultParams,
    ReferenceContext, ReferenceParams, RenameParams as LspRenameParams, SignatureHelp,
    SignatureHelpParams as LspSignatureHelpParams, SymbolInformation, TextDocumentIdentifier,
    TextDocumentPositionParams, WorkDoneProgressParams, WorkspaceEdit,
};
use serde_json::{json, Value};

use lspbridge_core::error::LspError;
use lspbridge_core::paths::{from_lsp_position, is_within, to_lsp_position};

use crate::pool::Connection;

/// Maximum wall-clock time any single LSP request is allowed (spec §5:
/// "60s for LSP requests").
const LSP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// How long the diagnostics path polls the push cache before giving up
/// (spec §4.5: "polls the cache every 200ms up to 2s").
const DIAGNOSTICS_POLL_INTERVAL: Duration = Duration::from_millis(200);
const DIAGNOSTICS_POLL_BUDGET: Duration = Duration::from_secs(2);

/// Resolves `file` (absolute or workspace-relative) against `workspace_root`
/// and rejects anything that escapes it.
///
/// ## Errors
/// Returns [`LspError::OutsideWorkspace`] with a `switch_workspace` hint if
/// the resolved path isn't under `workspace_root`.
pub fn resolve_in_workspace(file: &str, workspace_root: &Path) -> Result<PathBuf, LspError> {
    let candidate = Path::new(file);
    let resolved = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace_root.join(candidate)
    };

    if !is_within(&resolved, workspace_root) {
        return Err(LspError::OutsideWorkspace(format!(
            "{} is outside the active workspace {}; call switch_workspace first",
            resolved.display(),
            workspace_root.display()
        )));
    }
    Ok(resolved)
}

async fn timed<T>(
    fut: impl std::future::Future<Output = Result<T, async_lsp::Error>>,
) -> Result<T, LspError> {
    tokio::time::timeout(LSP_REQUEST_TIMEOUT, fut)
        .await
        .map_err(|_| LspError::Timeout(LSP_REQUEST_TIMEOUT))?
        .map_err(|e| LspError::RequestFailed(format!("{e:?}")))
}

/// `textDocument/hover`, flattening `contents` to a single markdown string.
pub async fn hover(conn: &Connection, path: &Path, line: u32, column: u32) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.hover(LspHoverParams {
        text_document_position_params: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
    }))
    .await?;

    let Some(hover) = result else {
        return Ok(json!({ "contents": "" }));
    };
    Ok(json!({ "contents": flatten_hover_contents(hover.contents) }))
}

fn flatten_hover_contents(contents: HoverContents) -> String {
    match contents {
        HoverContents::Scalar(marked) => marked_string_to_text(marked),
        HoverContents::Array(items) => items
            .into_iter()
            .map(marked_string_to_text)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    }
}

fn marked_string_to_text(marked: MarkedString) -> String {
    match marked {
        MarkedString::String(s) => s,
        MarkedString::LanguageString(ls) => format!("```{}\n{}\n```", ls.language, ls.value),
    }
}

/// `textDocument/definition`, flattening `Location`/`LocationLink` forms.
pub async fn definition(conn: &Connection, path: &Path, line: u32, column: u32) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.definition(GotoDefinitionParams {
        text_document_position_params: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }))
    .await?;

    Ok(json!({ "locations": goto_response_to_locations(result) }))
}

fn goto_response_to_locations(response: Option<GotoDefinitionResponse>) -> Vec<Value> {
    match response {
        None => vec![],
        Some(GotoDefinitionResponse::Scalar(loc)) => vec![location_to_json(&loc)],
        Some(GotoDefinitionResponse::Array(locs)) => locs.iter().map(location_to_json).collect(),
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| {
                location_to_json(&Location {
                    uri: link.target_uri,
                    range: link.target_selection_range,
                })
            })
            .collect(),
    }
}

fn location_to_json(location: &Location) -> Value {
    let (line, column) = from_lsp_position(location.range.start);
    json!({
        "file": location.uri.to_file_path().map(|p| p.display().to_string()).unwrap_or_else(|_| location.uri.to_string()),
        "line": line,
        "column": column,
    })
}

/// `textDocument/references` with `includeDeclaration` forwarded.
pub async fn references(
    conn: &Connection,
    path: &Path,
    line: u32,
    column: u32,
    include_declaration: bool,
) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.references(ReferenceParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: ReferenceContext { include_declaration },
    }))
    .await?;

    let locations = result.unwrap_or_default();
    Ok(json!({ "locations": locations.iter().map(location_to_json).collect::<Vec<_>>() }))
}

/// `textDocument/completion`, sliced to `limit` with kind names attached.
pub async fn completions(
    conn: &Connection,
    path: &Path,
    line: u32,
    column: u32,
    limit: usize,
) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.completion(CompletionParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: Some(CompletionContext {
            trigger_kind: CompletionTriggerKind::INVOKED,
            trigger_character: None,
        }),
    }))
    .await?;

    let (items, is_incomplete) = match result {
        None => (vec![], false),
        Some(CompletionResponse::Array(items)) => (items, false),
        Some(CompletionResponse::List(list)) => (list.items, list.is_incomplete),
    };

    let items: Vec<Value> = items
        .into_iter()
        .take(limit)
        .map(|item| {
            json!({
                "label": item.label,
                "kind": item.kind.map(completion_kind_name),
                "detail": item.detail,
            })
        })
        .collect();

    Ok(json!({ "items": items, "isIncomplete": is_incomplete }))
}

fn completion_kind_name(kind: lsp_types::CompletionItemKind) -> &'static str {
    use lsp_types::CompletionItemKind as K;
    match kind {
        K::TEXT => "text",
        K::METHOD => "method",
        K::FUNCTION => "function",
        K::CONSTRUCTOR => "constructor",
        K::FIELD => "field",
        K::VARIABLE => "variable",
        K::CLASS => "class",
        K::INTERFACE => "interface",
        K::MODULE => "module",
        K::PROPERTY => "property",
        K::ENUM => "enum",
        K::KEYWORD => "keyword",
        K::SNIPPET => "snippet",
        K::VALUE => "value",
        K::CONSTANT => "constant",
        K::STRUCT => "struct",
        K::EVENT => "event",
        K::OPERATOR => "operator",
        K::TYPE_PARAMETER => "type_parameter",
        _ => "other",
    }
}

/// `textDocument/signatureHelp`, preserving active signature/parameter.
pub async fn signature_help(conn: &Connection, path: &Path, line: u32, column: u32) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(
        conn.socket()
            .lock()
            .await
            .signature_help(LspSignatureHelpParams {
                text_document_position_params: TextDocumentPositionParams {
                    text_document: TextDocumentIdentifier { uri },
                    position,
                },
                work_done_progress_params: WorkDoneProgressParams::default(),
                context: None,
            }),
    )
    .await?;

    Ok(signature_help_to_json(result))
}

fn signature_help_to_json(help: Option<SignatureHelp>) -> Value {
    let Some(help) = help else {
        return json!({ "signatures": [] });
    };
    let signatures: Vec<Value> = help
        .signatures
        .iter()
        .map(|sig| {
            json!({
                "label": sig.label,
                "parameters": sig.parameters.as_ref().map(|params| {
                    params.iter().map(|p| match &p.label {
                        lsp_types::ParameterLabel::Simple(s) => s.clone(),
                        lsp_types::ParameterLabel::LabelOffsets(_) => sig.label.clone(),
                    }).collect::<Vec<_>>()
                }).unwrap_or_default(),
            })
        })
        .collect();

    json!({
        "signatures": signatures,
        "activeSignature": help.active_signature,
        "activeParameter": help.active_parameter,
    })
}

/// `textDocument/documentSymbol`, with an optional case-insensitive
/// name-substring filter.
pub async fn symbols(conn: &Connection, path: &Path, query: Option<&str>) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;

    let result = timed(conn.socket().lock().await.document_symbol(DocumentSymbolParams {
        text_document: TextDocumentIdentifier { uri },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }))
    .await?;

    let symbols = flatten_document_symbols(result);
    let needle = query.map(str::to_ascii_lowercase);
    let filtered: Vec<Value> = symbols
        .into_iter()
        .filter(|s| match &needle {
            None => true,
            Some(needle) => s["name"].as_str().unwrap_or_default().to_ascii_lowercase().contains(needle.as_str()),
        })
        .collect();

    Ok(json!({ "symbols": filtered }))
}

fn flatten_document_symbols(response: Option<DocumentSymbolResponse>) -> Vec<Value> {
    match response {
        None => vec![],
        Some(DocumentSymbolResponse::Flat(symbols)) => symbols.iter().map(symbol_information_to_json).collect(),
        Some(DocumentSymbolResponse::Nested(symbols)) => {
            let mut out = Vec::new();
            flatten_nested(&symbols, &mut out);
            out
        }
    }
}

fn flatten_nested(symbols: &[lsp_types::DocumentSymbol], out: &mut Vec<Value>) {
    for symbol in symbols {
        let (line, column) = from_lsp_position(symbol.range.start);
        out.push(json!({
            "name": symbol.name,
            "kind": symbol_kind_name(symbol.kind),
            "line": line,
            "column": column,
        }));
        if let Some(children) = &symbol.children {
            flatten_nested(children, out);
        }
    }
}

fn symbol_information_to_json(symbol: &SymbolInformation) -> Value {
    let (line, column) = from_lsp_position(symbol.location.range.start);
    json!({
        "name": symbol.name,
        "kind": symbol_kind_name(symbol.kind),
        "line": line,
        "column": column,
    })
}

fn symbol_kind_name(kind: lsp_types::SymbolKind) -> &'static str {
    use lsp_types::SymbolKind as K;
    match kind {
        K::FILE => "file",
        K::MODULE => "module",
        K::NAMESPACE => "namespace",
        K::CLASS => "class",
        K::METHOD => "method",
        K::PROPERTY => "property",
        K::FIELD => "field",
        K::CONSTRUCTOR => "constructor",
        K::ENUM => "enum",
        K::INTERFACE => "interface",
        K::FUNCTION => "function",
        K::VARIABLE => "variable",
        K::CONSTANT => "constant",
        K::STRUCT => "struct",
        K::ENUM_MEMBER => "enum_member",
        _ => "other",
    }
}

/// `textDocument/prepareRename` + workspace-edit aggregation, returned as a
/// *preview* list — nothing is written to disk (spec §4.5, §9 open
/// question: rename is preview-only by design even though the LSP result
/// carries a full workspace edit).
pub async fn rename(
    conn: &Connection,
    path: &Path,
    line: u32,
    column: u32,
    new_name: &str,
) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.rename(LspRenameParams {
        text_document_position: TextDocumentPositionParams {
            text_document: TextDocumentIdentifier { uri },
            position,
        },
        new_name: new_name.to_string(),
        work_done_progress_params: WorkDoneProgressParams::default(),
    }))
    .await?;

    Ok(json!({ "edits": workspace_edit_to_preview(result) }))
}

fn workspace_edit_to_preview(edit: Option<WorkspaceEdit>) -> Vec<Value> {
    let Some(edit) = edit else { return vec![] };
    let Some(changes) = edit.changes else { return vec![] };

    let mut preview = Vec::new();
    for (uri, text_edits) in changes {
        let file = uri.to_file_path().map(|p| p.display().to_string()).unwrap_or_else(|_| uri.to_string());
        for text_edit in text_edits {
            let (line, column) = from_lsp_position(text_edit.range.start);
            let length = (text_edit.range.end.character - text_edit.range.start.character) as i64;
            preview.push(json!({
                "file": file,
                "line": line,
                "column": column,
                "length": length.max(0),
                "newText": text_edit.new_text,
            }));
        }
    }
    preview
}

/// Polls the diagnostic push cache for up to 2s, returning whatever has
/// accumulated (spec §4.5: primary path; no fallback project-checker is
/// implemented here since no worker in this deployment has one).
pub async fn diagnostics(conn: &Connection, path: &Path) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;

    let deadline = tokio::time::Instant::now() + DIAGNOSTICS_POLL_BUDGET;
    loop {
        if let Some(cached) = conn.diagnostics.get(&uri).await {
            return Ok(json!({
                "diagnostics": cached.diagnostics.iter().map(diagnostic_to_json).collect::<Vec<_>>(),
            }));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(json!({ "diagnostics": [] }));
        }
        tokio::time::sleep(DIAGNOSTICS_POLL_INTERVAL).await;
    }
}

fn diagnostic_to_json(diagnostic: &lsp_types::Diagnostic) -> Value {
    let (line, column) = from_lsp_position(diagnostic.range.start);
    json!({
        "message": diagnostic.message,
        "severity": diagnostic.severity.map(severity_name),
        "line": line,
        "column": column,
        "source": diagnostic.source,
    })
}

fn severity_name(severity: lsp_types::DiagnosticSeverity) -> &'static str {
    match severity {
        lsp_types::DiagnosticSeverity::ERROR => "error",
        lsp_types::DiagnosticSeverity::WARNING => "warning",
        lsp_types::DiagnosticSeverity::INFORMATION => "information",
        lsp_types::DiagnosticSeverity::HINT => "hint",
        _ => "error",
    }
}

/// `textDocument/didChange` (full-text sync). Never writes to disk.
pub async fn update_document(conn: &Connection, path: &Path, content: String) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, language_id_for(path)).await?;
    conn.update_document(&uri, content).await?;
    Ok(json!({ "success": true }))
}

fn language_id_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or_default() {
        "py" | "pyi" | "pyw" => "python",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "vue" => "vue",
        _ => "plaintext",
    }
}

/// Runs ripgrep as an opaque subprocess and parses its JSON output (spec
/// §4.5). Out of scope per spec §1: ripgrep itself is an external
/// collaborator, used here only through its documented `--json` format.
pub async fn search(
    workspace_root: &Path,
    pattern: &str,
    path: Option<&str>,
    glob: Option<&str>,
) -> Result<Value, LspError> {
    let mut cmd = tokio::process::Command::new("rg");
    cmd.arg("--json").arg(pattern);
    if let Some(glob) = glob {
        cmd.arg("--glob").arg(glob);
    }
    cmd.current_dir(workspace_root);
    match path {
        Some(path) => {
            cmd.arg(path);
        }
        None => {
            cmd.arg(".");
        }
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| LspError::RequestFailed(format!("failed to spawn ripgrep: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut matches = Vec::new();
    for line in stdout.lines() {
        let Ok(event) = serde_json::from_str::<Value>(line) else { continue };
        if event["type"] != "match" {
            continue;
        }
        let data = &event["data"];
        matches.push(json!({
            "file": data["path"]["text"],
            "line": data["line_number"],
            "column": data["submatches"][0]["start"].as_u64().map(|c| c + 1),
            "text": data["lines"]["text"],
        }));
    }

    Ok(json!({ "matches": matches }))
}

/// Python-specific `move` refactor, proxied through `workspace/executeCommand`.
/// Pyright and python-lsp-server both expose refactors as server-defined
/// commands discovered at `initialize` time; the command id is passed
/// through rather than hardcoded so either provider can serve it.
pub async fn python_move(
    conn: &Connection,
    path: &Path,
    line: u32,
    column: u32,
    destination: &str,
    command: &str,
) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, "python").await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.execute_command(lsp_types::ExecuteCommandParams {
        command: command.to_string(),
        arguments: vec![json!({
            "uri": uri,
            "line": position.line,
            "character": position.character,
            "destination": destination,
        })],
        work_done_progress_params: WorkDoneProgressParams::default(),
    }))
    .await?;

    Ok(json!({ "result": result }))
}

/// Python-specific `change_signature` refactor, same execute-command path
/// as [`python_move`].
pub async fn python_change_signature(
    conn: &Connection,
    path: &Path,
    line: u32,
    column: u32,
    new_parameters: &str,
    command: &str,
) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, "python").await?;
    let position = to_lsp_position(line, column)?;

    let result = timed(conn.socket().lock().await.execute_command(lsp_types::ExecuteCommandParams {
        command: command.to_string(),
        arguments: vec![json!({
            "uri": uri,
            "line": position.line,
            "character": position.character,
            "newParameters": new_parameters,
        })],
        work_done_progress_params: WorkDoneProgressParams::default(),
    }))
    .await?;

    Ok(json!({ "result": result }))
}

/// TypeScript-specific `available_refactors`, `textDocument/codeAction`
/// filtered to the refactor kind.
pub async fn typescript_available_refactors(conn: &Connection, path: &Path, line: u32, column: u32) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, "typescript").await?;
    let position = to_lsp_position(line, column)?;
    let range = lsp_types::Range { start: position, end: position };

    let result = timed(conn.socket().lock().await.code_action(lsp_types::CodeActionParams {
        text_document: TextDocumentIdentifier { uri },
        range,
        context: lsp_types::CodeActionContext {
            diagnostics: vec![],
            only: Some(vec![lsp_types::CodeActionKind::REFACTOR]),
            trigger_kind: None,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }))
    .await?;

    let refactors: Vec<Value> = result
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| match item {
            lsp_types::CodeActionOrCommand::CodeAction(action) => Some(json!({
                "title": action.title,
                "kind": action.kind.map(|k| k.as_str().to_string()),
            })),
            lsp_types::CodeActionOrCommand::Command(_) => None,
        })
        .collect();

    Ok(json!({ "refactors": refactors }))
}

/// TypeScript-specific `apply_refactor`, re-running the code action by
/// title/kind and returning its workspace-edit preview (never applied to
/// disk, consistent with `rename`'s preview-only contract).
pub async fn typescript_apply_refactor(
    conn: &Connection,
    path: &Path,
    line: u32,
    column: u32,
    refactor_name: &str,
    action_name: &str,
) -> Result<Value, LspError> {
    let uri = conn.ensure_open(path, "typescript").await?;
    let position = to_lsp_position(line, column)?;
    let range = lsp_types::Range { start: position, end: position };

    let result = timed(conn.socket().lock().await.code_action(lsp_types::CodeActionParams {
        text_document: TextDocumentIdentifier { uri },
        range,
        context: lsp_types::CodeActionContext {
            diagnostics: vec![],
            only: Some(vec![lsp_types::CodeActionKind::REFACTOR]),
            trigger_kind: None,
        },
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    }))
    .await?;

    let wanted = format!("{refactor_name}: {action_name}");
    let matched = result.unwrap_or_default().into_iter().find_map(|item| match item {
        lsp_types::CodeActionOrCommand::CodeAction(action) if action.title.contains(action_name) || action.title == wanted => action.edit,
        _ => None,
    });

    Ok(json!({ "edits": workspace_edit_to_preview(matched) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_in_workspace_accepts_relative_path() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.py"), "").unwrap();
        let resolved = resolve_in_workspace("a.py", tmp.path()).unwrap();
        assert_eq!(resolved, tmp.path().join("a.py"));
    }

    #[test]
    fn test_resolve_in_workspace_rejects_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("evil.py"), "").unwrap();
        let err = resolve_in_workspace(outside.path().join("evil.py").to_str().unwrap(), tmp.path());
        assert!(matches!(err, Err(LspError::OutsideWorkspace(_))));
    }

    #[test]
    fn test_language_id_for_extensions() {
        assert_eq!(language_id_for(Path::new("a.py")), "python");
        assert_eq!(language_id_for(Path::new("a.vue")), "vue");
        assert_eq!(language_id_for(Path::new("a.tsx")), "typescriptreact");
    }

    #[test]
    fn test_flatten_hover_contents_scalar() {
        let text = flatten_hover_contents(HoverContents::Scalar(MarkedString::String("hi".into())));
        assert_eq!(text, "hi");
    }
}
