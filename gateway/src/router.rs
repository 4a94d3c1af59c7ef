//! Unified tool router (spec §4.7): infers a language from a file/path
//! argument, checks the resolved backend's own discovered tool list before
//! forwarding, and fans `search` out across every already-started backend
//! when it is called with no path.

use std::path::Path;

use lspbridge_core::capability;
use lspbridge_core::config::Language;
use lspbridge_core::error::{BackendError, ErrorEnvelope, ErrorKind};

use crate::manager::BackendManager;

/// Every unified tool name the router recognizes.
pub const UNIFIED_TOOLS: &[&str] = capability::UNIFIED_TOOLS;

/// Infers the target language from a `file`/`path` argument's extension.
pub fn infer_language(arguments: &serde_json::Map<String, serde_json::Value>) -> Option<Language> {
    let candidate = arguments
        .get("file")
        .or_else(|| arguments.get("path"))
        .and_then(serde_json::Value::as_str)?;

    let ext = Path::new(candidate).extension()?.to_str()?;
    Language::from_extension(ext)
}

/// Bridges the `rename` unified tool's `newName` argument into the downstream
/// backend's `new_name` spelling as well, so either key is understood (spec §4.7).
pub fn bridge_rename_argument(arguments: &mut serde_json::Map<String, serde_json::Value>) {
    if let Some(new_name) = arguments.get("newName").cloned() {
        arguments.entry("new_name".to_string()).or_insert(new_name);
    } else if let Some(new_name) = arguments.get("new_name").cloned() {
        arguments.entry("newName".to_string()).or_insert(new_name);
    }
}

/// Routes a unified tool call, performing the capability check before
/// forwarding. The check asks the actually-spawned backend whether it
/// advertises `tool` in its discovered tool list (spec.md's capability
/// check, GLOSSARY) rather than consulting the static table, which is kept
/// only to compose the `available_tools` hint on a miss. Returns the
/// structured JSON result on success or an [`ErrorEnvelope`] describing why
/// the call could not be routed.
pub async fn route_unified(
    manager: &BackendManager,
    tool: &str,
    mut arguments: serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Value, ErrorEnvelope> {
    if tool == "rename" {
        bridge_rename_argument(&mut arguments);
    }

    let Some(language) = infer_language(&arguments) else {
        return Err(ErrorEnvelope::with_hint(
            ErrorKind::InvalidInput,
            "could not infer a language from the file/path argument",
            "pass a file with a recognized extension (.py, .ts, .tsx, .vue, ...)",
        ));
    };

    let backend = manager.get_or_spawn(language).await.map_err(backend_error_to_envelope)?;

    if !backend.supports_tool(tool).await {
        let available = capability::available_tools(language);
        return Err(ErrorEnvelope::with_hint(
            ErrorKind::NotImplemented,
            format!("{language} worker does not implement {tool}"),
            format!("available tools: {}", available.join(", ")),
        ));
    }

    forward(manager, language, tool, arguments).await
}

/// Routes a `<lang>_<tool>` language-specific call.
pub async fn route_specific(
    manager: &BackendManager,
    language: Language,
    tool: &str,
    arguments: serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Value, ErrorEnvelope> {
    forward(manager, language, tool, arguments).await
}

/// `search` with no `path`: fan out to every already-started backend in
/// parallel and merge `matches`. If none is started, return empty with a
/// hint rather than eager-starting every backend (spec §4.7, §9).
pub async fn route_search_unscoped(
    manager: &BackendManager,
    arguments: serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Value, ErrorEnvelope> {
    let backends = manager.all_existing().await;
    if backends.is_empty() {
        return Ok(serde_json::json!({
            "matches": [],
            "hint": "no backend is started yet; pass a path or call a unified tool first",
        }));
    }

    let calls = backends.into_iter().map(|backend| {
        let args = arguments.clone();
        async move { backend.call_tool("search", Some(args)).await }
    });

    let results = futures::future::join_all(calls).await;
    let mut matches = Vec::new();
    for result in results {
        if let Ok(call_result) = result {
            if let Some(value) = extract_json(&call_result) {
                if let Some(found) = value.get("matches").and_then(serde_json::Value::as_array) {
                    matches.extend(found.iter().cloned());
                }
            }
        }
    }

    Ok(serde_json::json!({ "matches": matches }))
}

async fn forward(
    manager: &BackendManager,
    language: Language,
    tool: &str,
    arguments: serde_json::Map<String, serde_json::Value>,
) -> Result<serde_json::Value, ErrorEnvelope> {
    match manager.call_tool(language, tool, Some(arguments)).await {
        Ok(result) => extract_json(&result).ok_or_else(|| {
            ErrorEnvelope::new(ErrorKind::TransientToolError, "backend returned a non-JSON tool result")
        }),
        Err(err) => Err(backend_error_to_envelope(err)),
    }
}

/// Maps a [`BackendError`] onto the spec §7 outer classification. Timeout
/// and crash are kept distinct from a plain tool error here because the
/// manager treats them differently upstream: a timeout leaves the
/// connection alone, a crash defers recovery to the supervisor, and only a
/// genuine tool-level failure gets the manager's inline masked retry.
fn backend_error_to_envelope(err: BackendError) -> ErrorEnvelope {
    match err {
        BackendError::Disabled(lang) => ErrorEnvelope::new(ErrorKind::BackendDisabled, format!("{lang} backend is disabled")),
        BackendError::Unavailable(msg) => ErrorEnvelope::new(ErrorKind::BackendUnavailable, msg),
        BackendError::Terminal(msg) => ErrorEnvelope::new(ErrorKind::BackendUnavailable, msg),
        BackendError::NotImplemented(msg) => ErrorEnvelope::new(ErrorKind::NotImplemented, msg),
        BackendError::Timeout(msg) => ErrorEnvelope::new(ErrorKind::UpstreamTimeout, msg),
        BackendError::Crashed(msg) => ErrorEnvelope::new(ErrorKind::UpstreamCrash, msg),
        BackendError::ToolCallFailed(msg) => ErrorEnvelope::new(ErrorKind::TransientToolError, msg),
    }
}

fn extract_json(result: &rmcp::model::CallToolResult) -> Option<serde_json::Value> {
    use rmcp::model::RawContent;

    let content = result.content.first()?;
    match &content.raw {
        RawContent::Text(text) => serde_json::from_str(&text.text).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: &str) -> serde_json::Map<String, serde_json::Value> {
        let mut m = serde_json::Map::new();
        m.insert("file".to_string(), serde_json::Value::String(file.to_string()));
        m
    }

    #[test]
    fn test_infer_language_python() {
        assert_eq!(infer_language(&args("/repo/a.py")), Some(Language::Python));
    }

    #[test]
    fn test_infer_language_vue() {
        assert_eq!(infer_language(&args("/repo/App.vue")), Some(Language::Vue));
    }

    #[test]
    fn test_infer_language_unknown_extension() {
        assert_eq!(infer_language(&args("/repo/README.md")), None);
    }

    #[test]
    fn test_bridge_rename_argument_copies_both_ways() {
        let mut m = serde_json::Map::new();
        m.insert("newName".to_string(), serde_json::Value::String("foo".to_string()));
        bridge_rename_argument(&mut m);
        assert_eq!(m.get("new_name").unwrap().as_str(), Some("foo"));
    }

    #[test]
    fn test_backend_error_to_envelope_keeps_timeout_and_crash_distinct() {
        let timeout = backend_error_to_envelope(BackendError::Timeout("slow".into()));
        assert_eq!(timeout.error, ErrorKind::UpstreamTimeout);

        let crashed = backend_error_to_envelope(BackendError::Crashed("gone".into()));
        assert_eq!(crashed.error, ErrorKind::UpstreamCrash);

        let tool_failed = backend_error_to_envelope(BackendError::ToolCallFailed("bad args".into()));
        assert_eq!(tool_failed.error, ErrorKind::TransientToolError);
    }
}
