//! Static per-language capability table (spec §4.6, §4.7, §8 S3).
//!
//! Each worker consults this table to decide whether to expose a unified
//! operation at all. The gateway's router does *not* use it as the
//! capability check — that check asks the already-spawned backend's own
//! discovered tool list (`ChildBackend::supports_tool`), per spec.md's
//! definition of a capability check as a live query. The router only
//! reaches for `available_tools` here to compose the hint text on a miss,
//! so the advice it gives ("available tools: ...") doesn't require an extra
//! round trip of its own.
//!
//! Volar (the Vue worker) does not implement `rename`: the Vue language
//! server in hybrid mode proxies TypeScript analysis through the tsserver
//! bridge, which does not expose workspace-edit construction for renames.

use crate::config::Language;

/// Every unified tool name, in the order spec §4.5 lists them.
pub const UNIFIED_TOOLS: &[&str] = &[
    "hover",
    "definition",
    "references",
    "completions",
    "signature_help",
    "symbols",
    "diagnostics",
    "rename",
    "update_document",
    "search",
];

/// Language-specific tool names, registered under the worker's `<lang>_` prefix.
pub fn language_specific_tools(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &["move", "change_signature"],
        Language::TypeScript => &["available_refactors", "apply_refactor"],
        Language::Vue => &[],
    }
}

/// Whether `language`'s worker implements unified tool `tool`.
pub fn supports_unified(language: Language, tool: &str) -> bool {
    if !UNIFIED_TOOLS.contains(&tool) {
        return false;
    }
    match (language, tool) {
        (Language::Vue, "rename") => false,
        _ => true,
    }
}

/// The full list of tools a given worker advertises: unified tools it
/// supports, plus its `<lang>_<name>` specific tools (unprefixed here; the
/// router adds the prefix when listing them to a client).
pub fn available_tools(language: Language) -> Vec<&'static str> {
    let mut tools: Vec<&'static str> = UNIFIED_TOOLS.iter().copied().filter(|t| supports_unified(language, t)).collect();
    tools.extend(language_specific_tools(language));
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vue_does_not_support_rename() {
        assert!(!supports_unified(Language::Vue, "rename"));
        assert!(supports_unified(Language::TypeScript, "rename"));
        assert!(supports_unified(Language::Python, "rename"));
    }

    #[test]
    fn test_unknown_tool_unsupported() {
        assert!(!supports_unified(Language::Python, "teleport"));
    }

    #[test]
    fn test_available_tools_lists_language_specific() {
        let python_tools = available_tools(Language::Python);
        assert!(python_tools.contains(&"move"));
        assert!(python_tools.contains(&"change_signature"));
        assert!(python_tools.contains(&"rename"));

        let vue_tools = available_tools(Language::Vue);
        assert!(!vue_tools.contains(&"rename"));
    }
}
