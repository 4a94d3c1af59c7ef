//! Environment-variable configuration surface (spec §6).
//!
//! Both binaries read the same `LSP_MCP_*` variables through this module so
//! `gateway` and `worker` agree on defaults without duplicating parsing.

use std::time::Duration;

/// The three languages the gateway knows how to route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python, backed by Pyright (or `python-lsp-server`, see [`PythonProvider`]).
    Python,
    /// TypeScript/JavaScript, backed by `typescript-language-server` (tsserver).
    TypeScript,
    /// Vue single-file components, backed by Volar in hybrid mode.
    Vue,
}

impl Language {
    /// All routable languages, in a stable order used for `list_backends`
    /// and eager-start fan-out.
    pub const ALL: [Language; 3] = [Language::Python, Language::TypeScript, Language::Vue];

    /// The string used on the CLI and in tool names (`<lang>_<tool>`).
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::Vue => "vue",
        }
    }

    /// Parses the CLI/env representation of a language.
    pub fn parse(s: &str) -> Option<Language> {
        match s {
            "python" => Some(Language::Python),
            "typescript" => Some(Language::TypeScript),
            "vue" => Some(Language::Vue),
            _ => None,
        }
    }

    /// Infers the language from a file extension (spec §4.7 unified-tool
    /// routing table). Returns `None` for unrecognized extensions.
    pub fn from_extension(ext: &str) -> Option<Language> {
        match ext.to_ascii_lowercase().as_str() {
            "py" | "pyi" | "pyw" => Some(Language::Python),
            "ts" | "tsx" | "js" | "jsx" | "mts" | "mjs" | "cts" | "cjs" => Some(Language::TypeScript),
            "vue" => Some(Language::Vue),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which LSP implementation backs the Python worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PythonProvider {
    /// `python-lsp-server` (pylsp), the default.
    PythonLspMcp,
    /// Pyright.
    PyrightMcp,
}

impl PythonProvider {
    /// The string used in `switch_python_backend`'s `provider` argument.
    pub fn as_str(self) -> &'static str {
        match self {
            PythonProvider::PythonLspMcp => "python-lsp-mcp",
            PythonProvider::PyrightMcp => "pyright-mcp",
        }
    }

    /// Parses the CLI/env representation.
    pub fn parse(s: &str) -> Option<PythonProvider> {
        match s {
            "python-lsp-mcp" => Some(PythonProvider::PythonLspMcp),
            "pyright-mcp" => Some(PythonProvider::PyrightMcp),
            _ => None,
        }
    }
}

/// Aggregator-wide configuration assembled from environment variables.
///
/// Every field has the default named in spec §6; only non-default values
/// need to be set in the environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// `LSP_MCP_PYTHON_ENABLED`, default `true`.
    pub python_enabled: bool,
    /// `LSP_MCP_PYTHON_PROVIDER`, default [`PythonProvider::PythonLspMcp`].
    pub python_provider: PythonProvider,
    /// `LSP_MCP_TYPESCRIPT_ENABLED`, default `true`.
    pub typescript_enabled: bool,
    /// `LSP_MCP_VUE_ENABLED`, default `true`.
    pub vue_enabled: bool,
    /// `LSP_MCP_AUTO_UPDATE`, default `false`.
    pub auto_update: bool,
    /// `LSP_MCP_EAGER_START`, default `false`.
    pub eager_start: bool,
    /// `LSP_MCP_IDLE_TIMEOUT` in seconds; `None` disables the idle reaper.
    pub idle_timeout: Option<Duration>,
}

impl GatewayConfig {
    /// Reads configuration from the process environment, applying spec §6
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            python_enabled: bool_env("LSP_MCP_PYTHON_ENABLED", true),
            python_provider: std::env::var("LSP_MCP_PYTHON_PROVIDER")
                .ok()
                .and_then(|v| PythonProvider::parse(&v))
                .unwrap_or(PythonProvider::PythonLspMcp),
            typescript_enabled: bool_env("LSP_MCP_TYPESCRIPT_ENABLED", true),
            vue_enabled: bool_env("LSP_MCP_VUE_ENABLED", true),
            auto_update: bool_env("LSP_MCP_AUTO_UPDATE", false),
            eager_start: bool_env("LSP_MCP_EAGER_START", false),
            idle_timeout: idle_timeout_env("LSP_MCP_IDLE_TIMEOUT", Duration::from_secs(15 * 60)),
        }
    }

    /// Whether a given language's backend is enabled.
    pub fn is_enabled(&self, language: Language) -> bool {
        match language {
            Language::Python => self.python_enabled,
            Language::TypeScript => self.typescript_enabled,
            Language::Vue => self.vue_enabled,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            python_enabled: true,
            python_provider: PythonProvider::PythonLspMcp,
            typescript_enabled: true,
            vue_enabled: true,
            auto_update: false,
            eager_start: false,
            idle_timeout: Some(Duration::from_secs(15 * 60)),
        }
    }
}

fn bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn idle_timeout_env(name: &str, default: Duration) -> Option<Duration> {
    match std::env::var(name) {
        Ok(v) => match v.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => Some(default),
        },
        Err(_) => Some(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_from_extension() {
        assert_eq!(Language::from_extension("py"), Some(Language::Python));
        assert_eq!(Language::from_extension("pyi"), Some(Language::Python));
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("mjs"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("vue"), Some(Language::Vue));
        assert_eq!(Language::from_extension("rs"), None);
    }

    #[test]
    fn test_default_config_matches_spec_defaults() {
        let cfg = GatewayConfig::default();
        assert!(cfg.python_enabled);
        assert!(cfg.typescript_enabled);
        assert!(cfg.vue_enabled);
        assert!(!cfg.auto_update);
        assert!(!cfg.eager_start);
        assert_eq!(cfg.python_provider, PythonProvider::PythonLspMcp);
    }

    #[test]
    fn test_idle_timeout_zero_disables() {
        assert_eq!(idle_timeout_env("LSP_MCP_IDLE_TIMEOUT_NONEXISTENT_TEST", Duration::from_secs(1)), Some(Duration::from_secs(1)));
    }
}
