//! Error types shared by the gateway and worker binaries.
//!
//! Organized by subsystem, mirroring how the original bridge split errors
//! into LSP/MCP/transport/tool groups, plus `BackendError` for the
//! aggregator's child-process supervision and `ErrorKind` for the outer
//! MCP-facing classification (spec §7).

use thiserror::Error;

/// Errors related to LSP client operations.
#[derive(Debug, Error)]
pub enum LspError {
    /// The language server process failed to start.
    #[error("failed to start language server: {0}")]
    ServerStartFailed(String),

    /// The language server process exited unexpectedly.
    #[error("language server exited unexpectedly: {0}")]
    ServerExited(String),

    /// Failed to initialize the language server.
    #[error("language server initialization failed: {0}")]
    InitializationFailed(String),

    /// The language server returned an error response.
    #[error("language server error: {message} (code: {code})")]
    ServerError {
        /// The error code from the language server.
        code: i32,
        /// The error message from the language server.
        message: String,
    },

    /// A request to the language server timed out.
    #[error("language server request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The language server is not initialized.
    #[error("language server not initialized")]
    NotInitialized,

    /// Failed to send a request to the language server.
    #[error("failed to send request to language server: {0}")]
    RequestFailed(String),

    /// Failed to parse the response from the language server.
    #[error("failed to parse language server response: {0}")]
    ParseError(String),

    /// Invalid position in document.
    #[error("invalid position: line {line}, column {column}")]
    InvalidPosition {
        /// The line number.
        line: u32,
        /// The column number.
        column: u32,
    },

    /// Document not found or not open.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// File is outside the active workspace.
    #[error("path outside active workspace: {0}")]
    OutsideWorkspace(String),
}

/// Errors related to transport layer operations (framed JSON-RPC over stdio).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to serialize a message.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Failed to deserialize a message.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Invalid message framing (bad Content-Length header or malformed line).
    #[error("invalid message framing: {0}")]
    InvalidFraming(String),

    /// IO error during transport operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to tool execution inside a worker.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool was not found on this backend.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Invalid arguments provided to the tool.
    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The tool execution failed.
    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),

    /// The file specified in the tool arguments was not found.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// LSP error during tool execution.
    #[error("LSP error: {0}")]
    Lsp(#[from] LspError),
}

/// Errors related to the aggregator's supervision of child backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend is disabled via configuration.
    #[error("backend disabled: {0}")]
    Disabled(String),

    /// Spawning the child process or connecting its MCP client failed.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend entered a terminal error state after too many crashes.
    #[error("backend in terminal error state: {0}")]
    Terminal(String),

    /// A tool call to the backend errored for a reason other than a timeout
    /// or a crashed connection.
    #[error("child tool call failed: {0}")]
    ToolCallFailed(String),

    /// A tool call exceeded its deadline. The connection itself is still
    /// live; this is not evidence the backend needs restarting (spec §7).
    #[error("child tool call timed out: {0}")]
    Timeout(String),

    /// The child's transport closed, or the process exited, mid-call
    /// (spec §7: recovery belongs to the supervisor's backoff sweep, not an
    /// inline retry).
    #[error("child connection crashed mid-call: {0}")]
    Crashed(String),

    /// The backend does not implement the requested tool.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

/// A unified error type for the entire application.
#[derive(Debug, Error)]
pub enum Error {
    /// LSP-related error.
    #[error("LSP error: {0}")]
    Lsp(#[from] LspError),

    /// Transport-related error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Tool-related error.
    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    /// Backend supervision error.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for lspbridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The spec's §7 error classification, carried in the outer MCP-facing
/// envelope independently of the underlying Rust error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    /// Bad path, bad position, unparseable argument.
    InvalidInput,
    /// File outside the active workspace.
    ContextMismatch,
    /// Backend's enabled flag is off.
    BackendDisabled,
    /// Spawn failure or handshake timeout.
    BackendUnavailable,
    /// Capability-check miss on a unified tool.
    NotImplemented,
    /// LSP or child request exceeded its deadline.
    UpstreamTimeout,
    /// Connection closed mid-call.
    UpstreamCrash,
    /// Child MCP tool errored; one retry already attempted.
    TransientToolError,
}

/// The JSON envelope every failing outer-transport tool call returns.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorEnvelope {
    /// The error classification.
    pub error: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// A hint on how to recover, e.g. "call switch_workspace first".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    /// Builds an envelope with no recovery hint.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: kind,
            message: message.into(),
            hint: None,
        }
    }

    /// Builds an envelope including a recovery hint.
    pub fn with_hint(kind: ErrorKind, message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            error: kind,
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsp_error_display() {
        let err = LspError::ServerStartFailed("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "failed to start language server: connection refused"
        );
    }

    #[test]
    fn test_error_conversion() {
        let lsp_err = LspError::NotInitialized;
        let err: Error = lsp_err.into();
        assert!(matches!(err, Error::Lsp(LspError::NotInitialized)));
    }

    #[test]
    fn test_tool_error_from_lsp_error() {
        let lsp_err = LspError::DocumentNotFound("/path/to/file.py".to_string());
        let tool_err: ToolError = lsp_err.into();
        assert!(matches!(tool_err, ToolError::Lsp(_)));
    }

    #[test]
    fn test_envelope_serializes_hint_only_when_present() {
        let no_hint = ErrorEnvelope::new(ErrorKind::InvalidInput, "bad path");
        let json = serde_json::to_value(&no_hint).unwrap();
        assert!(json.get("hint").is_none());

        let with_hint =
            ErrorEnvelope::with_hint(ErrorKind::ContextMismatch, "outside workspace", "call switch_workspace");
        let json = serde_json::to_value(&with_hint).unwrap();
        assert_eq!(json["hint"], "call switch_workspace");
    }
}
