//! Shared types for the `lspbridge` gateway and its per-language workers.
//!
//! # Modules
//!
//! - [`error`] - error taxonomy shared by both binaries, plus the outer
//!   MCP-facing `{error, message, hint}` envelope.
//! - [`paths`] - path↔URI conversion, 1-indexed↔0-indexed position
//!   conversion, and project-root ancestor-walk detection.
//! - [`config`] - `LSP_MCP_*` environment configuration and the
//!   language/provider enums both binaries route on.
//! - [`capability`] - the static per-language tool capability table each
//!   worker consults to decide what to expose, and that the gateway's
//!   router falls back on only to compose a hint on a capability miss
//!   (spec §4.7); the router's actual capability check queries the
//!   resolved backend's own discovered tool list.

pub mod capability;
pub mod config;
pub mod error;
pub mod paths;

pub use error::{Error, ErrorEnvelope, ErrorKind, Result};
