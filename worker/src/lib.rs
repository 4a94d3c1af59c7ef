//! A single-language LSP worker exposed over MCP.
//!
//! Each worker binary wraps exactly one language server (Pyright or
//! `python-lsp-server` for Python, `typescript-language-server` for
//! TypeScript, Volar for Vue) behind a workspace-keyed [`pool`] of live
//! connections, and publishes a fixed set of MCP tools the gateway
//! forwards calls to.
//!
//! # Modules
//!
//! - [`document`] - per-connection open-document cache with monotonic
//!   versions.
//! - [`pool`] - workspace-keyed LSP connection pool and its handshake.
//! - [`transport`] - newline-delimited JSON-RPC transport for Volar's
//!   companion tsserver.js process.
//! - [`tsserver_bridge`] - Vue-specific proxying over that transport.
//! - [`dispatcher`] - translates MCP tool arguments into LSP requests and
//!   back into compact JSON results.
//! - [`tools`] - MCP tool parameter/result structs.
//! - [`server`] - the `#[tool_router]`/`#[tool_handler]` MCP surface.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatcher;
pub mod document;
pub mod pool;
pub mod server;
pub mod tools;
pub mod transport;
pub mod tsserver_bridge;

pub use server::Worker;
