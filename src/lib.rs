//! xi-frontend client core
//!
//! This library provides the communication and state-reconciliation layer
//! of a split-process editor frontend:
//!
//! - `rpc` - newline-delimited JSON-RPC transport to the engine process
//! - `line_cache` - sparse per-view mirror of the engine's lines, driven by diff batches
//! - `protocol` - typed schemas for engine-originated methods
//! - `commands` - typed commands sent to the engine
//! - `document` - per-document handle that queues edits until the view opens
//! - `frontend` - the `RpcHandler` routing engine notifications into line caches
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::mpsc;
//! use xi_frontend::commands::CoreService;
//! use xi_frontend::frontend::{Frontend, StyleMap, ViewRegistry};
//! use xi_frontend::rpc::CoreConnection;
//!
//! let views = ViewRegistry::new();
//! let (tx, rx) = mpsc::channel();
//! let conn = CoreConnection::spawn("xi-core", Frontend::new(views.clone(), StyleMap::new(), tx))?;
//! let view_id = conn.new_view(None)?;
//! views.open(view_id.clone());
//! ```

pub mod commands;
pub mod config;
pub mod document;
pub mod error;
pub mod frontend;
pub mod line_cache;
pub mod protocol;
pub mod rpc;

pub use error::{ProtocolError, RpcError};
