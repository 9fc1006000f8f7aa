//! JSON-RPC transport to the engine process.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐       stdin / stdout        ┌─────────────────────┐
//! │    Frontend     │  ◄─────────────────────────►│       Engine        │
//! │ (CoreConnection)│   newline-delimited JSON    │   (child process)   │
//! └─────────────────┘                             └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! ```text
//! {"id":0,"method":"new_view","params":{}}          request
//! {"id":0,"result":"view-id-1"}                     response
//! {"method":"update","params":{"view_id":...}}      notification
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use xi_frontend::rpc::CoreConnection;
//! use serde_json::json;
//!
//! let conn = CoreConnection::spawn("xi-core", handler)?;
//! let view_id = conn.send_request_sync("new_view", json!({}))?;
//! conn.send_notification("close_view", json!({"view_id": view_id}))?;
//! ```

mod connection;
pub mod framing;
pub mod message;

pub use connection::{CoreConnection, ResponseCallback, RpcHandler, RpcPeer};
pub use message::{Message, RequestId, ResponseResult};
