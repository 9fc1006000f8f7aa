//! Typed commands sent to the engine.
//!
//! View-scoped editing goes through the `edit` method, which wraps the
//! actual operation together with the target `view_id`:
//!
//! ```text
//! {"method":"edit","params":{"method":"insert","params":{"chars":"a"},"view_id":"view-id-1"}}
//! ```

use std::path::Path;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ProtocolError, RpcError};
use crate::protocol::ViewId;
use crate::rpc::{CoreConnection, RequestId, ResponseCallback, RpcPeer};

/// Operations carried inside an `edit` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOp {
    Insert { chars: String },
    DeleteBackward,
    DeleteForward,
    InsertNewline,
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
    PageUp,
    PageDown,
    Undo,
    Redo,
    /// Visible window changed; the engine streams updates for `[first, last)`.
    Scroll { first: usize, last: usize },
    /// Ask for the content of `[first, last)`.
    RequestLines { first: usize, last: usize },
    Click {
        line: usize,
        col: usize,
        modifiers: u32,
        count: u32,
    },
}

impl EditOp {
    pub fn method(&self) -> &'static str {
        match self {
            EditOp::Insert { .. } => "insert",
            EditOp::DeleteBackward => "delete_backward",
            EditOp::DeleteForward => "delete_forward",
            EditOp::InsertNewline => "insert_newline",
            EditOp::MoveUp => "move_up",
            EditOp::MoveDown => "move_down",
            EditOp::MoveLeft => "move_left",
            EditOp::MoveRight => "move_right",
            EditOp::PageUp => "page_up",
            EditOp::PageDown => "page_down",
            EditOp::Undo => "undo",
            EditOp::Redo => "redo",
            EditOp::Scroll { .. } => "scroll",
            EditOp::RequestLines { .. } => "request_lines",
            EditOp::Click { .. } => "click",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            EditOp::Insert { chars } => json!({ "chars": chars }),
            EditOp::Scroll { first, last } | EditOp::RequestLines { first, last } => {
                json!([first, last])
            }
            EditOp::Click {
                line,
                col,
                modifiers,
                count,
            } => json!([line, col, modifiers, count]),
            _ => json!([]),
        }
    }

    /// Params of the wrapping `edit` command.
    pub fn to_edit_params(&self, view_id: &ViewId) -> Value {
        json!({
            "method": self.method(),
            "params": self.params(),
            "view_id": view_id,
        })
    }
}

// =============================================================================
// Service Trait for Dependency Injection
// =============================================================================

/// Trait for sending commands to the engine.
///
/// Implemented by `CoreConnection` and `RpcPeer`; tests substitute a mock
/// that records what would have been sent.
pub trait CoreService {
    fn notify(&self, method: &str, params: Value) -> Result<(), RpcError>;

    fn call_async(
        &self,
        method: &str,
        params: Value,
        on_complete: ResponseCallback,
    ) -> Result<RequestId, RpcError>;

    fn call_sync(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Open a view, optionally backed by a file, and wait for its id.
    fn new_view(&self, file_path: Option<&Path>) -> Result<ViewId, RpcError> {
        let result = self.call_sync("new_view", new_view_params(file_path))?;
        let view_id: ViewId = serde_json::from_value(result)
            .map_err(|e| ProtocolError::invalid_params("new_view", e))?;
        debug!("Opened view {}", view_id);
        Ok(view_id)
    }

    /// Open a view without blocking; `on_open` runs on the delivery thread.
    fn new_view_async<F>(&self, file_path: Option<&Path>, on_open: F) -> Result<RequestId, RpcError>
    where
        F: FnOnce(Result<ViewId, RpcError>) + Send + 'static,
        Self: Sized,
    {
        self.call_async(
            "new_view",
            new_view_params(file_path),
            Box::new(move |result| {
                on_open(result.and_then(|value| {
                    serde_json::from_value::<ViewId>(value)
                        .map_err(|e| ProtocolError::invalid_params("new_view", e).into())
                }))
            }),
        )
    }

    fn close_view(&self, view_id: &ViewId) -> Result<(), RpcError> {
        debug!("Closing view {}", view_id);
        self.notify("close_view", json!({ "view_id": view_id }))
    }

    fn save(&self, view_id: &ViewId, file_path: &Path) -> Result<(), RpcError> {
        self.notify(
            "save",
            json!({ "view_id": view_id, "file_path": file_path.to_string_lossy() }),
        )
    }

    fn edit(&self, view_id: &ViewId, op: &EditOp) -> Result<(), RpcError> {
        self.notify("edit", op.to_edit_params(view_id))
    }

    /// Send an edit as a request and block until the engine answers it.
    fn edit_sync(&self, view_id: &ViewId, op: &EditOp) -> Result<Value, RpcError> {
        self.call_sync("edit", op.to_edit_params(view_id))
    }

    /// Ask which plugins the engine starts for a view.
    fn initial_plugins(
        &self,
        view_id: &ViewId,
        on_plugins: PluginsCallback,
    ) -> Result<RequestId, RpcError> {
        self.call_async(
            "plugin",
            json!({ "command": "initial_plugins", "view_id": view_id }),
            Box::new(move |result| {
                on_plugins(result.and_then(|value| {
                    serde_json::from_value::<Vec<String>>(value)
                        .map_err(|e| ProtocolError::invalid_params("initial_plugins", e).into())
                }))
            }),
        )
    }
}

/// Receives the plugin names answered to `initial_plugins`.
pub type PluginsCallback = Box<dyn FnOnce(Result<Vec<String>, RpcError>) + Send + 'static>;

fn new_view_params(file_path: Option<&Path>) -> Value {
    match file_path {
        Some(path) => json!({ "file_path": path.to_string_lossy() }),
        None => json!({}),
    }
}

impl CoreService for RpcPeer {
    fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        self.send_notification(method, params)
    }

    fn call_async(
        &self,
        method: &str,
        params: Value,
        on_complete: ResponseCallback,
    ) -> Result<RequestId, RpcError> {
        self.send_request_async(method, params, on_complete)
    }

    fn call_sync(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.send_request_sync(method, params)
    }
}

impl CoreService for CoreConnection {
    fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        self.send_notification(method, params)
    }

    fn call_async(
        &self,
        method: &str,
        params: Value,
        on_complete: ResponseCallback,
    ) -> Result<RequestId, RpcError> {
        self.send_request_async(method, params, on_complete)
    }

    fn call_sync(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.send_request_sync(method, params)
    }
}
