//! Error types shared by the transport and the line cache.
//!
//! `RpcError` covers failures of the connection itself; `ProtocolError`
//! covers frames and payloads that arrived intact but do not have the
//! expected shape. Only `RpcError::Spawn` is fatal; everything else is
//! logged at the boundary where it is detected.

use thiserror::Error;

/// Transport-level error types.
///
/// These errors provide actionable messages for common failure modes
/// when communicating with the engine process.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The engine executable could not be launched.
    #[error("Failed to spawn engine '{path}': {source}")]
    Spawn {
        /// Path that was passed to `CoreConnection::spawn`
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error while writing to the engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound message could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The engine answered a request with an `error` member.
    #[error("Engine error {code}: {message}")]
    Remote {
        /// Error code reported by the engine
        code: i64,
        /// Error message
        message: String,
        /// Optional additional data
        data: Option<serde_json::Value>,
    },

    /// The engine closed its output before the call completed.
    #[error("Connection to engine closed")]
    Disconnected,

    /// A blocking call was issued from the thread that delivers inbound
    /// messages; waiting there could never be satisfied.
    #[error("Blocking call '{0}' issued from the delivery thread")]
    WouldDeadlock(String),

    /// A result arrived but did not have the expected shape.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A view-scoped command was issued before the engine assigned a view id.
    #[error("View is not open")]
    ViewNotOpen,
}

/// Errors for messages that are well-framed but have the wrong shape.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not valid JSON.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Frame decoded to something other than a JSON object.
    #[error("Message is not a JSON object")]
    NotAnObject,

    /// The `id` member is not a non-negative integer.
    #[error("Invalid message id: {0}")]
    InvalidId(serde_json::Value),

    /// A required member is absent.
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    /// Params for a known method failed to decode into its schema.
    #[error("Invalid params for '{method}': {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// A diff op carried a different number of line payloads than `n`.
    #[error("'{op}' op declared {expected} lines but carried {actual}")]
    LineCountMismatch {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A diff op that needs line payloads carried none.
    #[error("'{op}' op is missing its lines")]
    MissingLinePayloads { op: &'static str },

    /// Line counts in an update batch do not fit in `usize`.
    #[error("Line counts in update batch overflow")]
    LineCountOverflow,

    /// An update batch would materialize more placeholder and known lines
    /// than the cache accepts.
    #[error("Update batch needs {lines} known lines (max {max})")]
    TooManyLines { lines: usize, max: usize },
}

impl ProtocolError {
    /// Wrap a serde error for the given method's params.
    pub fn invalid_params(method: &str, source: serde_json::Error) -> Self {
        ProtocolError::InvalidParams {
            method: method.to_string(),
            source,
        }
    }
}
