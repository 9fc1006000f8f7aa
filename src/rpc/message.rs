//! Decoded transport units and their classification.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ProtocolError, RpcError};

/// Request id. Assigned by the sender as a counter starting at 0.
pub type RequestId = u64;

/// Outcome carried by a response: the `result` member, or the engine's
/// `error` member converted into `RpcError::Remote`.
pub type ResponseResult = Result<Value, RpcError>;

/// One decoded frame.
#[derive(Debug)]
pub enum Message {
    /// Expects a response carrying the same id.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// Answer to a request we sent earlier.
    Response {
        id: RequestId,
        result: ResponseResult,
    },
    /// No id, no reply expected.
    Notification { method: String, params: Value },
}

impl Message {
    /// Decode raw frame bytes.
    pub fn from_slice(frame: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_slice(frame).map_err(ProtocolError::Malformed)?;
        Self::from_value(value)
    }

    /// Classify a decoded JSON document.
    ///
    /// - `id` + `result` (or `error`) is a response
    /// - `id` without `result` is a request
    /// - no `id` is a notification
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        match obj.remove("id") {
            Some(id_value) => {
                let id = id_value
                    .as_u64()
                    .ok_or_else(|| ProtocolError::InvalidId(id_value.clone()))?;

                if let Some(result) = obj.remove("result") {
                    Ok(Message::Response {
                        id,
                        result: Ok(result),
                    })
                } else if let Some(error) = obj.remove("error") {
                    Ok(Message::Response {
                        id,
                        result: Err(remote_error(error)),
                    })
                } else {
                    let method = take_method(&mut obj)?;
                    let params = obj.remove("params").unwrap_or(Value::Null);
                    Ok(Message::Request { id, method, params })
                }
            }
            None => {
                let method = take_method(&mut obj)?;
                let params = obj.remove("params").unwrap_or(Value::Null);
                Ok(Message::Notification { method, params })
            }
        }
    }

    /// Method name, for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => Some(method),
            Message::Response { .. } => None,
        }
    }
}

fn take_method(obj: &mut Map<String, Value>) -> Result<String, ProtocolError> {
    match obj.remove("method") {
        Some(Value::String(method)) => Ok(method),
        _ => Err(ProtocolError::MissingField("method")),
    }
}

fn remote_error(error: Value) -> RpcError {
    RpcError::Remote {
        code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown engine error")
            .to_string(),
        data: error.get("data").cloned(),
    }
}

/// Outbound request frame.
#[derive(Debug, Serialize)]
pub struct OutgoingRequest<'a> {
    pub id: RequestId,
    pub method: &'a str,
    pub params: &'a Value,
}

/// Outbound notification frame.
#[derive(Debug, Serialize)]
pub struct OutgoingNotification<'a> {
    pub method: &'a str,
    pub params: &'a Value,
}

/// Outbound response frame, answering an engine request.
#[derive(Debug, Serialize)]
pub struct OutgoingResponse<'a> {
    pub id: RequestId,
    pub result: &'a Value,
}
