//! Typed schemas for the methods the engine sends us.
//!
//! Every inbound payload is decoded into a schema struct at the dispatch
//! boundary; a payload that doesn't fit surfaces as a `ProtocolError`
//! instead of a missing-field panic further in.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::line_cache::WireUpdate;

/// View identifier as assigned by the engine (e.g. `"view-id-1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub String);

impl ViewId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(s: &str) -> Self {
        ViewId(s.to_string())
    }
}

/// `update`: new diff batch for one view's line cache.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateParams {
    pub view_id: ViewId,
    pub update: WireUpdate,
}

/// `scroll_to`: ask the view to bring a position into sight.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScrollToParams {
    pub view_id: ViewId,
    pub line: usize,
    pub col: usize,
}

/// `def_style`: define (or redefine) a style id used by line spans.
///
/// Colors are packed ARGB.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StyleDef {
    pub id: u32,
    #[serde(default)]
    pub fg_color: Option<u32>,
    #[serde(default)]
    pub bg_color: Option<u32>,
    #[serde(default)]
    pub weight: Option<u16>,
    #[serde(default)]
    pub italic: Option<bool>,
    #[serde(default)]
    pub underline: Option<bool>,
}

/// `alert`: a message the engine wants shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertParams {
    pub msg: String,
}

/// A decoded engine-originated call.
#[derive(Debug, Clone)]
pub enum CoreNotification {
    Update(UpdateParams),
    ScrollTo(ScrollToParams),
    DefStyle(StyleDef),
    Alert(AlertParams),
    /// A method this client does not handle.
    Unknown(String),
}

impl CoreNotification {
    /// Decode `params` according to `method`.
    pub fn parse(method: &str, params: Value) -> Result<Self, ProtocolError> {
        fn decode<T: serde::de::DeserializeOwned>(
            method: &str,
            params: Value,
        ) -> Result<T, ProtocolError> {
            serde_json::from_value(params).map_err(|e| ProtocolError::invalid_params(method, e))
        }

        Ok(match method {
            "update" => CoreNotification::Update(decode(method, params)?),
            "scroll_to" => CoreNotification::ScrollTo(decode(method, params)?),
            "def_style" => CoreNotification::DefStyle(decode(method, params)?),
            "alert" => CoreNotification::Alert(decode(method, params)?),
            other => CoreNotification::Unknown(other.to_string()),
        })
    }
}
