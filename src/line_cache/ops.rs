//! Diff operations and their wire form.
//!
//! Wire tags map onto the typed ops as:
//!
//! | wire         | op           |
//! |--------------|--------------|
//! | `invalidate` | `Invalidate` |
//! | `ins`        | `Insert`     |
//! | `copy`       | `Copy`       |
//! | `update`     | `Patch`      |
//! | `skip`       | `Skip`       |

use serde::Deserialize;
use tracing::warn;

use crate::error::ProtocolError;
use crate::line_cache::line::{Line, LinePatch, WireLine};

/// One instruction of an update batch.
///
/// Ops that carry payloads hold exactly one payload per affected line, so
/// their count is the payload length.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    /// `n` lines that exist but whose content is unknown.
    Invalidate(usize),
    /// Brand new lines; consumes nothing from the old state.
    Insert(Vec<Line>),
    /// Carry `n` old lines over unchanged.
    Copy(usize),
    /// Carry old lines over with new cursor/styles.
    Patch(Vec<LinePatch>),
    /// Drop `n` old lines.
    Skip(usize),
}

impl DiffOp {
    /// Number of lines this op covers.
    pub fn n(&self) -> usize {
        match self {
            DiffOp::Invalidate(n) | DiffOp::Copy(n) | DiffOp::Skip(n) => *n,
            DiffOp::Insert(lines) => lines.len(),
            DiffOp::Patch(patches) => patches.len(),
        }
    }

    /// Lines this op contributes to the new state.
    pub fn new_height(&self) -> usize {
        match self {
            DiffOp::Skip(_) => 0,
            other => other.n(),
        }
    }
}

/// `update` member of an `update` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct WireUpdate {
    pub ops: Vec<WireDiffOp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDiffOp {
    pub op: String,
    pub n: usize,
    #[serde(default)]
    pub lines: Option<Vec<WireLine>>,
}

impl WireUpdate {
    /// Convert the whole batch, failing if any op is malformed.
    ///
    /// Ops with an unrecognized tag are logged and left out; the rest of
    /// the batch still applies.
    pub fn into_ops(self) -> Result<Vec<DiffOp>, ProtocolError> {
        let mut ops = Vec::with_capacity(self.ops.len());
        for wire in self.ops {
            if let Some(op) = wire.into_op()? {
                ops.push(op);
            }
        }
        Ok(ops)
    }
}

impl WireDiffOp {
    fn into_op(self) -> Result<Option<DiffOp>, ProtocolError> {
        let n = self.n;
        let op = match self.op.as_str() {
            "invalidate" => DiffOp::Invalidate(n),
            "copy" => DiffOp::Copy(n),
            "skip" => DiffOp::Skip(n),
            "ins" => {
                let lines = self
                    .lines
                    .ok_or(ProtocolError::MissingLinePayloads { op: "ins" })?;
                if lines.len() != n {
                    return Err(ProtocolError::LineCountMismatch {
                        op: "ins",
                        expected: n,
                        actual: lines.len(),
                    });
                }
                let lines = lines
                    .into_iter()
                    .map(Line::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                DiffOp::Insert(lines)
            }
            "update" => {
                let lines = self
                    .lines
                    .ok_or(ProtocolError::MissingLinePayloads { op: "update" })?;
                if lines.len() < n {
                    return Err(ProtocolError::LineCountMismatch {
                        op: "update",
                        expected: n,
                        actual: lines.len(),
                    });
                }
                DiffOp::Patch(lines.into_iter().take(n).map(LinePatch::from).collect())
            }
            unknown => {
                warn!("Ignoring unknown diff op '{}' (n: {})", unknown, n);
                return Ok(None);
            }
        };
        Ok(Some(op))
    }
}
