//! Sparse mirror of one view's lines.
//!
//! The cache never holds the whole document. It keeps a contiguous window
//! of known `lines` (where individual slots may still be placeholders)
//! framed by two runs of lines that are known to exist but have not been
//! fetched:
//!
//! ```text
//!   invalid_before        lines                  invalid_after
//! ├───────────────┼──────────────────────────┼──────────────────┤
//!   unknown          Some(line) | None          unknown
//! ```
//!
//! `height()` is always the engine's last reported line count. The cache
//! changes only through [`LineCache::apply_update`], which rebuilds the
//! whole state from a diff batch and swaps it in at the end.

mod line;
mod ops;

use std::ops::Range;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::ProtocolError;

pub use line::{Line, LinePatch, StyleSpan, WireLine, SELECTION_STYLE_ID};
pub use ops::{DiffOp, WireDiffOp, WireUpdate};

/// Known-region slot: `None` is a placeholder.
pub type Slot = Option<Arc<Line>>;

#[derive(Debug, Clone, Default)]
pub struct LineCache {
    invalid_before: usize,
    lines: Vec<Slot>,
    invalid_after: usize,
}

/// Upper bound on the known region, placeholders included. A batch that
/// would materialize more slots than this is rejected.
pub const MAX_KNOWN_LINES: usize = 1 << 26;

/// New state under construction while a batch is applied.
#[derive(Default)]
struct Rebuild {
    invalid_before: usize,
    lines: Vec<Slot>,
    invalid_after: usize,
}

impl Rebuild {
    /// Unknown lines land in front while nothing is known yet, otherwise
    /// they extend the trailing run.
    fn push_unknown(&mut self, n: usize) -> Result<(), ProtocolError> {
        let run = if self.lines.is_empty() {
            &mut self.invalid_before
        } else {
            &mut self.invalid_after
        };
        *run = run.checked_add(n).ok_or(ProtocolError::LineCountOverflow)?;
        Ok(())
    }

    /// Materialize the trailing unknown run as placeholders before known
    /// content is appended after it.
    fn flush_unknown(&mut self) -> Result<(), ProtocolError> {
        let n = std::mem::take(&mut self.invalid_after);
        self.reserve_known(n)?;
        self.lines.extend(std::iter::repeat(None).take(n));
        Ok(())
    }

    fn reserve_known(&self, extra: usize) -> Result<(), ProtocolError> {
        let lines = self
            .lines
            .len()
            .checked_add(extra)
            .ok_or(ProtocolError::LineCountOverflow)?;
        if lines > MAX_KNOWN_LINES {
            return Err(ProtocolError::TooManyLines {
                lines,
                max: MAX_KNOWN_LINES,
            });
        }
        Ok(())
    }

    fn height(&self) -> Option<usize> {
        self.invalid_before
            .checked_add(self.lines.len())?
            .checked_add(self.invalid_after)
    }
}

impl LineCache {
    /// An empty cache (height 0).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> usize {
        self.invalid_before + self.lines.len() + self.invalid_after
    }

    pub fn invalid_before(&self) -> usize {
        self.invalid_before
    }

    pub fn invalid_after(&self) -> usize {
        self.invalid_after
    }

    /// Slots of the known region, placeholders included.
    pub fn known_lines(&self) -> &[Slot] {
        &self.lines
    }

    /// No lines, or the single empty line the engine reports for a fresh
    /// document.
    pub fn is_empty(&self) -> bool {
        match self.lines.as_slice() {
            [] => true,
            [only] => only.as_ref().is_some_and(|line| line.text().is_empty()),
            _ => false,
        }
    }

    /// Line at absolute index `ix`, if its content is known.
    pub fn get(&self, ix: usize) -> Option<&Line> {
        self.slot(ix).and_then(|slot| slot.as_deref())
    }

    /// Shared handle to the line at `ix`, for readers that outlive a lock.
    pub fn get_shared(&self, ix: usize) -> Option<Arc<Line>> {
        self.slot(ix).and_then(Clone::clone)
    }

    fn slot(&self, ix: usize) -> Option<&Slot> {
        ix.checked_sub(self.invalid_before)
            .and_then(|rel| self.lines.get(rel))
    }

    /// Decode a wire batch and apply it.
    ///
    /// A malformed batch is rejected as a whole and leaves the cache
    /// untouched.
    pub fn apply_wire_update(&mut self, update: WireUpdate) -> Result<(), ProtocolError> {
        let ops = update.into_ops()?;
        self.apply_update(ops)
    }

    /// Fold a diff batch into the cache.
    ///
    /// Ops are consumed left to right against a read cursor over the old
    /// state while the new state is assembled; the new state replaces the
    /// old one only after the last op. Counts that overflow, or a known
    /// region past [`MAX_KNOWN_LINES`], reject the batch and leave the
    /// cache as it was.
    pub fn apply_update(
        &mut self,
        ops: impl IntoIterator<Item = DiffOp>,
    ) -> Result<(), ProtocolError> {
        let mut new = Rebuild::default();
        let mut old_ix: usize = 0;

        for op in ops {
            match op {
                DiffOp::Invalidate(n) => new.push_unknown(n)?,
                DiffOp::Insert(lines) => {
                    new.flush_unknown()?;
                    new.reserve_known(lines.len())?;
                    new.lines.extend(lines.into_iter().map(|line| Some(Arc::new(line))));
                }
                DiffOp::Copy(n) => {
                    self.carry(&mut new, old_ix, n, |_, old| old.clone())?;
                    old_ix = advance(old_ix, n)?;
                }
                DiffOp::Patch(patches) => {
                    let n = patches.len();
                    self.carry(&mut new, old_ix, n, |offset, old| {
                        old.as_ref()
                            .map(|line| Arc::new(line.patched(&patches[offset])))
                    })?;
                    old_ix = advance(old_ix, n)?;
                }
                DiffOp::Skip(n) => old_ix = advance(old_ix, n)?,
            }
        }

        // Keeps `height()` free of overflow for the stored state.
        let height = new.height().ok_or(ProtocolError::LineCountOverflow)?;
        trace!(
            "Line cache rebuilt: {} + {} + {} = {} (was height {})",
            new.invalid_before,
            new.lines.len(),
            new.invalid_after,
            height,
            self.height()
        );

        self.invalid_before = new.invalid_before;
        self.lines = new.lines;
        self.invalid_after = new.invalid_after;
        Ok(())
    }

    /// Carry `n` old lines starting at `old_ix` into `new`.
    ///
    /// The run may straddle the old invalid-before zone, the known region
    /// and whatever lies past it. Only the known part goes through `map`,
    /// which receives the offset within the run and the old slot; the other
    /// parts stay unknown.
    fn carry<F>(
        &self,
        new: &mut Rebuild,
        old_ix: usize,
        n: usize,
        mut map: F,
    ) -> Result<(), ProtocolError>
    where
        F: FnMut(usize, &Slot) -> Slot,
    {
        let known_end = self.invalid_before + self.lines.len();
        let mut ix = old_ix;
        let mut remaining = n;

        if ix < self.invalid_before {
            let unknown = remaining.min(self.invalid_before - ix);
            new.push_unknown(unknown)?;
            ix += unknown;
            remaining -= unknown;
        }

        if remaining > 0 && ix < known_end {
            let known = remaining.min(known_end - ix);
            let start = ix - self.invalid_before;
            let offset = n - remaining;

            new.flush_unknown()?;
            new.reserve_known(known)?;
            for (i, slot) in self.lines[start..start + known].iter().enumerate() {
                new.lines.push(map(offset + i, slot));
            }
            remaining -= known;
        }

        new.push_unknown(remaining)
    }

    /// Half-open ranges of unknown lines within `[first, last)`.
    ///
    /// `last` is clamped to the height; lines past the end are not missing.
    /// Adjacent unknown lines are merged, so the result is sorted, disjoint
    /// and non-adjacent.
    pub fn compute_missing(&self, first: usize, last: usize) -> Vec<Range<usize>> {
        let last = last.min(self.height());
        if first >= last {
            warn!(
                "compute_missing called with empty range {}..{} (height {})",
                first,
                last,
                self.height()
            );
            return Vec::new();
        }

        let mut result: Vec<Range<usize>> = Vec::new();
        for ix in first..last {
            if self.get(ix).is_some() {
                continue;
            }
            match result.last_mut() {
                Some(range) if range.end == ix => range.end = ix + 1,
                _ => result.push(ix..ix + 1),
            }
        }
        result
    }
}

/// Move the read cursor over the old state.
fn advance(old_ix: usize, n: usize) -> Result<usize, ProtocolError> {
    old_ix.checked_add(n).ok_or(ProtocolError::LineCountOverflow)
}
