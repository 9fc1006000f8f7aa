//! Rendered line model: text, carets and style spans.

use std::ops::Range;

use serde::Deserialize;
use tracing::warn;

use crate::error::ProtocolError;

/// Style id the engine reserves for selection highlights.
pub const SELECTION_STYLE_ID: u32 = 0;

/// One styled run over a line's text, as byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleSpan {
    pub range: Range<usize>,
    pub style_id: u32,
    pub is_selection: bool,
}

impl StyleSpan {
    pub fn new(range: Range<usize>, style_id: u32) -> Self {
        Self {
            range,
            style_id,
            is_selection: style_id == SELECTION_STYLE_ID,
        }
    }

    /// Decode the engine's flat `[start, len, style_id, ...]` triples.
    ///
    /// Each `start` is relative to the end of the previous span and may be
    /// negative. Offsets are clamped to `text`, so a span never points past
    /// the end of the line.
    pub fn from_raw(raw: &[i64], text: &str) -> Vec<StyleSpan> {
        if raw.len() % 3 != 0 {
            warn!(
                "Style array length {} is not a multiple of 3; ignoring the tail",
                raw.len()
            );
        }

        let text_len = text.len() as i64;
        let mut spans = Vec::with_capacity(raw.len() / 3);
        let mut prev_end: i64 = 0;

        for triple in raw.chunks_exact(3) {
            let (delta, len, style) = (triple[0], triple[1], triple[2]);
            let start = prev_end.saturating_add(delta).clamp(0, text_len);
            let end = start.saturating_add(len.max(0)).clamp(start, text_len);
            prev_end = end;

            let Ok(style_id) = u32::try_from(style) else {
                warn!("Ignoring span with invalid style id {}", style);
                continue;
            };
            spans.push(StyleSpan::new(start as usize..end as usize, style_id));
        }
        spans
    }
}

/// One row of the document as the engine last described it.
///
/// Immutable once built; a patch produces a new `Line`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    text: String,
    cursor: Vec<usize>,
    styles: Vec<StyleSpan>,
}

impl Line {
    /// Build a line. Cursor offsets are sorted and deduplicated.
    pub fn new(text: impl Into<String>, mut cursor: Vec<usize>, styles: Vec<StyleSpan>) -> Self {
        cursor.sort_unstable();
        cursor.dedup();
        Self {
            text: text.into(),
            cursor,
            styles,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> &[usize] {
        &self.cursor
    }

    pub fn styles(&self) -> &[StyleSpan] {
        &self.styles
    }

    /// Whether any span is a selection highlight. Used to decide whether
    /// the line's background needs drawing before the text.
    pub fn contains_selection(&self) -> bool {
        self.styles.iter().any(|span| span.is_selection)
    }

    pub fn contains_cursor(&self) -> bool {
        !self.cursor.is_empty()
    }

    /// A new line with this line's text and whatever cursor/styles the
    /// patch supplies; absent fields are inherited.
    pub fn patched(&self, patch: &LinePatch) -> Line {
        let cursor = patch
            .cursor
            .clone()
            .unwrap_or_else(|| self.cursor.clone());
        let styles = match &patch.styles {
            Some(raw) => StyleSpan::from_raw(raw, &self.text),
            None => self.styles.clone(),
        };
        Line::new(self.text.clone(), cursor, styles)
    }
}

/// Line payload as it appears in an `ins` or `update` op.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireLine {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub cursor: Option<Vec<usize>>,
    #[serde(default)]
    pub styles: Option<Vec<i64>>,
}

impl TryFrom<WireLine> for Line {
    type Error = ProtocolError;

    fn try_from(wire: WireLine) -> Result<Self, Self::Error> {
        let text = wire.text.ok_or(ProtocolError::MissingField("text"))?;
        let styles = wire
            .styles
            .map(|raw| StyleSpan::from_raw(&raw, &text))
            .unwrap_or_default();
        Ok(Line::new(text, wire.cursor.unwrap_or_default(), styles))
    }
}

/// Replacement cursor/styles for an existing line. Text is never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinePatch {
    pub cursor: Option<Vec<usize>>,
    pub styles: Option<Vec<i64>>,
}

impl From<WireLine> for LinePatch {
    fn from(wire: WireLine) -> Self {
        Self {
            cursor: wire.cursor,
            styles: wire.styles,
        }
    }
}
