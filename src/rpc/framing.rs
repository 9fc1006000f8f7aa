//! Newline-delimited message framing for JSON-RPC over the engine's pipes.
//!
//! # Wire Format
//!
//! ```text
//! {"method":"update","params":{...}}\n
//! {"id":0,"result":"view-id-1"}\n
//! ```
//!
//! Each frame is one complete JSON document followed by a single `\n`.
//! Compact JSON never contains a raw newline (string contents are escaped),
//! so the delimiter is unambiguous.

use std::io::Write;

use serde::Serialize;
use tracing::warn;

/// Frame delimiter byte.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Maximum unterminated frame size (100MB) to prevent OOM from a buggy engine.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Reassembles frames from bytes that arrive in arbitrary chunks.
///
/// Bytes are accumulated in a growable buffer. Each `push` only scans the
/// newly appended region for delimiters; the retained prefix is known to be
/// delimiter-free. Complete frames are returned without their delimiter and
/// the unconsumed tail is kept for the next read.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the stream and extract every complete frame.
    ///
    /// Frames are returned in the order they appear in the stream.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let scan_start = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        for ix in scan_start..self.buf.len() {
            if self.buf[ix] == FRAME_DELIMITER {
                frames.push(self.buf[consumed..ix].to_vec());
                consumed = ix + 1;
            }
        }
        self.buf.drain(..consumed);

        if self.buf.len() > MAX_FRAME_SIZE {
            warn!(
                "Discarding unterminated frame of {} bytes (max {})",
                self.buf.len(),
                MAX_FRAME_SIZE
            );
            self.buf.clear();
        }

        frames
    }

    /// Number of buffered bytes still waiting for a delimiter.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Serialize `message` as one frame and write it to `writer`.
///
/// The frame is assembled in memory first so that a single `write_all`
/// carries the whole frame; concurrent writers holding the same lock can
/// therefore never interleave partial frames.
pub fn write_frame<W, T>(writer: &mut W, message: &T) -> std::io::Result<()>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    let mut frame = serde_json::to_vec(message)?;
    frame.push(FRAME_DELIMITER);
    writer.write_all(&frame)?;
    writer.flush()
}
