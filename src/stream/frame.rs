//! Server-sent-event framing.
//!
//! The realtime endpoint answers with `text/event-stream`: `field: value`
//! lines, `data` lines carrying the JSON payload, `:` comment lines as
//! keepalives, and a blank line closing each frame. Network chunks split lines
//! and frames anywhere, so the decoder keeps unfinished input between calls.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// One complete event-stream frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    /// Last `id` field of the frame, if any.
    pub id: Option<String>,
    /// Last `event` field of the frame, if any.
    pub event: Option<String>,
    /// `data` lines joined with `\n`.
    pub data: Bytes,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Debug, Default)]
struct PendingFrame {
    id: Option<String>,
    event: Option<String>,
    data: BytesMut,
    has_data: bool,
}

impl PendingFrame {
    fn take(&mut self) -> Option<RawFrame> {
        let pending = std::mem::take(self);
        pending.has_data.then(|| RawFrame {
            id: pending.id,
            event: pending.event,
            data: pending.data.freeze(),
        })
    }
}

/// Incremental event-stream decoder.
///
/// Frames come out in stream order and only once their closing blank line has
/// arrived, whatever the chunking. Any error poisons the decoder: the
/// connection it was reading is no longer trustworthy.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    scanned: usize,
    pending: PendingFrame,
    max_frame_bytes: usize,
    poisoned: bool,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            scanned: 0,
            pending: PendingFrame::default(),
            max_frame_bytes: max_frame_bytes.max(1),
            poisoned: false,
        }
    }

    /// Feeds one chunk, appending every frame it completes to `frames`.
    ///
    /// Frames completed before a malformed line are still appended.
    pub fn push(&mut self, chunk: &[u8], frames: &mut Vec<RawFrame>) -> Result<(), FrameError> {
        if self.poisoned {
            return Err(FrameError::Malformed(
                "decoder already failed on this stream".to_string(),
            ));
        }
        self.buffer.extend_from_slice(chunk);

        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|&byte| byte == b'\n')
            else {
                self.scanned = self.buffer.len();
                if self.buffer.len() > self.max_frame_bytes {
                    return Err(self.fail(format!(
                        "line exceeds {} bytes without a terminator",
                        self.max_frame_bytes
                    )));
                }
                return Ok(());
            };

            let mut line = self.buffer.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            if let Some(frame) = self.process_line(&line)? {
                frames.push(frame);
            }
        }
    }

    /// Bytes held for a frame that has not completed yet.
    pub fn residual_len(&self) -> usize {
        self.buffer.len() + self.pending.data.len()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn process_line(&mut self, line: &[u8]) -> Result<Option<RawFrame>, FrameError> {
        if line.is_empty() {
            return Ok(self.pending.take());
        }

        let Ok(line) = std::str::from_utf8(line) else {
            return Err(self.fail("line is not valid utf-8".to_string()));
        };
        if line.starts_with(':') {
            return Ok(None);
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.pending.has_data {
                    self.pending.data.extend_from_slice(b"\n");
                }
                self.pending.data.extend_from_slice(value.as_bytes());
                self.pending.has_data = true;
                if self.pending.data.len() > self.max_frame_bytes {
                    return Err(self.fail(format!(
                        "frame data exceeds {} bytes",
                        self.max_frame_bytes
                    )));
                }
            }
            "id" if !value.contains('\0') => self.pending.id = Some(value.to_string()),
            "event" => self.pending.event = Some(value.to_string()),
            // `retry` and unknown fields carry nothing for us.
            _ => {}
        }
        Ok(None)
    }

    fn fail(&mut self, reason: String) -> FrameError {
        self.poisoned = true;
        self.buffer.clear();
        self.pending = PendingFrame::default();
        FrameError::Malformed(reason)
    }
}
