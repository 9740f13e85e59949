//! Delimiter framing for JSON messages over a byte stream.
//!
//! Every frame is the JSON encoding of a [`Message`] followed by a single `#`
//! byte. There is no escaping: a payload containing `#` desynchronizes the
//! stream, so producers must keep it out of their data.

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tracing::warn;

use crate::errors::IpcError;
use crate::errors::Result;
use crate::message::Message;

/// Byte terminating every frame
pub const DELIMITER: u8 = b'#';

/// Default cap on bytes pending in a reassembly buffer (16 MiB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encodes a message as one wire frame
pub fn encode(message: &Message) -> Result<Bytes> {
    if message.op.is_empty() {
        return Err(IpcError::EmptyOp);
    }
    let mut buf = serde_json::to_vec(message)?;
    buf.push(DELIMITER);
    Ok(Bytes::from(buf))
}

/// Decodes one complete frame body (delimiter already stripped)
pub fn decode(frame: &[u8]) -> Result<Message> {
    let message: Message = serde_json::from_slice(frame)?;
    if message.op.is_empty() {
        return Err(IpcError::EmptyOp);
    }
    Ok(message)
}

/// Per-connection reassembly buffer.
///
/// Bytes are accumulated until a delimiter closes the frame, then the frame is
/// parsed and the buffer cleared whether parsing succeeded or not.
#[derive(Debug)]
pub struct FrameBuffer {
    pending: BytesMut,
    max_frame_len: usize,
    // Set after an overflow; bytes are skipped until the next delimiter
    discarding: bool,
    frames_decoded: u64,
    frames_dropped: u64,
}

impl FrameBuffer {
    /// Buffer bounded by [`DEFAULT_MAX_FRAME_LEN`]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Buffer that drops any frame longer than `max_frame_len` bytes
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { pending: BytesMut::new(), max_frame_len, discarding: false, frames_decoded: 0, frames_dropped: 0 }
    }

    /// Feeds one chunk read from the stream and returns the messages it completed
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut messages = Vec::new();

        if !chunk.contains(&DELIMITER) {
            if !self.discarding {
                self.pending.put_slice(chunk);
                self.check_overflow();
            }
            return messages;
        }

        let complete_tail = chunk.last() == Some(&DELIMITER);
        let segments: Vec<&[u8]> = chunk.split(|byte| *byte == DELIMITER).collect();
        let last = segments.len() - 1;

        for (i, segment) in segments.into_iter().enumerate() {
            let incomplete_tail = i == last && !complete_tail;

            if self.discarding {
                // The rest of an oversized frame ends at this delimiter
                if !incomplete_tail {
                    self.discarding = false;
                }
                continue;
            }

            if segment.is_empty() && self.pending.is_empty() {
                continue;
            }

            self.pending.put_slice(segment);

            if incomplete_tail {
                self.check_overflow();
                break;
            }

            if self.pending.len() > self.max_frame_len {
                self.drop_pending(IpcError::FrameTooLarge { length: self.pending.len(), max: self.max_frame_len });
                continue;
            }

            match decode(&self.pending) {
                Ok(message) => {
                    self.frames_decoded += 1;
                    messages.push(message);
                }
                Err(err) => {
                    warn!("Dropping malformed frame ({} bytes): {err}", self.pending.len());
                    self.frames_dropped += 1;
                }
            }
            self.pending.clear();
        }

        messages
    }

    fn check_overflow(&mut self) {
        if self.pending.len() > self.max_frame_len {
            self.drop_pending(IpcError::FrameTooLarge { length: self.pending.len(), max: self.max_frame_len });
            self.discarding = true;
        }
    }

    fn drop_pending(&mut self, err: IpcError) {
        warn!("Discarding pending frame: {err}");
        self.frames_dropped += 1;
        self.pending.clear();
    }

    /// Bytes of an unterminated frame currently held
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Frames decoded into messages so far
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Frames discarded as malformed or oversized
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
