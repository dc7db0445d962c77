//! DBGP transport framing: length-prefixed, NUL-terminated messages.
//!
//! The engine sends every message as `<length>\0<payload>\0`, where
//! `length` is the decimal byte count of `payload`. Chunks delivered by the
//! transport do not line up with message boundaries, so [`FrameReader`]
//! keeps its reassembly state between calls to [`FrameReader::feed`].

use crate::error::DbgpError;

/// Separator and terminator byte of the wire format.
pub const NUL: u8 = 0;

/// Upper bound on the number of digits accepted in a length header.
const MAX_LENGTH_DIGITS: usize = 10;

/// Encode a payload into a length-prefixed frame, as the engine sends it.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let header = payload.len().to_string();
    let mut buf = Vec::with_capacity(header.len() + payload.len() + 2);
    buf.extend_from_slice(header.as_bytes());
    buf.push(NUL);
    buf.extend_from_slice(payload.as_bytes());
    buf.push(NUL);
    buf
}

/// Where the reader is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Accumulating decimal digits of the length header.
    Length { value: usize, digits: usize },
    /// Accumulating payload bytes until the terminator.
    Payload { expected: usize },
    /// Skipping the remainder of a broken frame up to its terminator.
    Discard,
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Length {
            value: 0,
            digits: 0,
        }
    }
}

/// Reassembles complete messages from arbitrarily split byte chunks.
///
/// One reader belongs to one connection; its state is never shared.
#[derive(Debug, Default)]
pub struct FrameReader {
    state: ReadState,
    payload: Vec<u8>,
}

impl FrameReader {
    /// Create a reader waiting for the first length header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the reader sits exactly on a frame boundary.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::default()
    }

    /// Feed a chunk of bytes and iterate over the messages it completes.
    ///
    /// The iterator is lazy: input is only consumed as it is advanced, and
    /// bytes left unconsumed when it is dropped are lost. Drain it.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Frames<'a> {
        Frames {
            reader: self,
            input: chunk,
            pos: 0,
        }
    }

    /// Consume input from `input[*pos..]` until one message (or error)
    /// completes, or the input runs out.
    fn advance(&mut self, input: &[u8], pos: &mut usize) -> Option<Result<String, DbgpError>> {
        while *pos < input.len() {
            match self.state {
                ReadState::Length { value, digits } => {
                    let byte = input[*pos];
                    *pos += 1;
                    if byte == NUL {
                        if digits == 0 {
                            self.state = ReadState::default();
                            return Some(Err(DbgpError::Framing(
                                "empty length header".into(),
                            )));
                        }
                        self.payload.clear();
                        self.state = ReadState::Payload { expected: value };
                        continue;
                    }
                    if !byte.is_ascii_digit() || digits == MAX_LENGTH_DIGITS {
                        self.state = ReadState::Discard;
                        return Some(Err(DbgpError::Framing(format!(
                            "invalid length header byte 0x{byte:02x}"
                        ))));
                    }
                    self.state = ReadState::Length {
                        value: value.saturating_mul(10) + usize::from(byte - b'0'),
                        digits: digits + 1,
                    };
                }
                ReadState::Payload { expected } => {
                    let rest = &input[*pos..];
                    let room = expected.saturating_sub(self.payload.len());
                    match rest.iter().position(|&b| b == NUL) {
                        Some(end) if end <= room => {
                            self.payload.extend_from_slice(&rest[..end]);
                            *pos += end + 1;
                            self.state = ReadState::default();
                            let received = self.payload.len();
                            let payload = std::mem::take(&mut self.payload);
                            if received != expected {
                                return Some(Err(mismatch(expected, received)));
                            }
                            return Some(String::from_utf8(payload).map_err(|e| {
                                DbgpError::Framing(format!("payload is not valid UTF-8: {e}"))
                            }));
                        }
                        _ if rest.len() > room => {
                            // No terminator where the header promised one.
                            let received = self.payload.len()
                                + rest.iter().position(|&b| b == NUL).unwrap_or(rest.len());
                            *pos += room;
                            self.payload.clear();
                            self.state = ReadState::Discard;
                            return Some(Err(mismatch(expected, received)));
                        }
                        _ => {
                            self.payload.extend_from_slice(rest);
                            *pos = input.len();
                        }
                    }
                }
                ReadState::Discard => match input[*pos..].iter().position(|&b| b == NUL) {
                    Some(end) => {
                        *pos += end + 1;
                        self.state = ReadState::default();
                    }
                    None => *pos = input.len(),
                },
            }
        }
        None
    }
}

fn mismatch(expected: usize, received: usize) -> DbgpError {
    DbgpError::Framing(format!(
        "data length does not match header: expected {expected} bytes, got {received}"
    ))
}

/// Lazy sequence of messages completed by one chunk.
///
/// Created by [`FrameReader::feed`].
#[derive(Debug)]
pub struct Frames<'a> {
    reader: &'a mut FrameReader,
    input: &'a [u8],
    pos: usize,
}

impl Iterator for Frames<'_> {
    type Item = Result<String, DbgpError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.advance(self.input, &mut self.pos)
    }
}
