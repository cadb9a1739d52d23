use bytes::BytesMut;
use std::io;
use tokio_util::codec::Decoder;

use super::error::ClientError;
use crate::models::StreamEvent;

/// Splits a byte stream into text lines.
///
/// Splitting happens on raw `\n` bytes before any UTF-8 decoding, so a
/// multi-byte character cut across two reads is decoded only once whole.
/// A trailing `\r` is stripped from each line.
#[derive(Debug, Default)]
pub struct FrameLineCodec {
    /// Bytes already scanned for a newline
    next_index: usize,
}

impl FrameLineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn into_line(raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        String::from_utf8_lossy(raw).into_owned()
    }
}

impl Decoder for FrameLineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let read_to = buf.len();
        match buf[self.next_index..read_to].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline_index = self.next_index + offset;
                self.next_index = 0;
                let line = buf.split_to(newline_index + 1);
                Ok(Some(Self::into_line(&line)))
            }
            None => {
                self.next_index = read_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split_to(buf.len());
        Ok(Some(Self::into_line(&rest)))
    }
}

/// Growing read buffer plus line codec, owned by one read loop
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: FrameLineCodec,
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one network read and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        // Decoding from memory cannot fail
        while let Ok(Some(line)) = self.codec.decode(&mut self.buffer) {
            lines.push(line);
        }
        lines
    }

    /// End of body: the unterminated remainder, if it holds anything but whitespace
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.codec.decode_eof(&mut self.buffer).ok().flatten()?;
        (!rest.trim().is_empty()).then_some(rest)
    }
}

/// Parse one line of the event stream.
///
/// `None` for blank lines, `:` comments and JSON that does not match a known
/// frame. `Some(Err)` only when the payload is not JSON at all.
pub fn parse_frame(line: &str) -> Option<Result<StreamEvent, ClientError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }

    let payload = trimmed.strip_prefix("data:").map(str::trim).unwrap_or(trimmed);
    if payload.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(source) => {
            return Some(Err(ClientError::Frame {
                line: payload.to_string(),
                source,
            }));
        }
    };

    match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) if event.validate() => Some(Ok(event)),
        Ok(event) => {
            log::debug!("Dropping {} frame that failed validation", event.kind());
            None
        }
        Err(e) => {
            log::debug!("Dropping frame with unexpected shape: {}", e);
            None
        }
    }
}
