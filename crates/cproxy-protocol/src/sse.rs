use bytes::Bytes;

/// Payload that ends an OpenAI-style event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const DATA_PREFIX: &str = "data:";

/// Upper bound on one buffered SSE line.
pub const DEFAULT_MAX_LINE_LEN: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sse line exceeds {limit} bytes without a newline")]
pub struct SseLineTooLong {
    pub limit: usize,
}

/// Splits an SSE byte stream into lines.
///
/// Bytes are buffered until a `\n` arrives, so multi-byte characters split
/// across network chunks are decoded intact. A trailing `\r` is removed.
#[derive(Debug)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no `\n`.
    scanned: usize,
    max_line_len: usize,
}

impl Default for SseLineDecoder {
    fn default() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_len,
        }
    }

    /// Appends `chunk` and moves every completed line into `lines`.
    ///
    /// Fails once the unterminated tail grows past the line limit; lines
    /// completed before that point are still delivered and the tail is dropped.
    pub fn push_bytes(
        &mut self,
        chunk: &[u8],
        lines: &mut Vec<String>,
    ) -> Result<(), SseLineTooLong> {
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|byte| *byte == b'\n') {
            let end = from + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line_len {
            self.buffer.clear();
            self.scanned = 0;
            return Err(SseLineTooLong {
                limit: self.max_line_len,
            });
        }
        Ok(())
    }

    /// Flushes a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Returns the trimmed payload of a `data:` line, `None` for any other line
/// (comments, `event:`/`id:` fields, blank separators).
pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX).map(str::trim)
}

pub fn encode_data(data: &str) -> Bytes {
    let mut out = String::with_capacity(data.len() + 8);
    out.push_str("data: ");
    out.push_str(data);
    out.push_str("\n\n");
    Bytes::from(out)
}

pub fn encode_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}
