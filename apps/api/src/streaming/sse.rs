//! Incremental `text/event-stream` decoder.
//!
//! Bytes arrive in arbitrary slices, so partial lines (and partial UTF-8
//! sequences) are buffered until their newline shows up. Every `data:` line
//! is one event payload; other fields and comment lines are ignored.

const DATA_FIELD: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a slice of bytes and returns the payloads of all lines it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(payload) = parse_line(&line[..line.len() - 1]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<String> {
    let decoded = String::from_utf8_lossy(raw);
    let line = decoded.strip_suffix('\r').unwrap_or(&decoded);

    let data = line.strip_prefix(DATA_FIELD)?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.is_empty() || data == DONE_SENTINEL {
        return None;
    }
    Some(data.to_string())
}
