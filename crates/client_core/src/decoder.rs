//! Incremental byte-to-line decoding for the chat stream body.
//!
//! Transport chunks carry no framing guarantees: a chunk may end in the middle
//! of a line or in the middle of a UTF-8 sequence. Both are held back until the
//! next chunk completes them.

use std::str;

#[derive(Debug, Default)]
pub struct LineDecoder {
    pending_bytes: Vec<u8>,
    line_buf: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every line it completed, without
    /// terminators. A trailing `\r` is stripped from each line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending_bytes.extend_from_slice(chunk);
        self.decode_pending();

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.line_buf.find('\n') {
            let line = self.line_buf[..newline_pos]
                .trim_end_matches('\r')
                .to_string();
            self.line_buf.drain(..=newline_pos);
            lines.push(line);
        }
        lines
    }

    /// Flushes whatever is left once the transport has ended. Incomplete
    /// UTF-8 at the very end is replaced rather than dropped.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending_bytes.is_empty() {
            let rest = std::mem::take(&mut self.pending_bytes);
            self.line_buf.push_str(&String::from_utf8_lossy(&rest));
        }
        let rest = std::mem::take(&mut self.line_buf);
        let rest = rest.trim_end_matches('\r');
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Bytes or characters received but not yet part of a complete line.
    pub fn has_partial(&self) -> bool {
        !self.pending_bytes.is_empty() || !self.line_buf.is_empty()
    }

    fn decode_pending(&mut self) {
        let mut consumed = 0;
        loop {
            match str::from_utf8(&self.pending_bytes[consumed..]) {
                Ok(valid) => {
                    self.line_buf.push_str(valid);
                    consumed = self.pending_bytes.len();
                    break;
                }
                Err(error) => {
                    let valid_up_to = consumed + error.valid_up_to();
                    if let Ok(valid) = str::from_utf8(&self.pending_bytes[consumed..valid_up_to]) {
                        self.line_buf.push_str(valid);
                    }
                    match error.error_len() {
                        Some(invalid_len) => {
                            self.line_buf.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + invalid_len;
                        }
                        // Sequence cut by the chunk boundary; wait for the rest.
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending_bytes.drain(..consumed);
    }
}

#[cfg(test)]
#[path = "tests/decoder_tests.rs"]
mod tests;
