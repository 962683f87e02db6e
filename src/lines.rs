//! Reassemble newline-delimited text lines from arbitrarily chunked bytes.
//!
//! Child output arrives in reads of whatever size the pipe hands back, so a
//! line can be split across chunks (or a chunk can hold several lines). The
//! assembler keeps the trailing partial line until its `\n` arrives.
//!
//! Lines that are not valid UTF-8 are dropped. There is no length limit on a
//! pending line.

/// Buffers raw bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes, without terminators.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            let line = if self.buf.is_empty() {
                head.to_vec()
            } else {
                let mut joined = std::mem::take(&mut self.buf);
                joined.extend_from_slice(head);
                joined
            };

            if let Ok(text) = String::from_utf8(line) {
                lines.push(text);
            }
        }

        self.buf.extend_from_slice(rest);
        lines
    }

    /// Bytes of the retained partial line.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Drain the partial line, e.g. once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        String::from_utf8(std::mem::take(&mut self.buf)).ok()
    }
}
