//! Splitting raw pipe chunks into output lines.

/// Longest line handed to a sink in one piece, in bytes. Longer runs without
/// a newline are cut at this length.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reassembles lines from arbitrarily sized chunks of one stream.
///
/// At most `max_line_bytes` plus one chunk is ever held, however long the
/// child goes without writing a newline.
#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl LineSplitter {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Append `bytes` and return every line they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            lines.push(clean_line(&self.pending[start..=start + pos]));
            start += pos + 1;
        }
        self.pending.drain(..start);

        while self.pending.len() >= self.max_line_bytes {
            let rest = self.pending.split_off(self.max_line_bytes);
            lines.push(clean_line(&self.pending));
            self.pending = rest;
        }
        lines
    }

    /// Hand out whatever is buffered without a terminating newline.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(clean_line(&raw))
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new(MAX_LINE_BYTES)
    }
}

/// Strip the line terminator and ANSI escapes, then decode lossily.
fn clean_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let clean = strip_ansi_escapes::strip(&raw[..end]);
    String::from_utf8_lossy(&clean).into_owned()
}
