//! Bounded capture of combined child output.
//!
//! A job may print far more than is worth keeping in memory. The buffer keeps
//! the first half of the budget verbatim and a rolling window over the last
//! half, so both the invocation context and the final result survive:
//!
//! ```text
//! <first max_chars/2 chars>
//!
//! ... [OUTPUT TRUNCATED: N chars omitted] ...
//!
//! <last max_chars/2 chars>
//! ```
//!
//! Counting is done in characters, never bytes, so multi-byte sequences are
//! never split.

use std::collections::VecDeque;

/// Default maximum characters retained (30 000).
pub const DEFAULT_MAX_CHARS: usize = 30_000;

#[derive(Debug)]
pub struct OutputBuffer {
    head: String,
    head_chars: usize,
    head_cap: usize,
    tail: VecDeque<char>,
    tail_cap: usize,
    omitted: usize,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        let head_cap = max_chars / 2;
        Self {
            head: String::new(),
            head_chars: 0,
            head_cap,
            tail: VecDeque::new(),
            tail_cap: max_chars - head_cap,
            omitted: 0,
        }
    }

    pub fn push(&mut self, text: &str) {
        for c in text.chars() {
            if self.head_chars < self.head_cap {
                self.head.push(c);
                self.head_chars += 1;
                continue;
            }
            self.tail.push_back(c);
            if self.tail.len() > self.tail_cap {
                self.tail.pop_front();
                self.omitted += 1;
            }
        }
    }

    pub fn push_line(&mut self, line: &str) {
        self.push(line);
        self.push("\n");
    }

    pub fn finish(self) -> String {
        let tail: String = self.tail.into_iter().collect();
        if self.omitted == 0 {
            return self.head + &tail;
        }
        format!(
            "{}\n\n... [OUTPUT TRUNCATED: {} chars omitted] ...\n\n{tail}",
            self.head, self.omitted
        )
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}
