use crate::types::{OutputLine, Stream};

/// Receives child output incrementally, in arrival order.
///
/// Called from the runner's drain loop while the child is still running, so
/// implementations should not block for long.
pub trait OutputSink: Send {
    fn line(&mut self, stream: Stream, text: &str);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl OutputSink for DiscardSink {
    fn line(&mut self, _stream: Stream, _text: &str) {}
}

/// Collects lines in memory.
impl OutputSink for Vec<OutputLine> {
    fn line(&mut self, stream: Stream, text: &str) {
        self.push(OutputLine {
            stream,
            text: text.to_string(),
        });
    }
}
