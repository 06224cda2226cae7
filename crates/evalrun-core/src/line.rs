//! Tagged output lines flowing from stream readers into the session log.

use serde::{Deserialize, Serialize};

use crate::SourceTag;

/// One line of worker (or harness) output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Which process produced the line.
    pub tag: SourceTag,
    /// Raw text, without the trailing newline.
    pub text: String,
    /// Session-wide arrival sequence number.
    pub seq: u64,
}

impl LogLine {
    /// Create a new log line.
    pub fn new(tag: SourceTag, text: impl Into<String>, seq: u64) -> Self {
        Self {
            tag,
            text: text.into(),
            seq,
        }
    }

    /// Render as it appears in the session log: `"{tag:<4}| {text}\n"`.
    pub fn render(&self) -> String {
        format!("{}| {}\n", self.tag.padded(), self.text.trim_end_matches(['\r', '\n']))
    }
}
