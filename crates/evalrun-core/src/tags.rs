//! Newtype wrappers for labels that travel with log lines and samples.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the tag column in the session log.
pub const TAG_WIDTH: usize = 4;

/// Short label identifying which process a log line came from.
///
/// Rendered left-aligned and padded to [`TAG_WIDTH`] columns so that the
/// interleaved log stays readable. Longer labels are rendered as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceTag(String);

impl SourceTag {
    /// Create a new SourceTag from a string.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fixed-width rendering used as the log line prefix.
    pub fn padded(&self) -> String {
        format!("{:<width$}", self.0, width = TAG_WIDTH)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Kind of timing sample, named by its short slug (e.g. `matching`).
///
/// The slug is used in export file names, so it should stay filesystem safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKind(String);

impl MetricKind {
    /// Create a new MetricKind from a slug.
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    /// Time spent matching policies and resolving conflicts.
    pub fn policy_matching() -> Self {
        Self::new("matching")
    }

    /// Time spent loading candidate policies from the database.
    pub fn get_policies() -> Self {
        Self::new("get-policies")
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MetricKind {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_tag_is_padded() {
        assert_eq!(SourceTag::new("CC").padded(), "CC  ");
        assert_eq!(SourceTag::new("EVAL").padded(), "EVAL");
    }

    #[test]
    fn test_long_tag_is_not_truncated() {
        assert_eq!(SourceTag::new("WORKER").padded(), "WORKER");
    }

    #[test]
    fn test_metric_kind_display() {
        assert_eq!(format!("{}", MetricKind::get_policies()), "get-policies");
    }
}
