//! Import statistics tracking.
//!
//! Counts what happened to each message of a batch import so a run over a
//! whole archive can be summarised in one line.

use std::fmt;

use serde::Serialize;

use super::outcome::Outcome;

/// Statistics for one or more ingested messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// Messages read from the source
    pub messages: usize,
    /// Patches created
    pub patches: usize,
    /// Comments created (including a new patch's own comment)
    pub comments: usize,
    /// Messages already ingested
    pub duplicates: usize,
    /// Messages that could not be parsed
    pub dropped: usize,
    /// Messages deliberately skipped
    pub ignored: usize,
    /// Messages that hit an unexpected failure
    pub errors: usize,
}

impl ImportStats {
    /// Account for the outcome of one message.
    pub fn record(&mut self, outcome: &Outcome) {
        self.messages += 1;
        match outcome {
            Outcome::Accepted { patch, comment } => {
                self.patches += usize::from(patch.is_some());
                self.comments += usize::from(comment.is_some());
            }
            Outcome::Duplicate { .. } => self.duplicates += 1,
            Outcome::Dropped(_) => self.dropped += 1,
            Outcome::Ignored(_) => self.ignored += 1,
        }
    }

    /// Account for a message whose ingestion failed outright.
    pub fn record_error(&mut self) {
        self.messages += 1;
        self.errors += 1;
    }
}

impl fmt::Display for ImportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} messages: {} patches, {} comments, {} duplicates, {} dropped, {} ignored, {} errors",
            self.messages,
            self.patches,
            self.comments,
            self.duplicates,
            self.dropped,
            self.ignored,
            self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::outcome::IgnoreReason;

    #[test]
    fn test_record() {
        let mut stats = ImportStats::default();
        stats.record(&Outcome::Duplicate {
            msgid: "<a@x>".to_string(),
        });
        stats.record(&Outcome::Ignored(IgnoreReason::NoProject));
        stats.record(&Outcome::Accepted {
            patch: None,
            comment: None,
        });
        stats.record_error();

        assert_eq!(stats.messages, 4);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.patches, 0);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_display() {
        let stats = ImportStats {
            messages: 3,
            patches: 1,
            comments: 2,
            ..Default::default()
        };
        assert_eq!(
            stats.to_string(),
            "processed 3 messages: 1 patches, 2 comments, 0 duplicates, 0 dropped, 0 ignored, 0 errors"
        );
    }
}
