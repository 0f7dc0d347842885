use std::fmt;
use std::io;

use thiserror::Error;

/// Stage of [`crate::PendingFileCompleter::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Deleting,
    Renaming,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Deleting => "deleting",
            Stage::Renaming => "renaming",
        })
    }
}

/// Aggregate failure of one completion stage, raised after every staged item
/// of the stage was attempted.
#[derive(Debug, Error)]
#[error("{failures} failures ({percent:.1}%) while {stage} pending files")]
pub struct CompleteError {
    pub stage: Stage,
    pub failures: usize,
    pub pending: usize,
    pub percent: f64,
    /// First failure encountered.
    #[source]
    pub source: io::Error,
}

impl CompleteError {
    pub(crate) fn new(stage: Stage, failures: usize, pending: usize, source: io::Error) -> Self {
        let percent = if pending == 0 {
            0.0
        } else {
            100.0 * failures as f64 / pending as f64
        };
        Self {
            stage,
            failures,
            pending,
            percent,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_reports_count_and_percentage() {
        let err = CompleteError::new(Stage::Deleting, 1, 3, io::Error::other("busy"));
        assert_eq!(
            err.to_string(),
            "1 failures (33.3%) while deleting pending files"
        );
        assert_eq!(err.source.to_string(), "busy");
    }
}
