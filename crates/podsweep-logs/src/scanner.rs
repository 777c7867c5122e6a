use std::sync::Arc;

use podsweep_types::{Finding, LogLine, PodRef};

use crate::parser::floor_char_boundary;
use crate::predicate::{ErrorPredicate, MarkerPredicate};

/// Longest reason kept on a finding, in bytes
const MAX_REASON_LEN: usize = 512;

/// Classifies log lines against an error predicate.
///
/// Matching is line-local and stateless, so one scanner can be shared across
/// pods and tasks.
#[derive(Clone, Debug)]
pub struct LogScanner {
    predicate: Arc<dyn ErrorPredicate>,
}

impl Default for LogScanner {
    fn default() -> Self {
        Self::new(MarkerPredicate::default())
    }
}

impl LogScanner {
    pub fn new(predicate: impl ErrorPredicate + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Classify one line. A line yields at most one finding however many
    /// markers it contains.
    pub fn inspect(&self, line: &LogLine, pod: &PodRef) -> Option<Finding> {
        if !self.predicate.matches(&line.text) {
            return None;
        }
        Some(Finding {
            pod: pod.clone(),
            container: line.container.clone(),
            line_number: line.line_number,
            reason: reason(&line.text),
        })
    }

    /// Classify a finite sequence of lines from `pod`
    pub fn scan<I>(&self, lines: I, pod: &PodRef) -> Vec<Finding>
    where
        I: IntoIterator<Item = LogLine>,
    {
        lines
            .into_iter()
            .filter_map(|line| self.inspect(&line, pod))
            .collect()
    }
}

fn reason(text: &str) -> String {
    let trimmed = text.trim();
    let end = floor_char_boundary(trimmed, MAX_REASON_LEN);
    if end < trimmed.len() {
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}
