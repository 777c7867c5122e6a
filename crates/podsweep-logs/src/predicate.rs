use regex::Regex;
use std::fmt;
use thiserror::Error;

use podsweep_types::LogLevel;

use crate::parser::LogParser;

/// Marker used when nothing else is configured
pub const DEFAULT_MARKER: &str = "error";

/// Invalid predicate configuration
#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("error marker must not be empty")]
    EmptyMarker,

    #[error("invalid error pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Decides whether a single log line reports an error
pub trait ErrorPredicate: Send + Sync + fmt::Debug {
    fn matches(&self, line: &str) -> bool;
}

/// Case-insensitive substring match
#[derive(Clone, Debug)]
pub struct MarkerPredicate {
    marker: String,
}

impl MarkerPredicate {
    pub fn new(marker: &str) -> Result<Self, PredicateError> {
        if marker.is_empty() {
            return Err(PredicateError::EmptyMarker);
        }
        Ok(Self {
            marker: marker.to_lowercase(),
        })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl Default for MarkerPredicate {
    fn default() -> Self {
        Self {
            marker: DEFAULT_MARKER.to_string(),
        }
    }
}

impl ErrorPredicate for MarkerPredicate {
    fn matches(&self, line: &str) -> bool {
        line.to_lowercase().contains(&self.marker)
    }
}

/// Case-insensitive regular expression match
#[derive(Clone)]
pub struct RegexPredicate {
    regex: Regex,
    pattern: String,
}

impl RegexPredicate {
    pub fn new(pattern: &str) -> Result<Self, PredicateError> {
        if pattern.is_empty() {
            return Err(PredicateError::EmptyMarker);
        }
        // Prepend (?i) for case insensitive matching
        let regex = Regex::new(&format!("(?i){}", pattern))?;
        Ok(Self {
            regex,
            pattern: pattern.to_string(),
        })
    }
}

impl ErrorPredicate for RegexPredicate {
    fn matches(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

impl fmt::Debug for RegexPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegexPredicate")
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// Match lines whose parsed severity is at or above a threshold.
///
/// Works on structured JSON logs as well as common plain-text layouts.
/// Lines without a recognisable level never match.
#[derive(Clone, Copy, Debug)]
pub struct SeverityPredicate {
    threshold: LogLevel,
}

impl SeverityPredicate {
    pub fn new(threshold: LogLevel) -> Self {
        Self { threshold }
    }
}

impl Default for SeverityPredicate {
    fn default() -> Self {
        Self::new(LogLevel::Error)
    }
}

impl ErrorPredicate for SeverityPredicate {
    fn matches(&self, line: &str) -> bool {
        LogParser::level(line).is_some_and(|level| level >= self.threshold)
    }
}
