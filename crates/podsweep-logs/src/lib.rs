//! Log classification for podsweep
//!
//! This crate decides which pod log lines report errors. The predicate is
//! swappable: plain marker, regular expression or parsed severity.

mod parser;
mod predicate;
mod scanner;

pub use parser::LogParser;
pub use predicate::{
    DEFAULT_MARKER, ErrorPredicate, MarkerPredicate, PredicateError, RegexPredicate,
    SeverityPredicate,
};
pub use scanner::LogScanner;

// Re-export types used in our public API
pub use podsweep_types::{Finding, LogLevel, LogLine};
