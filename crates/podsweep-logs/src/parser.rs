use chrono::DateTime;
use serde_json::Value;

use podsweep_types::LogLevel;

/// Extracts the severity of a raw log line
pub struct LogParser;

impl LogParser {
    /// Detect the level of a line, from JSON fields or plain-text markers
    pub fn level(raw: &str) -> Option<LogLevel> {
        let content = Self::strip_k8s_timestamp(raw);
        match Self::try_parse_json(content) {
            Some(fields) => Self::extract_level_from_json(&fields),
            None => Self::extract_level_from_text(content),
        }
    }

    /// Drop a leading RFC3339 timestamp (format: 2024-01-15T10:30:00.123456789Z)
    fn strip_k8s_timestamp(raw: &str) -> &str {
        if raw.len() >= 20 {
            // Use get() to safely handle UTF-8 multi-byte chars at boundaries
            let search_end = floor_char_boundary(raw, 35.min(raw.len()));
            if let Some(z_pos) = raw.get(..search_end).and_then(|s| s.find('Z')) {
                if DateTime::parse_from_rfc3339(&raw[..=z_pos]).is_ok() {
                    return raw[z_pos + 1..].trim_start();
                }
            }
        }
        raw
    }

    fn try_parse_json(content: &str) -> Option<serde_json::Map<String, Value>> {
        let trimmed = content.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        match serde_json::from_str(trimmed).ok()? {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    fn extract_level_from_json(fields: &serde_json::Map<String, Value>) -> Option<LogLevel> {
        let level_fields = [
            "level",
            "lvl",
            "severity",
            "log.level",
            "loglevel",
            "log_level",
            "Level",
            "LEVEL",
        ];

        for field in level_fields {
            match fields.get(field) {
                Some(Value::String(s)) => return LogLevel::parse(s),
                // Numeric levels follow the bunyan/pino convention
                Some(Value::Number(n)) => {
                    if let Some(num) = n.as_u64() {
                        return Some(match num {
                            0..=10 => LogLevel::Trace,
                            11..=20 => LogLevel::Debug,
                            21..=30 => LogLevel::Info,
                            31..=40 => LogLevel::Warn,
                            41..=50 => LogLevel::Error,
                            _ => LogLevel::Fatal,
                        });
                    }
                }
                _ => {}
            }
        }

        None
    }

    fn extract_level_from_text(content: &str) -> Option<LogLevel> {
        let upper = content.to_uppercase();

        let bracket_patterns = [
            ("[FATAL]", LogLevel::Fatal),
            ("[PANIC]", LogLevel::Fatal),
            ("[CRITICAL]", LogLevel::Fatal),
            ("[ERROR]", LogLevel::Error),
            ("[ERR]", LogLevel::Error),
            ("[WARN]", LogLevel::Warn),
            ("[WARNING]", LogLevel::Warn),
            ("[INFO]", LogLevel::Info),
            ("[DEBUG]", LogLevel::Debug),
            ("[TRACE]", LogLevel::Trace),
        ];

        let colon_patterns = [
            ("FATAL:", LogLevel::Fatal),
            ("PANIC:", LogLevel::Fatal),
            ("ERROR:", LogLevel::Error),
            ("ERR:", LogLevel::Error),
            ("WARNING:", LogLevel::Warn),
            ("WARN:", LogLevel::Warn),
            ("INFO:", LogLevel::Info),
            ("DEBUG:", LogLevel::Debug),
            ("TRACE:", LogLevel::Trace),
        ];

        let spaced_patterns = [
            (" FATAL ", LogLevel::Fatal),
            (" PANIC ", LogLevel::Fatal),
            (" ERROR ", LogLevel::Error),
            (" WARN ", LogLevel::Warn),
            (" WARNING ", LogLevel::Warn),
            (" INFO ", LogLevel::Info),
            (" DEBUG ", LogLevel::Debug),
            (" TRACE ", LogLevel::Trace),
        ];

        for patterns in [&bracket_patterns[..], &colon_patterns[..], &spaced_patterns[..]] {
            if let Some((_, level)) = patterns.iter().find(|(p, _)| upper.contains(p)) {
                return Some(*level);
            }
        }

        let start_patterns = [
            ("FATAL", LogLevel::Fatal),
            ("PANIC", LogLevel::Fatal),
            ("ERROR", LogLevel::Error),
            ("ERR", LogLevel::Error),
            ("WARN", LogLevel::Warn),
            ("INFO", LogLevel::Info),
            ("DEBUG", LogLevel::Debug),
            ("TRACE", LogLevel::Trace),
        ];

        let trimmed_upper = upper.trim_start();
        start_patterns
            .iter()
            .find(|(p, _)| trimmed_upper.starts_with(p))
            .map(|(_, level)| *level)
    }
}

/// Find the largest valid char boundary <= the given byte index
pub(crate) fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
