//! Log capture types: entries, the filter predicate, and the ring buffer.
//!
//! # Filter semantics
//!
//! A [`LogFilter`] is conjunctive.  An entry matches only when *every*
//! dimension the filter specifies matches:
//!
//! | Dimension | Rule                                   |
//! |-----------|----------------------------------------|
//! | `levels`  | entry level is one of the listed levels |
//! | `tag`     | case-insensitive substring of the tag   |
//! | `text`    | case-insensitive substring of the message |
//!
//! An absent filter, or an absent dimension, always matches.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{DeviceId, Platform, SessionInfo};

/// Maximum number of entries retained per log session.
pub const LOG_BUFFER_CAPACITY: usize = 10_000;

/// Severity of a log entry.
///
/// Level matching is an exact enum comparison, so it is case-sensitive on the
/// wire: `"error"` deserialises, `"ERROR"` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Maps an Android logcat priority letter (`V D I W E F`).
    ///
    /// `S` (silent) and `A` (assert) are treated as fatal.
    pub fn from_android_priority(letter: char) -> Option<Self> {
        match letter {
            'V' => Some(LogLevel::Verbose),
            'D' => Some(LogLevel::Debug),
            'I' => Some(LogLevel::Info),
            'W' => Some(LogLevel::Warn),
            'E' => Some(LogLevel::Error),
            'F' | 'A' | 'S' => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Maps an iOS unified-logging level label.  Unknown labels become `Info`.
    pub fn from_ios_label(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "error" => LogLevel::Error,
            "fault" | "critical" => LogLevel::Fatal,
            "warning" | "warn" => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
    pub device_id: DeviceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Predicate applied to log entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<LogLevel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl LogFilter {
    pub fn with_levels(mut self, levels: impl IntoIterator<Item = LogLevel>) -> Self {
        self.levels = Some(levels.into_iter().collect());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Returns `true` when every specified dimension matches `entry`.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(levels) = &self.levels {
            if !levels.contains(&entry.level) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !contains_ignore_case(&entry.tag, tag) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !contains_ignore_case(&entry.message, text) {
                return false;
            }
        }
        true
    }
}

/// Applies an optional filter; `None` matches everything.
pub fn matches_filter(entry: &LogEntry, filter: Option<&LogFilter>) -> bool {
    filter.map_or(true, |f| f.matches(entry))
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Fixed-capacity FIFO store of log entries.
///
/// Pushing onto a full buffer evicts the oldest entry first, so memory stays
/// bounded no matter how long a capture runs.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_BUFFER_CAPACITY)
    }
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Appends `entry`, evicting the oldest entry if the buffer is full.
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Copies out the entries matching `filter`, oldest first.
    pub fn filtered(&self, filter: Option<&LogFilter>) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|entry| matches_filter(entry, filter))
            .cloned()
            .collect()
    }
}

/// A log-streaming session on one device.
#[derive(Debug, Clone)]
pub struct LogSession {
    pub info: SessionInfo,
    pub filter: Option<LogFilter>,
    pub buffer: LogBuffer,
}

impl LogSession {
    pub fn new(
        device_id: impl Into<DeviceId>,
        platform: Platform,
        filter: Option<LogFilter>,
        capacity: usize,
    ) -> Self {
        Self {
            info: SessionInfo::new("log", device_id, platform),
            filter,
            buffer: LogBuffer::with_capacity(capacity),
        }
    }

    /// Serializable view of the session without the buffered entries.
    pub fn summary(&self) -> LogSessionSummary {
        LogSessionSummary {
            info: self.info.clone(),
            filter: self.filter.clone(),
            buffered_entries: self.buffer.len(),
        }
    }
}

/// What `list-sessions` reports for a log session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSessionSummary {
    #[serde(flatten)]
    pub info: SessionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<LogFilter>,
    pub buffered_entries: usize,
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, tag: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level,
            tag: tag.to_string(),
            message: message.to_string(),
            device_id: "dev1".to_string(),
            pid: Some(1234),
        }
    }

    #[test]
    fn test_absent_filter_matches_everything() {
        let e = entry(LogLevel::Verbose, "Any", "thing");
        assert!(matches_filter(&e, None));
        assert!(matches_filter(&e, Some(&LogFilter::default())));
    }

    #[test]
    fn test_level_filter_requires_membership() {
        let filter = LogFilter::default().with_levels([LogLevel::Error, LogLevel::Fatal]);
        assert!(filter.matches(&entry(LogLevel::Error, "A", "x")));
        assert!(!filter.matches(&entry(LogLevel::Warn, "A", "x")));
    }

    #[test]
    fn test_tag_filter_is_case_insensitive_substring() {
        let filter = LogFilter::default().with_tag("activitymanager");
        assert!(filter.matches(&entry(LogLevel::Info, "ActivityManager", "x")));
        assert!(!filter.matches(&entry(LogLevel::Info, "PackageManager", "x")));
    }

    #[test]
    fn test_text_filter_is_case_insensitive_substring() {
        let filter = LogFilter::default().with_text("CRASH");
        assert!(filter.matches(&entry(LogLevel::Info, "App", "unexpected crash in main")));
    }

    #[test]
    fn test_filter_is_conjunctive_matching_tag_but_wrong_level_fails() {
        // Arrange: both level and tag specified
        let filter = LogFilter::default()
            .with_levels([LogLevel::Error])
            .with_tag("ActivityManager");

        // Act: tag matches, level does not
        let result = filter.matches(&entry(LogLevel::Info, "ActivityManager", "started"));

        // Assert
        assert!(!result);
    }

    #[test]
    fn test_level_deserialization_is_case_sensitive() {
        assert!(serde_json::from_str::<LogLevel>("\"error\"").is_ok());
        assert!(serde_json::from_str::<LogLevel>("\"ERROR\"").is_err());
    }

    #[test]
    fn test_android_priority_letters_map_to_levels() {
        assert_eq!(LogLevel::from_android_priority('W'), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_android_priority('F'), Some(LogLevel::Fatal));
        assert_eq!(LogLevel::from_android_priority('x'), None);
    }

    #[test]
    fn test_ios_labels_map_to_levels() {
        assert_eq!(LogLevel::from_ios_label("Fault"), LogLevel::Fatal);
        assert_eq!(LogLevel::from_ios_label("Notice"), LogLevel::Info);
    }

    #[test]
    fn test_buffer_never_exceeds_capacity() {
        // Arrange
        let mut buffer = LogBuffer::default();

        // Act: ingest more than the capacity
        for i in 0..(LOG_BUFFER_CAPACITY + 250) {
            buffer.push(entry(LogLevel::Info, "T", &i.to_string()));
        }

        // Assert
        assert_eq!(buffer.len(), LOG_BUFFER_CAPACITY);
    }

    #[test]
    fn test_buffer_evicts_oldest_first() {
        let mut buffer = LogBuffer::with_capacity(3);
        for i in 0..5 {
            buffer.push(entry(LogLevel::Info, "T", &i.to_string()));
        }
        let messages: Vec<&str> = buffer.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_buffer_filtered_does_not_mutate() {
        let mut buffer = LogBuffer::with_capacity(10);
        buffer.push(entry(LogLevel::Error, "A", "boom"));
        buffer.push(entry(LogLevel::Info, "B", "fine"));

        let errors = buffer.filtered(Some(&LogFilter::default().with_levels([LogLevel::Error])));

        assert_eq!(errors.len(), 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_filter_json_accepts_partial_object() {
        let filter: LogFilter = serde_json::from_str(r#"{"tag":"Zygote"}"#).unwrap();
        assert_eq!(filter.tag.as_deref(), Some("Zygote"));
        assert!(filter.levels.is_none());
    }

    #[test]
    fn test_session_summary_reports_buffered_count() {
        let mut session = LogSession::new("dev1", Platform::Android, None, 100);
        session.buffer.push(entry(LogLevel::Info, "T", "m"));
        let summary = serde_json::to_value(session.summary()).unwrap();
        assert_eq!(summary["bufferedEntries"], 1);
        assert_eq!(summary["platform"], "android");
    }
}
