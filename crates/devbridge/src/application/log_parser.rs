//! Device log polling commands and line parsers.
//!
//! Log capture polls rather than streams: every tick runs a short,
//! non-blocking dump command through the device executor and parses its
//! output.
//!
//! | Platform | First poll                               | Later polls                                  |
//! |----------|------------------------------------------|----------------------------------------------|
//! | android  | `logcat -d -v threadtime -t <n>`         | `logcat -d -v threadtime -T '<last stamp>'`  |
//! | ios      | `log show --style syslog --last 2s`      | same                                         |
//!
//! Consecutive dumps overlap (`-T` is inclusive, and the iOS window is wider
//! than the poll period), and the overlap is always a run of lines at the end
//! of the previous dump repeated at the start of the next one.
//! [`PollCursor`] keeps the tail of the previous dump; the longest suffix of
//! it that the new dump starts with is skipped.  Identical lines are common
//! (same pid, tid and millisecond), so a repeated line further into the dump
//! is still new.
//!
//! Lines that do not match the platform format (`--------- beginning of
//! main`, wrapped continuation lines, tool banners) are dropped.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use regex::Regex;

use devbridge_core::{LogEntry, LogLevel, Platform};

/// `01-15 12:34:56.789  1234  5678 I ActivityManager: Start proc`
static ANDROID_THREADTIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3})\s+(\d+)\s+(\d+)\s+([VDIWEFAS])\s+(.*?)\s*: ?(.*)$",
    )
    .expect("Invalid ANDROID_THREADTIME regex")
});

/// `2024-01-15 12:34:56.789012-0800  localhost SpringBoard[58]: <Notice>: message`
///
/// The `<Level>:` marker is optional; lines without one are `info`.
static IOS_SYSLOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?[+-]\d{4})\s+\S+\s+([^\[\s]+)\[(\d+)(?::[0-9a-fx]+)?\]:?\s+(?:<(\w+)>:?\s*)?(.*)$",
    )
    .expect("Invalid IOS_SYSLOG regex")
});

/// Lookback window of each iOS poll.
pub const IOS_LOOKBACK: &str = "2s";

/// Raw lines of the previous dump kept for overlap detection.
pub const OVERLAP_LINES: usize = 2_000;

/// Where the previous poll of one session ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollCursor {
    /// Last non-empty raw lines of the previous dump, oldest first, at most
    /// [`OVERLAP_LINES`].
    pub tail: Vec<String>,
    /// Raw logcat timestamp (`MM-DD HH:MM:SS.mmm`) of the last parsed
    /// Android entry.
    pub last_stamp: Option<String>,
}

/// The dump command for the next poll.
pub fn poll_command(platform: Platform, cursor: &PollCursor, tail_lines: u32) -> String {
    match platform {
        Platform::Android => match &cursor.last_stamp {
            Some(stamp) => format!("logcat -d -v threadtime -T '{stamp}'"),
            None => format!("logcat -d -v threadtime -t {tail_lines}"),
        },
        Platform::Ios => format!("log show --style syslog --last {IOS_LOOKBACK}"),
    }
}

/// Parses one raw line, or `None` if it is not a log record.
pub fn parse_line(platform: Platform, line: &str, device_id: &str) -> Option<LogEntry> {
    match platform {
        Platform::Android => parse_android(line, device_id).map(|(entry, _)| entry),
        Platform::Ios => parse_ios(line, device_id),
    }
}

/// Parses a whole dump, skipping what the previous poll already delivered,
/// and advances `cursor`.
pub fn ingest_output(
    platform: Platform,
    output: &str,
    device_id: &str,
    cursor: &mut PollCursor,
) -> Vec<LogEntry> {
    let lines: Vec<&str> = output
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .collect();

    let start = overlap_len(&cursor.tail, &lines);

    let mut entries = Vec::new();
    for line in &lines[start..] {
        match platform {
            Platform::Android => {
                if let Some((entry, stamp)) = parse_android(line, device_id) {
                    cursor.last_stamp = Some(stamp);
                    entries.push(entry);
                }
            }
            Platform::Ios => {
                if let Some(entry) = parse_ios(line, device_id) {
                    entries.push(entry);
                }
            }
        }
    }

    if !lines.is_empty() {
        cursor.tail = if lines.len() >= OVERLAP_LINES {
            lines[lines.len() - OVERLAP_LINES..]
                .iter()
                .map(|l| (*l).to_string())
                .collect()
        } else {
            // A short dump may itself be entirely overlap, so the new tail
            // continues the old one.
            let mut tail = std::mem::take(&mut cursor.tail);
            tail.truncate(tail.len() - start.min(tail.len()));
            tail.extend(lines.iter().map(|l| (*l).to_string()));
            let excess = tail.len().saturating_sub(OVERLAP_LINES);
            tail.drain(..excess);
            tail
        };
    }
    entries
}

/// Number of leading `lines` already delivered by the previous dump.
///
/// This is the longest `k` such that the first `k` lines equal the last `k`
/// lines of `tail`.  When the tail is full and no such suffix exists, the
/// overlap may be longer than what was kept; the first place the whole tail
/// appears in `lines` then marks its end.
fn overlap_len(tail: &[String], lines: &[&str]) -> usize {
    let max = tail.len().min(lines.len());
    for k in (1..=max).rev() {
        let suffix = &tail[tail.len() - k..];
        if suffix.iter().zip(&lines[..k]).all(|(a, b)| a.as_str() == *b) {
            return k;
        }
    }

    if tail.len() == OVERLAP_LINES && lines.len() > tail.len() {
        if let Some(i) = lines
            .windows(tail.len())
            .position(|w| w.iter().zip(tail).all(|(a, b)| *a == b.as_str()))
        {
            return i + tail.len();
        }
    }
    0
}

fn parse_android(line: &str, device_id: &str) -> Option<(LogEntry, String)> {
    let caps = ANDROID_THREADTIME.captures(line)?;
    let stamp = caps.get(1)?.as_str();
    let level = LogLevel::from_android_priority(caps.get(4)?.as_str().chars().next()?)?;

    // threadtime stamps carry no year.
    let year = Utc::now().year();
    let timestamp = NaiveDateTime::parse_from_str(&format!("{year}-{stamp}"), "%Y-%m-%d %H:%M:%S%.3f")
        .ok()?
        .and_utc();

    let entry = LogEntry {
        timestamp,
        level,
        tag: caps.get(5)?.as_str().trim().to_string(),
        message: caps.get(6).map_or("", |m| m.as_str()).to_string(),
        device_id: device_id.to_string(),
        pid: caps.get(2)?.as_str().parse().ok(),
    };
    Some((entry, stamp.to_string()))
}

fn parse_ios(line: &str, device_id: &str) -> Option<LogEntry> {
    let caps = IOS_SYSLOG.captures(line)?;
    let timestamp = DateTime::parse_from_str(caps.get(1)?.as_str(), "%Y-%m-%d %H:%M:%S%.f%z")
        .ok()?
        .with_timezone(&Utc);
    let level = caps
        .get(4)
        .map_or(LogLevel::Info, |m| LogLevel::from_ios_label(m.as_str()));

    Some(LogEntry {
        timestamp,
        level,
        tag: caps.get(2)?.as_str().to_string(),
        message: caps.get(5).map_or("", |m| m.as_str()).to_string(),
        device_id: device_id.to_string(),
        pid: caps.get(3)?.as_str().parse().ok(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
