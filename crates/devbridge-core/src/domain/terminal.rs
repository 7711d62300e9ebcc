//! Terminal session types.
//!
//! A terminal session is a logical remote shell: each command is executed as
//! `cd <workingDirectory> && <command>` on the device, so the "shell" state
//! that survives between commands (working directory, environment, history)
//! lives here on the bridge side rather than in a long-lived device process.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{DeviceId, Platform, SessionInfo};
use crate::shell::shell_word;

/// Maximum number of characters carried by a single `output` event.
pub const OUTPUT_CHUNK_SIZE: usize = 1024;

/// Exit code recorded for a command whose result arrived after an interrupt.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Which output stream a chunk of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// The outcome of one command execution.
///
/// A non-zero `exit_code` is data, not an error: the reply that carries a
/// `CommandResult` is still `success: true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock execution time in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl CommandResult {
    /// A synthetic failed result for an executor error.
    pub fn failure(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message.into(),
            duration_ms,
        }
    }
}

/// One line of a terminal session's command history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandHistoryEntry {
    pub command: String,
    pub timestamp: DateTime<Utc>,
    pub exit_code: i32,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

/// A remote shell session on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub shell: String,
    pub working_directory: String,
    pub environment: BTreeMap<String, String>,
    pub history: Vec<CommandHistoryEntry>,
}

impl TerminalSession {
    /// Creates an active session with the platform's default shell and
    /// working directory.
    pub fn new(device_id: impl Into<DeviceId>, platform: Platform) -> Self {
        let working_directory = platform.default_working_directory().to_string();
        let mut environment = BTreeMap::new();
        environment.insert("HOME".to_string(), working_directory.clone());
        environment.insert("TERM".to_string(), "xterm-256color".to_string());

        Self {
            info: SessionInfo::new("term", device_id, platform),
            shell: platform.default_shell().to_string(),
            working_directory,
            environment,
            history: Vec::new(),
        }
    }

    /// The command line actually sent to the device for `command`.
    pub fn wrap_command(&self, command: &str) -> String {
        format!("cd {} && {}", shell_word(&self.working_directory), command)
    }

    /// Appends a history entry for a finished command.
    pub fn record(&mut self, command: &str, result: &CommandResult) {
        self.history.push(CommandHistoryEntry {
            command: command.to_string(),
            timestamp: Utc::now(),
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
        });
    }
}

/// Splits `text` into slices of at most [`OUTPUT_CHUNK_SIZE`] characters.
///
/// Slicing is done on character boundaries so multi-byte UTF-8 output is
/// never cut mid-codepoint.  Empty input yields no chunks.
pub fn chunk_output(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == OUTPUT_CHUNK_SIZE {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Resolves `target` against `cwd` using POSIX path rules.
///
/// Absolute targets replace `cwd`; `.` and empty segments are dropped and `..`
/// pops one segment (never above `/`).  The result is always absolute and has
/// no trailing slash except for the root itself.
pub fn resolve_path(cwd: &str, target: &str) -> String {
    let joined = if target.starts_with('/') {
        target.to_string()
    } else {
        format!("{cwd}/{target}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    format!("/{}", parts.join("/"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_android_session_starts_in_sdcard() {
        let session = TerminalSession::new("emulator-5554", Platform::Android);
        assert_eq!(session.working_directory, "/sdcard");
        assert_eq!(session.shell, "/system/bin/sh");
        assert!(session.info.is_active);
        assert!(session.history.is_empty());
    }

    #[test]
    fn test_new_ios_session_starts_in_var_mobile() {
        let session = TerminalSession::new("00008030-001", Platform::Ios);
        assert_eq!(session.working_directory, "/var/mobile");
    }

    #[test]
    fn test_wrap_command_prefixes_cd() {
        let session = TerminalSession::new("dev1", Platform::Android);
        assert_eq!(session.wrap_command("ls"), "cd /sdcard && ls");
    }

    #[test]
    fn test_wrap_command_quotes_directory_with_spaces() {
        // Arrange
        let mut session = TerminalSession::new("dev1", Platform::Android);
        session.working_directory = "/sdcard/My Files".to_string();

        // Act
        let wrapped = session.wrap_command("ls -la");

        // Assert
        assert_eq!(wrapped, "cd '/sdcard/My Files' && ls -la");
    }

    #[test]
    fn test_record_appends_history_entry() {
        // Arrange
        let mut session = TerminalSession::new("dev1", Platform::Android);
        let result = CommandResult {
            exit_code: 2,
            stdout: String::new(),
            stderr: "nope".to_string(),
            duration_ms: 12,
        };

        // Act
        session.record("false", &result);

        // Assert
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].command, "false");
        assert_eq!(session.history[0].exit_code, 2);
        assert_eq!(session.history[0].duration_ms, 12);
    }

    #[test]
    fn test_command_result_serializes_duration_field() {
        let result = CommandResult {
            exit_code: 0,
            stdout: "hi\n".to_string(),
            stderr: String::new(),
            duration_ms: 5,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["exitCode"], 0);
        assert_eq!(value["duration"], 5);
    }

    #[test]
    fn test_chunk_output_empty_input_yields_no_chunks() {
        assert!(chunk_output("").is_empty());
    }

    #[test]
    fn test_chunk_output_splits_at_chunk_size() {
        // Arrange: two and a half chunks worth of text
        let text = "a".repeat(OUTPUT_CHUNK_SIZE * 2 + 10);

        // Act
        let chunks = chunk_output(&text);

        // Assert
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), OUTPUT_CHUNK_SIZE);
        assert_eq!(chunks[2].chars().count(), 10);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_output_respects_multibyte_characters() {
        let text = "é".repeat(OUTPUT_CHUNK_SIZE + 1);
        let chunks = chunk_output(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "é");
    }

    #[test]
    fn test_resolve_path_absolute_target_replaces_cwd() {
        assert_eq!(resolve_path("/sdcard", "/data/local/tmp"), "/data/local/tmp");
    }

    #[test]
    fn test_resolve_path_relative_target_is_joined() {
        assert_eq!(resolve_path("/sdcard", "Download"), "/sdcard/Download");
    }

    #[test]
    fn test_resolve_path_parent_segments_pop() {
        assert_eq!(resolve_path("/sdcard/Download", "../DCIM/./Camera"), "/sdcard/DCIM/Camera");
    }

    #[test]
    fn test_resolve_path_never_climbs_above_root() {
        assert_eq!(resolve_path("/sdcard", "../../.."), "/");
    }
}
