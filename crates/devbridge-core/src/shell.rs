//! POSIX shell quoting for values spliced into device command lines.
//!
//! Every device command travels as one string that the device's `sh`
//! re-parses, so a path or package name must reach it as a single word.

/// Wraps `value` in single quotes, escaping embedded single quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Returns `value` unchanged when `sh` would already read it as one literal
/// word, otherwise [`shell_quote`]s it.
pub fn shell_word(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '@' | '+' | ',' | '='));
    if plain {
        value.to_string()
    } else {
        shell_quote(value)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("/sdcard/My Files"), "'/sdcard/My Files'");
    }

    #[test]
    fn test_shell_word_leaves_plain_paths_alone() {
        assert_eq!(shell_word("/sdcard/DCIM"), "/sdcard/DCIM");
        assert_eq!(shell_word("/data/local/tmp/app-1.2_b"), "/data/local/tmp/app-1.2_b");
    }

    #[test]
    fn test_shell_word_quotes_spaces_and_metacharacters() {
        assert_eq!(shell_word("/sdcard/My Files"), "'/sdcard/My Files'");
        assert_eq!(shell_word("/tmp/a;rm"), "'/tmp/a;rm'");
        assert_eq!(shell_word("$HOME"), "'$HOME'");
        assert_eq!(shell_word(""), "''");
    }
}
