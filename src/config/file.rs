//! `KEY=value` file source.
//!
//! Parsing is done by `dotenvy`: blank lines and `#` comments are ignored,
//! an optional `export ` prefix is accepted, single-quoted values are
//! literal, and double-quoted values support escapes and may span lines.
//! `$VAR` and `${VAR}` in unquoted or double-quoted values expand from the
//! process environment, then from keys assigned earlier in the file.
//! Nothing is written to the process environment.

use std::path::{Path, PathBuf};

use toml::{Table, Value};

use super::source::{key_path, merge_at_path};
use super::ConfigError;

/// Picks the file to load for a deployment label.
///
/// `<dir>/<base>.<label>` wins when the label is non-empty and that file
/// exists; otherwise `<dir>/<base>` is used, whether or not it exists.
pub fn select_path(dir: &Path, base: &str, label: &str) -> PathBuf {
    if !label.is_empty() {
        let labelled = dir.join(format!("{base}.{label}"));
        if labelled.exists() {
            return labelled;
        }
    }
    dir.join(base)
}

/// Loads and parses the file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load(path: &Path) -> Result<Option<Table>, ConfigError> {
    match read(path)? {
        Some(contents) => parse(&contents, path).map(Some),
        None => Ok(None),
    }
}

/// Reads the raw file contents, `Ok(None)` when missing.
pub fn read(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Parses file contents into a table of lower-cased keys and string values.
///
/// Dotted keys (`DB.HOST=...`) become nested tables.
pub fn parse(contents: &str, path: &Path) -> Result<Table, ConfigError> {
    let mut table = Table::new();

    for item in dotenvy::from_read_iter(contents.as_bytes()) {
        match item {
            Ok((key, value)) => merge_at_path(&mut table, &key_path(&key), Value::String(value)),
            Err(dotenvy::Error::LineParse(text, idx)) => {
                // The message never echoes the line, values may be secrets.
                return Err(ConfigError::ParseError {
                    path: path.to_path_buf(),
                    line: line_of(contents, &text),
                    reason: format!("invalid KEY=value syntax at position {idx}"),
                });
            }
            Err(dotenvy::Error::Io(source)) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                });
            }
            Err(other) => {
                return Err(ConfigError::ParseError {
                    path: path.to_path_buf(),
                    line: line_of(contents, ""),
                    reason: other.to_string(),
                });
            }
        }
    }

    Ok(table)
}

/// Rewrites `contents` so that `key` is assigned `value`.
///
/// Every existing assignment of the key (compared case-insensitively) is
/// replaced in place, keeping its indentation, `export` prefix and spelling.
/// A key that isn't present is appended upper-cased.
pub fn update(contents: &str, key: &str, value: &str) -> Result<String, ConfigError> {
    if !is_valid_key(key) {
        return Err(ConfigError::InvalidKey(key.to_string()));
    }

    let rendered = render_value(value);
    let mut replaced = false;
    let mut output = String::with_capacity(contents.len() + key.len() + rendered.len() + 2);

    for line in contents.lines() {
        match assignment_head(line) {
            Some((head, existing)) if existing.eq_ignore_ascii_case(key) => {
                output.push_str(head.trim_end());
                output.push('=');
                output.push_str(&rendered);
                replaced = true;
            }
            _ => output.push_str(line),
        }
        output.push('\n');
    }

    if !replaced {
        output.push_str(&key.to_uppercase());
        output.push('=');
        output.push_str(&rendered);
        output.push('\n');
    }

    Ok(output)
}

/// 1-based number of the first line containing the start of `text`.
fn line_of(contents: &str, text: &str) -> usize {
    let needle = text.lines().next().unwrap_or("").trim();
    if needle.is_empty() {
        return 1;
    }
    contents
        .lines()
        .position(|line| line.contains(needle))
        .map_or(1, |index| index + 1)
}

/// Quotes a value when reading it back unquoted would change it.
fn render_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$'));

    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Splits an assignment line into everything before `=` and the key.
fn assignment_head(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }

    let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    let eq = body.find('=')?;
    let head_end = line.len() - body.len() + eq;

    Some((&line[..head_end], body[..eq].trim()))
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::source::lookup_path;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn get<'a>(table: &'a Table, key: &str) -> Option<&'a str> {
        lookup_path(table, &key_path(key)).and_then(Value::as_str)
    }

    #[test]
    fn test_parse_assignments() {
        let contents = r#"
# database
APP_NAME=ember
export DB_HOST = localhost
GREETING="hello \"world\"\n"
RAW='a # not a comment'
PORT=5432 # trailing comment
EMPTY=
DB.USER=root
"#;
        let table = parse(contents, Path::new(".env")).unwrap();

        assert_eq!(get(&table, "app_name"), Some("ember"));
        assert_eq!(get(&table, "APP_NAME"), Some("ember"));
        assert_eq!(get(&table, "db_host"), Some("localhost"));
        assert_eq!(get(&table, "greeting"), Some("hello \"world\"\n"));
        assert_eq!(get(&table, "raw"), Some("a # not a comment"));
        assert_eq!(get(&table, "port"), Some("5432"));
        assert_eq!(get(&table, "empty"), Some(""));
        assert_eq!(get(&table, "db.user"), Some("root"));
    }

    #[test]
    fn test_parse_reports_line() {
        let result = parse("A=1\nnot an assignment\n", Path::new(".env.bad"));

        match result {
            Err(ConfigError::ParseError { path, line, .. }) => {
                assert_eq!(path, PathBuf::from(".env.bad"));
                assert_eq!(line, 2);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unterminated_quote() {
        assert!(parse("A=\"open\n", Path::new(".env")).is_err());
        assert!(parse("=value\n", Path::new(".env")).is_err());
    }

    #[test]
    fn test_update_replaces_in_place() {
        let contents = "# comment\nMAIN_CTRL_ADDR=localhost:50051\n  export Other=1\n";

        let updated = update(contents, "main_ctrl_addr", "127.0.0.1:50051").unwrap();
        assert_eq!(
            updated,
            "# comment\nMAIN_CTRL_ADDR=127.0.0.1:50051\n  export Other=1\n"
        );

        let updated = update(&updated, "OTHER", "2").unwrap();
        assert!(updated.contains("  export Other=2\n"));
    }

    #[test]
    fn test_update_appends_missing_key() {
        let updated = update("A=1", "new.key", "two words").unwrap();
        assert_eq!(updated, "A=1\nNEW.KEY=\"two words\"\n");
    }

    #[test]
    fn test_update_quotes_and_round_trips() {
        let value = " padded # with \"quotes\"\n";
        let updated = update("", "note", value).unwrap();

        let table = parse(&updated, Path::new(".env")).unwrap();
        assert_eq!(get(&table, "note"), Some(value));
    }

    #[test]
    fn test_update_keeps_dollar_literal() {
        let updated = update("", "password", "pa$$word").unwrap();
        assert_eq!(updated, "PASSWORD=\"pa\\$\\$word\"\n");

        let table = parse(&updated, Path::new(".env")).unwrap();
        assert_eq!(get(&table, "password"), Some("pa$$word"));
    }

    #[test]
    fn test_parse_expands_earlier_keys() {
        let table = parse(
            "EMBER_FILE_TEST_BASE=/srv/app\nLOGS=${EMBER_FILE_TEST_BASE}/logs\n",
            Path::new(".env"),
        )
        .unwrap();
        assert_eq!(get(&table, "logs"), Some("/srv/app/logs"));
    }

    #[test]
    fn test_parse_error_hides_line_contents() {
        let err = parse("A=1\nSECRET=hunter2 oops\n", Path::new(".env")).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("line 2"), "{message}");
        assert!(!message.contains("hunter2"), "{message}");
    }

    #[test]
    fn test_update_rejects_invalid_key() {
        assert!(matches!(
            update("", "bad key", "x"),
            Err(ConfigError::InvalidKey(_))
        ));
        assert!(update("", "1st", "x").is_err());
        assert!(update("", "with-dash", "x").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load(Path::new("/nonexistent/path/.env")).unwrap().is_none());
    }

    #[test]
    fn test_load_existing_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "KEY=value").unwrap();

        let table = load(file.path()).unwrap().unwrap();
        assert_eq!(get(&table, "key"), Some("value"));
    }

    #[test]
    fn test_select_path_prefers_label() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env.testing"), "A=1\n").unwrap();

        assert_eq!(
            select_path(dir.path(), ".env", "testing"),
            dir.path().join(".env.testing")
        );
        assert_eq!(
            select_path(dir.path(), ".env", "stage"),
            dir.path().join(".env")
        );
        assert_eq!(select_path(dir.path(), ".env", ""), dir.path().join(".env"));
    }
}
