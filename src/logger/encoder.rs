//! Record encoders.

use std::fmt;
use std::io::Write;

use serde::Serialize;
use tracing::Level;

use super::record::{FieldValue, Record};

/// Timestamp layout shared by both encoders.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Turns a record into bytes, one line per record.
pub trait Encoder: Send + Sync + fmt::Debug {
    fn encode(&self, record: &Record<'_>, buf: &mut Vec<u8>);
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARN",
        Level::ERROR => "ERROR",
    }
}

fn level_color(level: Level) -> u8 {
    match level {
        Level::TRACE => 36,
        Level::DEBUG => 35,
        Level::INFO => 34,
        Level::WARN => 33,
        Level::ERROR => 31,
    }
}

/// Tab separated, human readable lines.
#[derive(Debug, Clone, Default)]
pub struct ConsoleEncoder {
    color: bool,
}

impl ConsoleEncoder {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl Encoder for ConsoleEncoder {
    fn encode(&self, record: &Record<'_>, buf: &mut Vec<u8>) {
        // Writes into a Vec can't fail.
        let _ = write!(buf, "{}\t", record.time.format(TIME_FORMAT));
        let level = level_name(record.level);
        if self.color {
            let _ = write!(buf, "\x1b[{}m{}\x1b[0m", level_color(record.level), level);
        } else {
            buf.extend_from_slice(level.as_bytes());
        }
        if !record.logger.is_empty() {
            let _ = write!(buf, "\t{}", record.logger);
        }
        if let Some(caller) = record.caller {
            let _ = write!(buf, "\t{}", caller.short());
        }
        let _ = write!(buf, "\t{}", record.message);

        if !record.fields.is_empty() {
            let mut object = serde_json::Map::new();
            for field in record.fields {
                if let Ok(value) = serde_json::to_value(&field.value) {
                    object.insert(field.key.to_string(), value);
                }
            }
            let _ = write!(buf, "\t{}", serde_json::Value::Object(object));
        }
        buf.push(b'\n');

        if let Some(stack) = record.stacktrace {
            buf.extend_from_slice(stack.trim_end().as_bytes());
            buf.push(b'\n');
        }
    }
}

/// One JSON object per line. Keys keep their insertion order.
///
/// Fields are written as given, even when a key repeats a record key. The
/// query adapter's `time` field (elapsed time) follows the record's `time`
/// (timestamp) in the same object; parsers that keep the last duplicate,
/// such as `serde_json`, lose the timestamp.
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    fn pair<V: Serialize + ?Sized>(buf: &mut Vec<u8>, first: &mut bool, key: &str, value: &V) {
        let Ok(value) = serde_json::to_string(value) else {
            return;
        };
        if !*first {
            buf.push(b',');
        }
        *first = false;
        let _ = serde_json::to_writer(&mut *buf, key);
        buf.push(b':');
        buf.extend_from_slice(value.as_bytes());
    }
}

impl Encoder for JsonEncoder {
    fn encode(&self, record: &Record<'_>, buf: &mut Vec<u8>) {
        let mut first = true;
        buf.push(b'{');
        Self::pair(buf, &mut first, "level", level_name(record.level));
        Self::pair(
            buf,
            &mut first,
            "time",
            &record.time.format(TIME_FORMAT).to_string(),
        );
        if !record.logger.is_empty() {
            Self::pair(buf, &mut first, "logger", record.logger);
        }
        if let Some(caller) = record.caller {
            Self::pair(buf, &mut first, "caller", &caller.short());
        }
        Self::pair(buf, &mut first, "message", record.message);
        for field in record.fields {
            Self::pair::<FieldValue>(buf, &mut first, &field.key, &field.value);
        }
        if let Some(stack) = record.stacktrace {
            Self::pair(buf, &mut first, "stacktrace", stack);
        }
        buf.extend_from_slice(b"}\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::caller::Caller;
    use crate::logger::record::Field;
    use chrono::{Local, TimeZone};

    fn encode(encoder: &dyn Encoder, fields: &[Field], stack: Option<&str>) -> String {
        let caller = Caller::new("/app/src/repo/user.rs", 42);
        let record = Record {
            time: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            level: Level::WARN,
            logger: "db",
            caller: Some(&caller),
            message: "Database Slow Log",
            fields,
            stacktrace: stack,
        };
        let mut buf = Vec::new();
        encoder.encode(&record, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_console_line() {
        let fields = [Field::new("rows", 1i64)];
        let line = encode(&ConsoleEncoder::new(false), &fields, None);

        assert_eq!(
            line,
            "2024-03-09 14:05:07\tWARN\tdb\trepo/user.rs:42\tDatabase Slow Log\t{\"rows\":1}\n"
        );
    }

    #[test]
    fn test_console_colored_level_and_stacktrace() {
        let line = encode(&ConsoleEncoder::new(true), &[], Some("frame 0\nframe 1\n"));

        assert!(line.contains("\x1b[33mWARN\x1b[0m"), "{line}");
        assert!(line.ends_with("Database Slow Log\nframe 0\nframe 1\n"), "{line}");
    }

    #[test]
    fn test_json_key_order() {
        let fields = [
            Field::new("sql", "SELECT \"x\""),
            Field::new("time", "1.500ms"),
            Field::new("rows", -1i64),
        ];
        let line = encode(&JsonEncoder, &fields, Some("trace"));

        assert_eq!(
            line,
            "{\"level\":\"WARN\",\"time\":\"2024-03-09 14:05:07\",\"logger\":\"db\",\
             \"caller\":\"repo/user.rs:42\",\"message\":\"Database Slow Log\",\
             \"sql\":\"SELECT \\\"x\\\"\",\"time\":\"1.500ms\",\"rows\":-1,\
             \"stacktrace\":\"trace\"}\n"
        );

        // Every line is a valid JSON document; the later `time` wins.
        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["message"], "Database Slow Log");
        assert_eq!(parsed["time"], "1.500ms");
    }
}
