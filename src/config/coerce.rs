//! Loose conversion of untyped configuration values.
//!
//! Values read from `KEY=value` files and the process environment are always
//! strings, while dynamic sections may produce any [`Value`]. Getters convert
//! on read; a value that can't be converted becomes the zero value of the
//! target type.

use std::collections::HashMap;

use toml::Value;

/// Conversion from an untyped [`Value`] that never fails.
pub trait Coerce: Sized {
    fn coerce(value: &Value) -> Self;
}

/// Whether a value counts as unset.
///
/// Empty strings, zero numbers, `false`, and empty tables or arrays are all
/// treated like a missing key by the getters.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Integer(i) => *i == 0,
        Value::Float(f) => *f == 0.0,
        Value::Boolean(b) => !b,
        Value::Array(a) => a.is_empty(),
        Value::Table(t) => t.is_empty(),
        Value::Datetime(_) => false,
    }
}

impl Coerce for String {
    fn coerce(value: &Value) -> Self {
        match value {
            Value::String(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Datetime(dt) => dt.to_string(),
            Value::Array(_) | Value::Table(_) => String::new(),
        }
    }
}

impl Coerce for i64 {
    fn coerce(value: &Value) -> Self {
        match value {
            Value::String(s) => parse_int(s).unwrap_or(0),
            Value::Integer(i) => *i,
            Value::Float(f) if f.is_finite() => *f as i64,
            Value::Boolean(b) => i64::from(*b),
            _ => 0,
        }
    }
}

impl Coerce for i32 {
    fn coerce(value: &Value) -> Self {
        i32::try_from(i64::coerce(value)).unwrap_or(0)
    }
}

impl Coerce for u64 {
    fn coerce(value: &Value) -> Self {
        u64::try_from(i64::coerce(value)).unwrap_or(0)
    }
}

impl Coerce for f64 {
    fn coerce(value: &Value) -> Self {
        match value {
            Value::String(s) => s.trim().parse().unwrap_or(0.0),
            Value::Integer(i) => *i as f64,
            Value::Float(f) => *f,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            _ => 0.0,
        }
    }
}

impl Coerce for bool {
    fn coerce(value: &Value) -> Self {
        match value {
            Value::String(s) => parse_bool(s),
            Value::Integer(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Boolean(b) => *b,
            _ => false,
        }
    }
}

impl Coerce for HashMap<String, String> {
    fn coerce(value: &Value) -> Self {
        match value {
            Value::Table(table) => table
                .iter()
                .map(|(k, v)| (k.clone(), String::coerce(v)))
                .collect(),
            _ => HashMap::new(),
        }
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "t" | "true" | "y" | "yes" | "on"
    )
}

/// Parses decimal, `0x`, `0o` and `0b` integers, plus decimals whose
/// fractional part is all zeros (`"12.0"`).
fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let radix_digits = [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)]
        .iter()
        .find_map(|(prefix, radix)| digits.strip_prefix(prefix).map(|rest| (rest, *radix)));

    let magnitude = match radix_digits {
        Some((rest, radix)) => i64::from_str_radix(rest, radix).ok()?,
        None => trim_zero_decimal(digits).parse::<i64>().ok()?,
    };

    Some(if negative { -magnitude } else { magnitude })
}

fn trim_zero_decimal(s: &str) -> &str {
    match s.split_once('.') {
        Some((whole, frac)) if !whole.is_empty() && frac.chars().all(|c| c == '0') => whole,
        _ => s,
    }
}
