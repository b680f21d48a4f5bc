//! Small formatting and hashing helpers.

use std::time::Duration;

use md5::{Digest, Md5};

/// Renders a duration as milliseconds with three decimals, e.g. `12.345ms`.
pub fn microseconds_str(elapsed: Duration) -> String {
    format!("{:.3}ms", elapsed.as_nanos() as f64 / 1e6)
}

/// Maps a string onto a bucket in `0..100`.
///
/// Uses the first four bytes of the MD5 digest, read big-endian. The empty
/// string maps to 0.
pub fn hash_string(input: &str) -> u32 {
    if input.is_empty() {
        return 0;
    }

    let digest = Md5::digest(input.as_bytes());
    let head = [digest[0], digest[1], digest[2], digest[3]];
    u32::from_be_bytes(head) % 100
}

/// Lowercase hex MD5 digest.
pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// True for empty or whitespace-only strings.
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}
