#![allow(dead_code)]

use std::str;

pub const MAX_INPUT_SIZE: usize = 64 * 1024;

/// Returns a UTF-8 view of `data` truncated to `MAX_INPUT_SIZE`.
///
/// Cutting at the cap may split a multibyte codepoint, so up to 3 trailing
/// bytes are dropped before giving up.
#[inline]
pub fn truncate_utf8(data: &[u8]) -> Option<&str> {
    let cap = data.len().min(MAX_INPUT_SIZE);
    (0..=3usize.min(cap)).find_map(|trim| str::from_utf8(&data[..cap - trim]).ok())
}
