//! Little-endian field codecs shared by every record module. Multi-byte
//! integers on disk are always little-endian; names are ASCII,
//! null-padded to their fixed field width.

use crate::config::MAX_NAME_LEN;
use crate::error::{FsError, Result};

pub(crate) fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn write_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn write_i32(buf: &mut [u8], at: usize, v: i32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn read_i64(buf: &[u8], at: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    i64::from_le_bytes(b)
}

pub(crate) fn write_i64(buf: &mut [u8], at: usize, v: i64) {
    buf[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// Decodes a null-padded name field into an owned string, dropping the
/// padding. Stored names are ASCII so the lossy conversion never lossies.
pub(crate) fn unpack_name(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encodes `name` into the fixed `field`, null-padding the remainder.
/// The caller validates length beforehand; this only asserts it.
pub(crate) fn pack_name(field: &mut [u8], name: &str) {
    debug_assert!(name.len() <= field.len());
    field.fill(0);
    field[..name.len()].copy_from_slice(name.as_bytes());
}

/// Validates a folder/file name against the on-disk field: non-empty,
/// at most [`MAX_NAME_LEN`] bytes, ASCII, no NUL or `/`.
pub(crate) fn check_name(name: &str) -> Result<()> {
    check_name_within(name, MAX_NAME_LEN)
}

pub(crate) fn check_name_within(name: &str, max: usize) -> Result<()> {
    if name.is_empty()
        || name.len() > max
        || !name.is_ascii()
        || name.bytes().any(|b| b == 0 || b == b'/')
    {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

/// Seconds since the Unix epoch, the timestamp unit of every record.
pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}
