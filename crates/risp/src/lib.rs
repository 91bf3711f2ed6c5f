//! RISP: a tag-length-value command stream.
//!
//! A command is a single byte; its top bits select the argument class
//! (see [`Class`]). Streams carry no framing beyond the commands
//! themselves, so a decoder can resume from any command boundary.
//!
//! Decoding:
//!   - [`next`] pulls one complete command off the front of a byte
//!     slice, reporting how many bytes it used. `Ok(None)` means the
//!     slice ends mid-command; keep the tail and call again once more
//!     bytes arrive.
//!
//! Encoding:
//!   - [`put_cmd`], [`put_int`] and [`put_data`] append one command to a
//!     `BytesMut`, checked against the command's class.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

/// Argument class of a command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    /// `0x00..=0x3f`: no argument.
    NoArg,
    /// `0x40..=0x5f`: one unsigned byte.
    ShortInt,
    /// `0x60..=0x7f`: four bytes, big-endian.
    LargeInt,
    /// `0x80..=0x9f`: one length byte, then that many bytes.
    ShortStr,
    /// `0xa0..=0xbf`: four-byte big-endian length, then that many bytes.
    LargeStr,
    /// `0xc0..=0xff`: not decodable.
    Reserved,
}

/// Class of `cmd`, derived from its top bits.
pub const fn class_of(cmd: u8) -> Class {
    match cmd {
        0x00..=0x3f => Class::NoArg,
        0x40..=0x5f => Class::ShortInt,
        0x60..=0x7f => Class::LargeInt,
        0x80..=0x9f => Class::ShortStr,
        0xa0..=0xbf => Class::LargeStr,
        _ => Class::Reserved,
    }
}

/// Decoded argument. String payloads borrow from the input slice.
#[derive(Debug, PartialEq, Eq)]
pub enum Arg<'a> {
    None,
    Int(u32),
    Bytes(&'a [u8]),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RispError {
    #[error("reserved command byte {0:#04x}")]
    Reserved(u8),
}

/// Decode the first command in `buf`.
///
/// Returns the command byte, its argument and the number of bytes the
/// command occupies, or `Ok(None)` if `buf` ends before the command
/// does. A reserved command byte poisons the stream: its length is
/// unknowable, so nothing after it can be decoded.
pub fn next(buf: &[u8]) -> Result<Option<(u8, Arg<'_>, usize)>, RispError> {
    let Some(&cmd) = buf.first() else {
        return Ok(None);
    };
    match class_of(cmd) {
        Class::NoArg => Ok(Some((cmd, Arg::None, 1))),
        Class::ShortInt => Ok(buf.get(1).map(|&v| (cmd, Arg::Int(u32::from(v)), 2))),
        Class::LargeInt => {
            if buf.len() < 5 {
                return Ok(None);
            }
            let v = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
            Ok(Some((cmd, Arg::Int(v), 5)))
        }
        Class::ShortStr => {
            let Some(&len) = buf.get(1) else {
                return Ok(None);
            };
            let end = 2 + len as usize;
            if buf.len() < end {
                return Ok(None);
            }
            Ok(Some((cmd, Arg::Bytes(&buf[2..end]), end)))
        }
        Class::LargeStr => {
            if buf.len() < 5 {
                return Ok(None);
            }
            let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
            let end = 5 + len;
            if buf.len() < end {
                return Ok(None);
            }
            Ok(Some((cmd, Arg::Bytes(&buf[5..end]), end)))
        }
        Class::Reserved => Err(RispError::Reserved(cmd)),
    }
}

/// Append a no-argument command.
///
/// # Panics
/// Panics if `cmd` is not in the no-argument class.
pub fn put_cmd(buf: &mut BytesMut, cmd: u8) {
    assert!(class_of(cmd) == Class::NoArg, "{cmd:#04x} takes an argument");
    buf.put_u8(cmd);
}

/// Append an integer command; the encoded width follows the class.
///
/// # Panics
/// Panics if `cmd` is not an integer command, or if a short-int value
/// does not fit in one byte.
pub fn put_int(buf: &mut BytesMut, cmd: u8, value: u32) {
    match class_of(cmd) {
        Class::ShortInt => {
            assert!(value <= u32::from(u8::MAX), "short int {value} overflows");
            buf.put_u8(cmd);
            buf.put_u8(value as u8);
        }
        Class::LargeInt => {
            buf.put_u8(cmd);
            buf.put_u32(value);
        }
        _ => panic!("{cmd:#04x} is not an integer command"),
    }
}

/// Append a string command; the length prefix follows the class.
///
/// # Panics
/// Panics if `cmd` is not a string command, or if a short string is
/// longer than 255 bytes.
pub fn put_data(buf: &mut BytesMut, cmd: u8, data: &[u8]) {
    match class_of(cmd) {
        Class::ShortStr => {
            assert!(data.len() <= usize::from(u8::MAX), "short string of {} bytes", data.len());
            buf.put_u8(cmd);
            buf.put_u8(data.len() as u8);
            buf.put_slice(data);
        }
        Class::LargeStr => {
            buf.put_u8(cmd);
            buf.put_u32(data.len() as u32);
            buf.put_slice(data);
        }
        _ => panic!("{cmd:#04x} is not a string command"),
    }
}
