//! Primitive binary read/write helpers.
//!
//! Every function here is sentinel based: out-of-bounds access never panics,
//! it returns `0`, `false`, `None` or a short count and leaves the decision to
//! the caller. The structured record codec and the container codecs turn
//! those sentinels into proper [`EcgError`](crate::EcgError) values.

use std::io::{ErrorKind, Read};

/// Text encodings understood by [`read_string`] / [`write_string`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// 7-bit ASCII, bytes above 0x7F are replaced by `?`
    #[default]
    Ascii,
    /// ISO-8859-1, one byte per code point
    Latin1,
    Utf8,
}

impl TextEncoding {
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '?' })
                .collect(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| if (c as u32) < 0x100 { c as u32 as u8 } else { b'?' })
                .collect(),
            TextEncoding::Utf8 => text.as_bytes().to_vec(),
        }
    }
}

fn in_bounds(buffer_len: usize, offset: usize, count: usize) -> bool {
    offset.checked_add(count).map_or(false, |end| end <= buffer_len)
}

/// Reads an integer of `byte_count` bytes (clamped to 8).
///
/// Returns 0 when `offset + byte_count` exceeds the buffer. The value is not
/// sign extended; use [`read_signed`] for that.
pub fn read_int(buffer: &[u8], offset: usize, byte_count: usize, little_endian: bool) -> i64 {
    let byte_count = byte_count.min(8);
    if byte_count == 0 || !in_bounds(buffer.len(), offset, byte_count) {
        return 0;
    }

    let mut value: u64 = 0;
    let bytes = &buffer[offset..offset + byte_count];
    if little_endian {
        for &b in bytes.iter().rev() {
            value = (value << 8) | b as u64;
        }
    } else {
        for &b in bytes {
            value = (value << 8) | b as u64;
        }
    }
    value as i64
}

/// Same as [`read_int`] but sign extends from the top bit of `byte_count` bytes.
pub fn read_signed(buffer: &[u8], offset: usize, byte_count: usize, little_endian: bool) -> i64 {
    let byte_count = byte_count.min(8);
    let raw = read_int(buffer, offset, byte_count, little_endian);
    if byte_count == 0 || byte_count == 8 {
        return raw;
    }
    let shift = 64 - byte_count * 8;
    (raw << shift) >> shift
}

/// Writes the low `byte_count` bytes of `value`.
///
/// Fails without touching the buffer if `byte_count` is not in `1..=8` or the
/// write would overflow it.
pub fn write_int(
    value: i64,
    buffer: &mut [u8],
    offset: usize,
    byte_count: usize,
    little_endian: bool,
) -> bool {
    if !(1..=8).contains(&byte_count) || !in_bounds(buffer.len(), offset, byte_count) {
        return false;
    }

    let value = value as u64;
    for i in 0..byte_count {
        let byte = ((value >> (8 * i)) & 0xFF) as u8;
        let pos = if little_endian { offset + i } else { offset + byte_count - 1 - i };
        buffer[pos] = byte;
    }
    true
}

/// Reads a zero terminated string of at most `max_length` bytes.
pub fn read_string(buffer: &[u8], offset: usize, max_length: usize) -> Option<String> {
    read_string_with(buffer, offset, max_length, Some(0), TextEncoding::Ascii)
}

/// Reads a string of at most `max_length` bytes.
///
/// With `terminator = Some(b)` the scan stops at the first `b`; with `None`
/// `max_length` is authoritative. The length is clipped to the buffer end.
/// Returns `None` when the resulting length is 0.
pub fn read_string_with(
    buffer: &[u8],
    offset: usize,
    max_length: usize,
    terminator: Option<u8>,
    encoding: TextEncoding,
) -> Option<String> {
    if offset >= buffer.len() {
        return None;
    }
    let available = (buffer.len() - offset).min(max_length);
    let window = &buffer[offset..offset + available];

    let length = match terminator {
        Some(t) => window.iter().position(|&b| b == t).unwrap_or(available),
        None => available,
    };

    if length == 0 {
        return None;
    }
    Some(encoding.decode(&window[..length]))
}

/// Writes up to `max_length` encoded bytes of `text`. No zero padding.
///
/// Returns the number of bytes written.
pub fn write_string(text: &str, buffer: &mut [u8], offset: usize, max_length: usize) -> usize {
    write_string_with(text, buffer, offset, max_length, TextEncoding::Ascii)
}

pub fn write_string_with(
    text: &str,
    buffer: &mut [u8],
    offset: usize,
    max_length: usize,
    encoding: TextEncoding,
) -> usize {
    if offset >= buffer.len() {
        return 0;
    }
    let encoded = encoding.encode(text);
    let count = encoded.len().min(max_length).min(buffer.len() - offset);
    buffer[offset..offset + count].copy_from_slice(&encoded[..count]);
    count
}

/// Bounded copy, returns the number of bytes actually copied.
pub fn copy(dst: &mut [u8], dst_offset: usize, src: &[u8], src_offset: usize, length: usize) -> usize {
    if dst_offset >= dst.len() || src_offset >= src.len() {
        return 0;
    }
    let count = length
        .min(dst.len() - dst_offset)
        .min(src.len() - src_offset);
    dst[dst_offset..dst_offset + count].copy_from_slice(&src[src_offset..src_offset + count]);
    count
}

/// Bounded fill, returns the number of bytes filled.
pub fn fill(buffer: &mut [u8], offset: usize, count: usize, value: u8) -> usize {
    if offset >= buffer.len() {
        return 0;
    }
    let count = count.min(buffer.len() - offset);
    buffer[offset..offset + count].fill(value);
    count
}

/// Keeps reading until `count` bytes were obtained or the stream is exhausted.
///
/// The returned count is below `count` only at end of stream (or when the
/// buffer is too small). Interrupted reads are retried; other I/O errors end
/// the loop like an end of stream would.
pub fn read_stream_exact<R: Read + ?Sized>(
    stream: &mut R,
    buffer: &mut [u8],
    offset: usize,
    count: usize,
) -> usize {
    if offset >= buffer.len() {
        return 0;
    }
    let end = offset + count.min(buffer.len() - offset);
    let mut pos = offset;

    while pos < end {
        match stream.read(&mut buffer[pos..end]) {
            Ok(0) => break,
            Ok(n) => pos += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("stream read stopped after {} bytes: {}", pos - offset, e);
                break;
            }
        }
    }
    pos - offset
}
