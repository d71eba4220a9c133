//! Binary packet codec: big-endian primitives and SSH packet framing
//! (RFC 4251 data types, RFC 4253 §6 binary packet protocol).

use rand::RngCore;

use crate::constants::{AES_BLOCK_SIZE, MIN_ALIGN, MIN_PADDING};
use crate::error::{Error, Result};

/// Outcome of a parse attempt over a byte buffer that may be incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeedMore {
    /// Not enough bytes were available yet; try again once more arrive.
    Yes,
}

/// Read a big-endian `uint32`, or [`NeedMore`] if `buf` is too short.
pub fn try_read_u32(buf: &[u8]) -> std::result::Result<(u32, usize), NeedMore> {
    if buf.len() < 4 {
        return Err(NeedMore::Yes);
    }

    Ok((u32::from_be_bytes(buf[..4].try_into().unwrap()), 4))
}

/// Strict variant of [`try_read_u32`]: truncation here is a protocol error.
pub fn read_u32(buf: &[u8]) -> Result<(u32, usize)> {
    try_read_u32(buf).map_err(|_| Error::Parse("truncated uint32"))
}

/// Write a big-endian `uint32`.
pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Read a length-prefixed byte string (arbitrary bytes, not required to be UTF-8).
pub fn try_read_bytes(buf: &[u8]) -> std::result::Result<(&[u8], usize), NeedMore> {
    let (len, _) = try_read_u32(buf)?;
    let len = len as usize;

    if buf.len() < 4 + len {
        return Err(NeedMore::Yes);
    }

    Ok((&buf[4..4 + len], 4 + len))
}

/// Strict variant of [`try_read_bytes`].
pub fn read_bytes(buf: &[u8]) -> Result<(&[u8], usize)> {
    try_read_bytes(buf).map_err(|_| Error::Parse("truncated byte string"))
}

/// Write a length-prefixed byte string.
pub fn write_bytes(out: &mut Vec<u8>, value: &[u8]) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value);
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string(buf: &[u8]) -> Result<(String, usize)> {
    let (bytes, consumed) = read_bytes(buf)?;
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| Error::Parse("string is not UTF-8"))?;

    Ok((s, consumed))
}

/// Write a length-prefixed UTF-8 string.
pub fn write_string(out: &mut Vec<u8>, value: &str) {
    write_bytes(out, value.as_bytes());
}

/// Write a comma-joined `NameList` (RFC 4251 §5).
pub fn write_name_list(out: &mut Vec<u8>, names: &[&str]) {
    write_string(out, &names.join(","));
}

/// Read a `mpint`: two's-complement big-endian, zero-length encodes `0`,
/// a leading zero byte is present whenever the MSB of the first byte
/// would otherwise be set.
pub fn read_mpint(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let (bytes, consumed) = read_bytes(buf)?;

    Ok((bytes.to_vec(), consumed))
}

/// Write an arbitrary-length non-negative integer as `mpint`, given its
/// big-endian magnitude bytes (no leading zero bytes, as produced by
/// [`num_bigint::BigUint::to_bytes_be`] or an X25519 shared-secret byte string).
pub fn write_mpint_from_magnitude(out: &mut Vec<u8>, magnitude: &[u8]) {
    // Strip any leading zero bytes the caller may have left in, so we
    // reconstruct the canonical encoding regardless of input shape.
    let trimmed = {
        let first_nonzero = magnitude.iter().position(|&b| b != 0);
        match first_nonzero {
            Some(i) => &magnitude[i..],
            None => &[][..],
        }
    };

    if trimmed.is_empty() {
        write_u32(out, 0);
        return;
    }

    if trimmed[0] & 0x80 != 0 {
        write_u32(out, trimmed.len() as u32 + 1);
        out.push(0);
        out.extend_from_slice(trimmed);
    } else {
        write_u32(out, trimmed.len() as u32);
        out.extend_from_slice(trimmed);
    }
}

/// Write a `u64` value as `mpint` (used for the small DH/X25519 test vectors
/// and for readability in property tests).
pub fn write_mpint_u64(out: &mut Vec<u8>, value: u64) {
    write_mpint_from_magnitude(out, &value.to_be_bytes());
}

/// Build a full binary packet: `packet_length || padding_length || payload || padding`.
///
/// `etm` selects whether the 4-byte length field is excluded from the
/// padding-alignment calculation (encrypt-then-mac) or included
/// (mac-then-encrypt).
pub fn build_packet(payload: &[u8], etm: bool) -> Vec<u8> {
    const BLOCK: usize = AES_BLOCK_SIZE;

    let l = if etm {
        1 + payload.len()
    } else {
        5 + payload.len()
    };

    let align = BLOCK.max(MIN_ALIGN);
    let padding_length = MIN_PADDING + (align - (l + MIN_PADDING) % align) % align;

    let packet_length = 1 + payload.len() + padding_length;

    let mut out = Vec::with_capacity(4 + packet_length);
    write_u32(&mut out, packet_length as u32);
    out.push(padding_length as u8);
    out.extend_from_slice(payload);

    let mut padding = vec![0u8; padding_length];
    rand::thread_rng().fill_bytes(&mut padding);
    out.extend_from_slice(&padding);

    out
}

/// Result of successfully parsing a plaintext packet.
pub struct Parsed<'p> {
    /// The packet payload (padding and length/padding-length fields stripped).
    pub payload: &'p [u8],
    /// Total number of bytes consumed from `buf`, including the 4-byte length field.
    pub consumed: usize,
}

/// Parse a plaintext binary packet out of `buf`.
pub fn parse_packet(buf: &[u8]) -> std::result::Result<Parsed<'_>, NeedMore> {
    if buf.len() < 5 {
        return Err(NeedMore::Yes);
    }

    let packet_length = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;

    if buf.len() < 4 + packet_length {
        return Err(NeedMore::Yes);
    }

    let padding_length = buf[4] as usize;
    let payload_len = packet_length.saturating_sub(1).saturating_sub(padding_length);
    let payload_start = 5;
    let payload_end = payload_start + payload_len;

    Ok(Parsed {
        payload: &buf[payload_start..payload_end],
        consumed: 4 + packet_length,
    })
}
