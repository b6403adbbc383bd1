//! Byte-level codecs used by extended info blocks
//!
//! Integers are big-endian unless the name says otherwise. The `add`, `neg`
//! and `sub` variants apply the byte transforms some client platforms expect
//! on specific fields:
//!
//! - `add`: byte + 128
//! - `neg`: 0 - byte
//! - `sub`: 128 - byte
//!
//! Writers append to a `BytesMut`; readers consume from any [`Buf`] and fail
//! with `BufferBounds` instead of panicking on short input.

use bytes::{Buf, BufMut, BytesMut};
use tilesync_core::{Result, SyncError};

/// Largest value a [`write_smart`] can encode
pub const SMART_MAX: u32 = 0x7FFF;

#[inline]
fn ensure<B: Buf>(buf: &B, bytes: usize) -> Result<()> {
    if buf.remaining() < bytes {
        return Err(SyncError::BufferBounds {
            requested: bytes * 8,
            available: buf.remaining() * 8,
        });
    }
    Ok(())
}

/// Write the low byte of `val`
#[inline]
pub fn write_p1(buf: &mut BytesMut, val: i32) {
    buf.put_u8(val as u8);
}

/// Write the low byte of `val` plus 128
#[inline]
pub fn write_p1_add(buf: &mut BytesMut, val: i32) {
    buf.put_u8((val as u8).wrapping_add(128));
}

/// Write the negated low byte of `val`
#[inline]
pub fn write_p1_neg(buf: &mut BytesMut, val: i32) {
    buf.put_u8((val as u8).wrapping_neg());
}

/// Write 128 minus the low byte of `val`
#[inline]
pub fn write_p1_sub(buf: &mut BytesMut, val: i32) {
    buf.put_u8(128u8.wrapping_sub(val as u8));
}

/// Write a 16-bit value, big-endian
#[inline]
pub fn write_p2(buf: &mut BytesMut, val: i32) {
    buf.put_u16(val as u16);
}

/// Write a 16-bit value, little-endian
#[inline]
pub fn write_p2_le(buf: &mut BytesMut, val: i32) {
    buf.put_u16_le(val as u16);
}

/// Write a 16-bit value, big-endian, with the low byte transformed by `add`
#[inline]
pub fn write_p2_add(buf: &mut BytesMut, val: i32) {
    buf.put_u8((val >> 8) as u8);
    buf.put_u8((val as u8).wrapping_add(128));
}

/// Write a 24-bit value, big-endian
#[inline]
pub fn write_p3(buf: &mut BytesMut, val: i32) {
    buf.put_u8((val >> 16) as u8);
    buf.put_u16(val as u16);
}

/// Write a 32-bit value, big-endian
#[inline]
pub fn write_p4(buf: &mut BytesMut, val: i32) {
    buf.put_i32(val);
}

/// Write a 32-bit value, little-endian
#[inline]
pub fn write_p4_le(buf: &mut BytesMut, val: i32) {
    buf.put_i32_le(val);
}

/// Write a 1-or-2 byte unsigned smart
///
/// # Format
/// - `val < 128`: one byte
/// - `val <= 0x7FFF`: two bytes, big-endian, with the top bit set
pub fn write_smart(buf: &mut BytesMut, val: u32) -> Result<()> {
    if val < 128 {
        buf.put_u8(val as u8);
    } else if val <= SMART_MAX {
        buf.put_u16(0x8000 | val as u16);
    } else {
        return Err(SyncError::InvalidArgument(format!("smart value {} exceeds {}", val, SMART_MAX)));
    }
    Ok(())
}

/// Write a NUL-terminated string
///
/// Strings containing NUL cannot be represented and are rejected.
pub fn write_pjstr(buf: &mut BytesMut, val: &str) -> Result<()> {
    if val.as_bytes().contains(&0) {
        return Err(SyncError::InvalidArgument("string contains a NUL byte".into()));
    }
    buf.put_slice(val.as_bytes());
    buf.put_u8(0);
    Ok(())
}

#[inline]
pub fn read_g1<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

#[inline]
pub fn read_g1s<B: Buf>(buf: &mut B) -> Result<i8> {
    ensure(buf, 1)?;
    Ok(buf.get_i8())
}

#[inline]
pub fn read_g1_add<B: Buf>(buf: &mut B) -> Result<u8> {
    Ok(read_g1(buf)?.wrapping_sub(128))
}

#[inline]
pub fn read_g1_neg<B: Buf>(buf: &mut B) -> Result<u8> {
    Ok(read_g1(buf)?.wrapping_neg())
}

#[inline]
pub fn read_g1_sub<B: Buf>(buf: &mut B) -> Result<u8> {
    Ok(128u8.wrapping_sub(read_g1(buf)?))
}

#[inline]
pub fn read_g2<B: Buf>(buf: &mut B) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

#[inline]
pub fn read_g2_le<B: Buf>(buf: &mut B) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

#[inline]
pub fn read_g2_add<B: Buf>(buf: &mut B) -> Result<u16> {
    ensure(buf, 2)?;
    let high = buf.get_u8() as u16;
    let low = buf.get_u8().wrapping_sub(128) as u16;
    Ok((high << 8) | low)
}

#[inline]
pub fn read_g3<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure(buf, 3)?;
    let high = buf.get_u8() as u32;
    Ok((high << 16) | buf.get_u16() as u32)
}

#[inline]
pub fn read_g4<B: Buf>(buf: &mut B) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

#[inline]
pub fn read_g4_le<B: Buf>(buf: &mut B) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32_le())
}

pub fn read_smart<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure(buf, 1)?;
    if buf.chunk()[0] < 128 {
        Ok(buf.get_u8() as u32)
    } else {
        Ok((read_g2(buf)? & 0x7FFF) as u32)
    }
}

pub fn read_gjstr<B: Buf>(buf: &mut B) -> Result<String> {
    let mut bytes = Vec::new();
    loop {
        let byte = read_g1(buf)?;
        if byte == 0 {
            break;
        }
        bytes.push(byte);
    }
    String::from_utf8(bytes).map_err(|e| SyncError::InvalidArgument(format!("Invalid UTF-8: {}", e)))
}
