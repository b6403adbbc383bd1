//! # Bit-level buffer access
//!
//! Info packets pack movement records at bit granularity before switching to
//! byte-aligned extended info. This module provides the three primitives
//! used for that:
//!
//! - [`BitWriter`] appends bits to a `BytesMut`, MSB-first
//! - [`BitReader`] reads them back from a byte slice
//! - [`BitScratch`] accumulates up to 64 bits with no backing buffer, so a
//!   record can be built once and bulk-copied into many writers
//!
//! # Scoped commit
//!
//! A `BitWriter` commits whole bytes as they fill. The trailing partial byte
//! is zero-padded and committed by [`BitWriter::finish`], or by `Drop` on any
//! other exit path (early `?` return or unwinding).

use bytes::{BufMut, BytesMut};
use tilesync_core::{Result, SyncError};

#[inline]
fn check_count(count: u32) -> Result<()> {
    if count == 0 || count > 32 {
        return Err(SyncError::InvalidArgument(format!(
            "bit count {} not in [1, 32]",
            count
        )));
    }
    Ok(())
}

#[inline]
fn mask(count: u32, value: u32) -> u64 {
    (value as u64) & ((1u64 << count) - 1)
}

/// Appends bit fields to a byte buffer
///
/// # Format
/// Fields are written most-significant bit first. Bits accumulate in a 64-bit
/// pending window and are flushed to the underlying buffer one byte at a time
/// as soon as eight are available, so no per-bit branching is needed.
///
/// # Limits
/// The writer accepts at most `limit_bytes * 8` bits. A write that would
/// exceed the limit fails with [`SyncError::BufferBounds`] and leaves the
/// writer unchanged.
pub struct BitWriter<'a> {
    buf: &'a mut BytesMut,
    start_len: usize,
    limit_bits: usize,
    written_bits: usize,
    pending: u64,
    pending_bits: u32,
    finished: bool,
}

impl<'a> BitWriter<'a> {
    /// Create a writer appending to `buf`, accepting at most `limit_bytes` bytes
    pub fn new(buf: &'a mut BytesMut, limit_bytes: usize) -> Self {
        let start_len = buf.len();
        Self {
            buf,
            start_len,
            limit_bits: limit_bytes.saturating_mul(8),
            written_bits: 0,
            pending: 0,
            pending_bits: 0,
            finished: false,
        }
    }

    /// Create a writer limited only by the spare capacity already reserved in `buf`
    pub fn with_spare_capacity(buf: &'a mut BytesMut) -> Self {
        let spare = buf.capacity() - buf.len();
        Self::new(buf, spare)
    }

    /// Write the low `count` bits of `value`
    ///
    /// # Errors
    /// - `InvalidArgument` if `count` is not in `[1, 32]`
    /// - `BufferBounds` if the writer limit cannot accept `count` more bits
    #[inline]
    pub fn p_bits(&mut self, count: u32, value: u32) -> Result<()> {
        check_count(count)?;
        let available = self.limit_bits - self.written_bits;
        if count as usize > available {
            return Err(SyncError::BufferBounds {
                requested: count as usize,
                available,
            });
        }

        self.pending = (self.pending << count) | mask(count, value);
        self.pending_bits += count;
        self.written_bits += count as usize;

        while self.pending_bits >= 8 {
            self.pending_bits -= 8;
            self.buf.put_u8((self.pending >> self.pending_bits) as u8);
        }
        self.pending &= (1u64 << self.pending_bits) - 1;
        Ok(())
    }

    #[inline]
    pub fn p_bool(&mut self, value: bool) -> Result<()> {
        self.p_bits(1, value as u32)
    }

    /// Copy every bit accumulated in `scratch`
    pub fn put_scratch(&mut self, scratch: &BitScratch) -> Result<()> {
        let len = scratch.len();
        if len == 0 {
            return Ok(());
        }
        if len as usize > self.limit_bits - self.written_bits {
            return Err(SyncError::BufferBounds {
                requested: len as usize,
                available: self.limit_bits - self.written_bits,
            });
        }
        if len > 32 {
            self.p_bits(len - 32, (scratch.value() >> 32) as u32)?;
            self.p_bits(32, scratch.value() as u32)
        } else {
            self.p_bits(len, scratch.value() as u32)
        }
    }

    /// Number of bits written so far
    #[inline]
    pub fn bit_position(&self) -> usize {
        self.written_bits
    }

    /// Bytes this writer will have produced once the partial byte is padded
    #[inline]
    pub fn byte_len(&self) -> usize {
        (self.written_bits + 7) / 8
    }

    /// Pad and commit the trailing partial byte, returning the bytes written
    pub fn finish(mut self) -> usize {
        self.flush();
        self.buf.len() - self.start_len
    }

    fn flush(&mut self) {
        if self.finished {
            return;
        }
        if self.pending_bits > 0 {
            let byte = (self.pending << (8 - self.pending_bits)) as u8;
            self.buf.put_u8(byte);
            self.pending = 0;
            self.pending_bits = 0;
        }
        self.finished = true;
    }
}

impl Drop for BitWriter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Reads bit fields written by [`BitWriter`]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Read `count` bits as an unsigned value
    ///
    /// # Errors
    /// - `InvalidArgument` if `count` is not in `[1, 32]`
    /// - `BufferBounds` if fewer than `count` bits remain
    pub fn g_bits(&mut self, count: u32) -> Result<u32> {
        check_count(count)?;
        let available = self.remaining_bits();
        if count as usize > available {
            return Err(SyncError::BufferBounds {
                requested: count as usize,
                available,
            });
        }

        let mut remaining = count;
        let mut value: u64 = 0;
        while remaining > 0 {
            let byte = self.data[self.bit_pos >> 3] as u64;
            let offset = (self.bit_pos & 7) as u32;
            let in_byte = 8 - offset;
            let take = in_byte.min(remaining);
            let bits = (byte >> (in_byte - take)) & ((1u64 << take) - 1);
            value = (value << take) | bits;
            remaining -= take;
            self.bit_pos += take as usize;
        }
        Ok(value as u32)
    }

    #[inline]
    pub fn g_bool(&mut self) -> Result<bool> {
        Ok(self.g_bits(1)? == 1)
    }

    #[inline]
    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Byte offset of the first byte after the current (padded) bit position
    #[inline]
    pub fn byte_position(&self) -> usize {
        (self.bit_pos + 7) / 8
    }
}

/// Up to 64 bits accumulated in a register, with no backing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BitScratch {
    value: u64,
    len: u32,
}

impl BitScratch {
    pub const CAPACITY: u32 = 64;

    pub const fn new() -> Self {
        Self { value: 0, len: 0 }
    }

    /// Append the low `count` bits of `value`
    pub fn push(&mut self, count: u32, value: u32) -> Result<()> {
        check_count(count)?;
        let available = (Self::CAPACITY - self.len) as usize;
        if count as usize > available {
            return Err(SyncError::BufferBounds {
                requested: count as usize,
                available,
            });
        }
        self.value = (self.value << count) | mask(count, value);
        self.len += count;
        Ok(())
    }

    #[inline]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn value(&self) -> u64 {
        self.value
    }

    pub fn clear(&mut self) {
        self.value = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALUES: [i32; 13] = [
        0, 1, 5, 11, 28, 50, 101, 240, 25252, 1048575, 33554431, 2147483647, -1,
    ];

    #[test]
    fn test_bits_roundtrip_all_widths() {
        for count in 1..=32u32 {
            for &value in VALUES.iter() {
                let expected = (mask(count, value as u32)) as u32;
                let mut buf = BytesMut::new();
                {
                    let mut writer = BitWriter::new(&mut buf, 8);
                    writer.p_bits(count, value as u32).unwrap();
                }
                let mut reader = BitReader::new(&buf);
                assert_eq!(reader.g_bits(count).unwrap(), expected, "count={} value={}", count, value);
            }
        }
    }

    #[test]
    fn test_sequential_fields() {
        let mut buf = BytesMut::new();
        let mut writer = BitWriter::new(&mut buf, 64);
        writer.p_bits(3, 5).unwrap();
        writer.p_bits(14, 3200).unwrap();
        writer.p_bool(true).unwrap();
        writer.p_bits(32, 0xDEADBEEF).unwrap();
        assert_eq!(writer.bit_position(), 50);
        assert_eq!(writer.finish(), 7);

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.g_bits(3).unwrap(), 5);
        assert_eq!(reader.g_bits(14).unwrap(), 3200);
        assert!(reader.g_bool().unwrap());
        assert_eq!(reader.g_bits(32).unwrap(), 0xDEADBEEF);
        assert_eq!(reader.byte_position(), 7);
    }

    #[test]
    fn test_single_bit_commits_on_close() {
        let mut buf = BytesMut::new();
        {
            let mut writer = BitWriter::new(&mut buf, 1);
            writer.p_bits(1, 1).unwrap();
        }
        assert_eq!(&buf[..], &[0x80]);
    }

    #[test]
    fn test_finish_reports_written_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xAA);
        let mut writer = BitWriter::new(&mut buf, 4);
        writer.p_bits(9, 0x1FF).unwrap();
        assert_eq!(writer.finish(), 2);
        assert_eq!(&buf[..], &[0xAA, 0xFF, 0x80]);
    }

    #[test]
    fn test_invalid_counts_rejected() {
        let mut buf = BytesMut::new();
        let mut writer = BitWriter::new(&mut buf, 8);
        assert!(matches!(writer.p_bits(0, 1), Err(SyncError::InvalidArgument(_))));
        assert!(matches!(writer.p_bits(33, 1), Err(SyncError::InvalidArgument(_))));
        drop(writer);

        let data = [0u8; 8];
        let mut reader = BitReader::new(&data);
        assert!(matches!(reader.g_bits(0), Err(SyncError::InvalidArgument(_))));
        assert!(matches!(reader.g_bits(33), Err(SyncError::InvalidArgument(_))));
    }

    #[test]
    fn test_zero_capacity_bounds() {
        let mut buf = BytesMut::new();
        let mut writer = BitWriter::with_spare_capacity(&mut buf);
        assert!(matches!(writer.p_bits(1, 1), Err(SyncError::BufferBounds { .. })));
        drop(writer);
        assert!(buf.is_empty());

        let mut reader = BitReader::new(&[]);
        assert!(matches!(reader.g_bits(1), Err(SyncError::BufferBounds { .. })));
    }

    #[test]
    fn test_limit_enforced() {
        let mut buf = BytesMut::new();
        let mut writer = BitWriter::new(&mut buf, 1);
        writer.p_bits(6, 0).unwrap();
        assert!(matches!(
            writer.p_bits(3, 0),
            Err(SyncError::BufferBounds { requested: 3, available: 2 })
        ));
        writer.p_bits(2, 3).unwrap();
        assert_eq!(writer.finish(), 1);
        assert_eq!(&buf[..], &[0x03]);
    }

    #[test]
    fn test_scratch_copy() {
        let mut scratch = BitScratch::new();
        scratch.push(2, 3).unwrap();
        scratch.push(32, 0x12345678).unwrap();
        scratch.push(30, 0x2AAAAAAA).unwrap();
        assert_eq!(scratch.len(), 64);
        assert!(matches!(scratch.push(1, 0), Err(SyncError::BufferBounds { .. })));

        let mut buf = BytesMut::new();
        {
            let mut writer = BitWriter::new(&mut buf, 16);
            writer.p_bits(1, 1).unwrap();
            writer.put_scratch(&scratch).unwrap();
        }
        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.g_bits(1).unwrap(), 1);
        assert_eq!(reader.g_bits(2).unwrap(), 3);
        assert_eq!(reader.g_bits(32).unwrap(), 0x12345678);
        assert_eq!(reader.g_bits(30).unwrap(), 0x2AAAAAAA);
    }
}
