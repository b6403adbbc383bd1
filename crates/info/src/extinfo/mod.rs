//! # Extended info framework
//!
//! An extended info block is one optional property of an avatar (animation,
//! chat, appearance...) sent alongside its movement record. Each tick the
//! avatar raises a bit in its flag word for every block that changed, and
//! each observer receives the flagged blocks in a platform-specific order.
//!
//! ## Block storage
//!
//! - [`Cached`]: encoded once per platform in the precompute phase and copied
//!   byte-for-byte into every observer's packet
//! - [`OnDemand`]: encoded per observer at write time, for blocks whose bytes
//!   depend on who is looking (hit marks, observer tints)
//!
//! ## Layouts
//!
//! An [`ExtInfoLayout`] is the per-platform contract table: which wire bit each
//! block uses, which bits mark an extended flag word, and the order blocks are
//! written in. Layouts are opaque tables; nothing about one platform is
//! derived from another.

pub mod blocks;
pub mod desktop;
pub mod mobile;
pub mod npc;
pub mod player;

use bytes::{BufMut, BytesMut};
use std::fmt::Debug;
use std::sync::Arc;
use tilesync_core::{Platform, Result, SyncError};
use tilesync_protocol::{BufferRecycler, SharedBuf};

pub use blocks::*;
pub use npc::{NpcBlock, NpcEncoders, NpcExtendedInfo};
pub use player::{PlayerBlock, PlayerEncoders, PlayerExtendedInfo};

/// Common behaviour of a stored block
pub trait ExtendedInfoBlock {
    /// Reset to the default value and release any encoded buffers
    ///
    /// Calling it twice is the same as calling it once.
    fn clear(&mut self, recycler: &BufferRecycler);

    /// Whether the value equals its default
    fn is_default(&self) -> bool;
}

/// Encodes a block once for every observer on one platform
pub trait PrecomputedEncoder<T>: Send + Sync {
    fn precompute(&self, value: &T, out: &mut BytesMut) -> Result<()>;
}

impl<T, F> PrecomputedEncoder<T> for F
where
    F: Fn(&T, &mut BytesMut) -> Result<()> + Send + Sync,
{
    fn precompute(&self, value: &T, out: &mut BytesMut) -> Result<()> {
        self(value, out)
    }
}

/// Encodes a block for one (observer, owner) pair
pub trait OnDemandEncoder<T>: Send + Sync {
    fn encode(&self, out: &mut BytesMut, observer: usize, owner: usize, value: &T) -> Result<()>;
}

impl<T, F> OnDemandEncoder<T> for F
where
    F: Fn(&mut BytesMut, usize, usize, &T) -> Result<()> + Send + Sync,
{
    fn encode(&self, out: &mut BytesMut, observer: usize, owner: usize, value: &T) -> Result<()> {
        self(out, observer, owner, value)
    }
}

/// Block value with one precomputed buffer per platform
#[derive(Debug)]
pub struct Cached<T> {
    value: T,
    buffers: [Option<SharedBuf>; Platform::COUNT],
}

impl<T: Default + PartialEq> Cached<T> {
    pub fn new() -> Self {
        Self {
            value: T::default(),
            buffers: [const { None }; Platform::COUNT],
        }
    }

    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Replace the value; buffers encoded for the old value are retired
    pub fn set(&mut self, value: T, recycler: &BufferRecycler) {
        self.release(recycler);
        self.value = value;
    }

    /// Encode the value for `platform` unless already done
    ///
    /// # Errors
    /// Whatever the encoder returns; no buffer is stored in that case
    pub fn precompute(
        &mut self,
        platform: Platform,
        encoder: &dyn PrecomputedEncoder<T>,
        recycler: &BufferRecycler,
    ) -> Result<()> {
        let slot = &mut self.buffers[platform.index()];
        if slot.is_some() {
            return Ok(());
        }
        let mut buf = recycler.alloc(32);
        encoder.precompute(&self.value, &mut buf)?;
        *slot = Some(Arc::new(buf));
        Ok(())
    }

    #[inline]
    pub fn is_precomputed(&self, platform: Platform) -> bool {
        self.buffers[platform.index()].is_some()
    }

    /// Copy the precomputed bytes for `platform` into `out`
    ///
    /// # Errors
    /// `ExtendedInfo` if nothing was precomputed for the platform
    pub fn write(&self, platform: Platform, out: &mut BytesMut) -> Result<()> {
        match &self.buffers[platform.index()] {
            Some(buf) => {
                out.put_slice(buf);
                Ok(())
            }
            None => Err(SyncError::ExtendedInfo(format!(
                "block not precomputed for {}",
                platform.as_str()
            ))),
        }
    }

    /// Hand every buffer to the recycler, keeping the value
    pub fn release(&mut self, recycler: &BufferRecycler) {
        for slot in self.buffers.iter_mut() {
            if let Some(buf) = slot.take() {
                recycler.retire(buf);
            }
        }
    }
}

impl<T: Default + PartialEq> Default for Cached<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + PartialEq> ExtendedInfoBlock for Cached<T> {
    fn clear(&mut self, recycler: &BufferRecycler) {
        self.release(recycler);
        self.value = T::default();
    }

    fn is_default(&self) -> bool {
        self.value == T::default()
    }
}

/// Block value encoded per observer at write time
#[derive(Debug, Default)]
pub struct OnDemand<T> {
    value: T,
}

impl<T: Default + PartialEq> OnDemand<T> {
    pub fn new() -> Self {
        Self { value: T::default() }
    }

    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[inline]
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    pub fn write(
        &self,
        out: &mut BytesMut,
        encoder: &dyn OnDemandEncoder<T>,
        observer: usize,
        owner: usize,
    ) -> Result<()> {
        encoder.encode(out, observer, owner, &self.value)
    }
}

impl<T: Default + PartialEq> ExtendedInfoBlock for OnDemand<T> {
    fn clear(&mut self, _recycler: &BufferRecycler) {
        self.value = T::default();
    }

    fn is_default(&self) -> bool {
        self.value == T::default()
    }
}

/// A block identifier usable in an [`ExtInfoLayout`]
pub trait BlockKind: Copy + Eq + Debug + Send + Sync + 'static {
    /// Bit of this block in the owner's internal flag word
    fn mask(self) -> u32;
}

/// Flag word extension markers
///
/// The word is written low byte first. When any bit above the first byte is
/// set, `extend_short` is raised in the first byte and a second byte follows;
/// likewise `extend_medium` (in the second byte) announces a third.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagWordFormat {
    pub extend_short: u32,
    pub extend_medium: Option<u32>,
}

/// One platform's extended info contract
#[derive(Debug)]
pub struct ExtInfoLayout<K: 'static> {
    pub platform: Platform,
    pub format: FlagWordFormat,
    /// `(block, wire bit)` in write order
    pub order: &'static [(K, u32)],
}

impl<K: BlockKind> ExtInfoLayout<K> {
    /// Translate internal block bits into this platform's wire bits
    pub fn wire_flags(&self, flags: u32) -> u32 {
        self.order
            .iter()
            .filter(|(kind, _)| flags & kind.mask() != 0)
            .fold(0, |word, (_, bit)| word | bit)
    }

    /// Append the flag word for `wire`, adding extension markers as needed
    ///
    /// # Errors
    /// `ExtendedInfo` if the word needs a third byte the format lacks
    pub fn write_flag_word(&self, wire: u32, out: &mut BytesMut) -> Result<()> {
        let mut word = wire;
        if word > 0xFF {
            word |= self.format.extend_short;
        }
        let medium = word > 0xFFFF;
        if medium {
            match self.format.extend_medium {
                Some(marker) => word |= marker,
                None => {
                    return Err(SyncError::ExtendedInfo(format!(
                        "flag word {:#x} needs a third byte on {}",
                        wire,
                        self.platform.as_str()
                    )))
                }
            }
        }
        out.put_u8(word as u8);
        if word & self.format.extend_short != 0 {
            out.put_u8((word >> 8) as u8);
        }
        if medium {
            out.put_u8((word >> 16) as u8);
        }
        Ok(())
    }

    /// Read a flag word written by [`write_flag_word`](Self::write_flag_word)
    ///
    /// Marker bits are left in the returned word; [`blocks_in`](Self::blocks_in)
    /// ignores them.
    pub fn read_flag_word<B: bytes::Buf>(&self, buf: &mut B) -> Result<u32> {
        let mut word = tilesync_protocol::read_g1(buf)? as u32;
        if word & self.format.extend_short != 0 {
            word |= (tilesync_protocol::read_g1(buf)? as u32) << 8;
            if let Some(marker) = self.format.extend_medium {
                if word & marker != 0 {
                    word |= (tilesync_protocol::read_g1(buf)? as u32) << 16;
                }
            }
        }
        Ok(word)
    }

    /// Blocks present in a wire word, in write order
    pub fn blocks_in(&self, wire: u32) -> impl Iterator<Item = K> + '_ {
        self.order
            .iter()
            .filter(move |(_, bit)| wire & bit != 0)
            .map(|(kind, _)| *kind)
    }

    /// Write the flag word followed by every flagged block
    ///
    /// `write_block` is called once per set block, in table order.
    pub fn write_blocks<F>(&self, flags: u32, out: &mut BytesMut, mut write_block: F) -> Result<()>
    where
        F: FnMut(K, &mut BytesMut) -> Result<()>,
    {
        self.write_flag_word(self.wire_flags(flags), out)?;
        for (kind, _) in self.order {
            if flags & kind.mask() != 0 {
                write_block(*kind, out)?;
            }
        }
        Ok(())
    }

    /// Check the table is self-consistent
    ///
    /// # Errors
    /// `ExtendedInfo` if a block appears twice, two blocks share a wire bit,
    /// or a block bit collides with an extension marker
    pub fn validate(&self) -> Result<()> {
        let markers = self.format.extend_short | self.format.extend_medium.unwrap_or(0);
        let mut seen_bits = 0u32;
        let mut seen_blocks = 0u32;
        for (kind, bit) in self.order {
            if bit.count_ones() != 1 || bit & (markers | seen_bits) != 0 {
                return Err(SyncError::ExtendedInfo(format!(
                    "{} layout: wire bit {:#x} of {:?} is reused",
                    self.platform.as_str(),
                    bit,
                    kind
                )));
            }
            if seen_blocks & kind.mask() != 0 {
                return Err(SyncError::ExtendedInfo(format!(
                    "{} layout: {:?} listed twice",
                    self.platform.as_str(),
                    kind
                )));
            }
            seen_bits |= bit;
            seen_blocks |= kind.mask();
        }
        Ok(())
    }
}
