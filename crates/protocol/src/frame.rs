//! # Outgoing frame metadata
//!
//! The channel pipeline frames and flushes packets; this module only declares
//! which frame each info packet uses and the payload ceiling that implies.
//!
//! ## Frame kinds
//!
//! - **Fixed**: payload length known by both sides
//! - **VarByte**: one length byte, payload 0-255 bytes
//! - **VarShort**: two length bytes, payload 0-40,000 bytes
//!
//! Exceeding the ceiling aborts the packet, never the connection.

use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tilesync_core::{Result, SyncError};

/// Largest payload a var-byte frame may carry
pub const VAR_BYTE_CEILING: usize = 255;

/// Largest payload a var-short frame may carry
pub const VAR_SHORT_CEILING: usize = 40_000;

/// Length prefix of an outgoing frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Fixed(usize),
    VarByte,
    VarShort,
}

impl FrameKind {
    /// Largest payload this frame kind can declare
    pub const fn ceiling(self) -> usize {
        match self {
            FrameKind::Fixed(size) => size,
            FrameKind::VarByte => VAR_BYTE_CEILING,
            FrameKind::VarShort => VAR_SHORT_CEILING,
        }
    }

    /// Check a finished payload against the frame ceiling
    pub fn check(self, size: usize) -> Result<()> {
        let limit = self.ceiling();
        let fits = match self {
            FrameKind::Fixed(expected) => size == expected,
            _ => size <= limit,
        };
        if fits {
            Ok(())
        } else {
            Err(SyncError::PacketTooLarge { size, limit })
        }
    }
}

/// Server-to-client packets produced by this engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerProt {
    /// Player movement and extended info for one observer
    PlayerInfo = 0,

    /// NPC info with 5-bit relative spawn offsets (view distance <= 15)
    NpcInfoSmall = 1,

    /// NPC info with 8-bit relative spawn offsets
    NpcInfoLarge = 2,

    /// World entity movement
    WorldEntityInfo = 3,
}

impl ServerProt {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn frame(self) -> FrameKind {
        match self {
            ServerProt::PlayerInfo
            | ServerProt::NpcInfoSmall
            | ServerProt::NpcInfoLarge
            | ServerProt::WorldEntityInfo => FrameKind::VarShort,
        }
    }
}

/// One observer's packet for one tick, ready for the pipeline
///
/// The payload is shared with the buffer recycler, which reclaims it once the
/// pipeline drops its clone.
#[derive(Debug, Clone)]
pub struct InfoPacket {
    pub prot: ServerProt,
    pub payload: Arc<BytesMut>,
}

impl InfoPacket {
    pub fn new(prot: ServerProt, payload: Arc<BytesMut>) -> Self {
        Self { prot, payload }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Write opcode, length prefix and payload, as a pipeline would
    pub fn write_framed(&self, out: &mut BytesMut) -> Result<()> {
        let frame = self.prot.frame();
        frame.check(self.len())?;
        out.put_u8(self.prot.as_u8());
        match frame {
            FrameKind::Fixed(_) => {}
            FrameKind::VarByte => out.put_u8(self.len() as u8),
            FrameKind::VarShort => out.put_u16(self.len() as u16),
        }
        out.put_slice(&self.payload);
        Ok(())
    }
}
