//! # tilesync protocol
//!
//! Wire-level building blocks shared by every info protocol.
//!
//! ## Modules
//!
//! ### Bit buffer ([`bitbuf`])
//! MSB-first bit writer/reader used for movement records, plus a register
//! scratch for records computed once and copied into many packets.
//!
//! ### Codecs ([`codecs`])
//! Byte writers and readers for extended info fields, including the
//! `add`/`neg`/`sub` transforms some platforms apply.
//!
//! ### Movement tables ([`movement`])
//! Compile-time delta to compass opcode tables for one- and two-tile steps.
//!
//! ### Frames ([`frame`])
//! Server packet ids, frame kinds and their payload ceilings.
//!
//! ### Buffer recycler ([`recycler`])
//! Deferred release of buffers shared across observers and the pipeline.
//!
//! ## Usage Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use tilesync_protocol::{BitReader, BitWriter, Step};
//!
//! let mut buf = BytesMut::new();
//! let mut writer = BitWriter::new(&mut buf, 16);
//! writer.p_bits(1, 1).unwrap();
//! if let Some(Step::Walk(opcode)) = Step::resolve(1, 0) {
//!     writer.p_bits(3, opcode).unwrap();
//! }
//! writer.finish();
//!
//! let mut reader = BitReader::new(&buf);
//! assert_eq!(reader.g_bits(1).unwrap(), 1);
//! assert_eq!(reader.g_bits(3).unwrap(), 4);
//! ```

pub mod bitbuf;
pub mod codecs;
pub mod frame;
pub mod movement;
pub mod recycler;

// Re-export commonly used items
pub use bitbuf::*;
pub use codecs::*;
pub use frame::*;
pub use movement::*;
pub use recycler::*;
