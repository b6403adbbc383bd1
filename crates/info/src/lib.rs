//! # tilesync info
//!
//! Per-tick avatar info broadcasting: for every observer, a compressed delta
//! of the players, NPCs and world entities it can see.
//!
//! ## Modules
//!
//! - [`extinfo`]: extended info blocks, their per-platform layouts and codecs
//! - [`movement`]: movement classification shared by every protocol
//! - [`player`]: player info with high- and low-resolution sections
//! - [`npc`]: NPC info in small and large variants
//! - [`worldentity`]: byte-oriented world entity info
//! - [`engine`]: the tick driver owning all three protocols
//!
//! ## Usage Example
//!
//! ```rust
//! use tilesync_config::InfoConfig;
//! use tilesync_core::{CoordGrid, Platform};
//! use tilesync_info::InfoEngine;
//!
//! let config = InfoConfig {
//!     player_capacity: 16,
//!     npc_capacity: 16,
//!     world_entity_capacity: 4,
//!     worker_threads: 1,
//!     ..InfoConfig::default()
//! };
//! let mut engine = InfoEngine::new(&config).unwrap();
//! let _init = engine.alloc_player(0, CoordGrid::new(0, 3200, 3200), Platform::Desktop).unwrap();
//! engine.alloc_player(1, CoordGrid::new(0, 3201, 3200), Platform::Desktop).unwrap();
//!
//! let report = engine.tick();
//! assert_eq!(report.players.packets, 2);
//! let packet = engine.take_player_packet(0).unwrap();
//! assert!(!packet.is_empty());
//! ```

mod carry;
pub mod engine;
pub mod extinfo;
pub mod movement;
pub mod npc;
pub mod player;
pub mod worldentity;

#[cfg(test)]
mod testing;

pub use engine::{InfoEngine, ProtocolStats, TickReport};
pub use movement::Movement;
pub use npc::NpcInfoProtocol;
pub use player::PlayerInfoProtocol;
pub use worldentity::WorldEntityInfoProtocol;
