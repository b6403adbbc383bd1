//! # tilesync world
//!
//! Spatial and slot bookkeeping for every trackable avatar kind.
//!
//! ## Features
//! - Zone index: 8x8-tile buckets for bounded range queries
//! - Build area: the zone rectangle an observer's client has loaded
//! - Avatar pool: index-addressed slots with LRU reuse of released avatars
//! - Flag sets: fixed-capacity bitsets, double-buffered per tick
//! - Low-resolution position repository for the player low-res stream
//!
//! ## Invariant
//!
//! An allocated avatar's index sits in exactly one zone bucket, the one
//! matching its current coordinate. Coordinates only change through
//! [`AvatarPool::relocate`], which updates the bucket in the same call.

pub mod build_area;
pub mod flags;
pub mod lowres;
pub mod pool;
pub mod zone;

pub use build_area::BuildArea;
pub use flags::{BitSet, DoubleBufferedBits, ObserverExtFlags};
pub use lowres::LowResPositionRepository;
pub use pool::{AvatarPool, Poolable};
pub use zone::{ZoneIndex, ZoneRect};
