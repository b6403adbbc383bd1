//! # Player info
//!
//! Every observer tracks up to `max_high_res` nearby players in high
//! resolution (exact coordinates, movement opcodes, extended info) and keeps
//! an 18-bit low-resolution position for every other player slot.
//!
//! ## Tick phases
//!
//! 1. [`PlayerInfoProtocol::prepare`]: movement records and extended info are
//!    encoded once per avatar, low-res positions refreshed, build areas moved
//! 2. [`PlayerInfoProtocol::compute`]: one packet per observer, in parallel
//! 3. [`PlayerInfoProtocol::post_update`]: taints applied, transient state
//!    cleared, coordinates rolled

mod avatar;
mod info;

pub use avatar::{PlayerArgs, PlayerAvatar};
pub use info::{PlayerInfo, PlayerLimits, PLAYER_REMOVAL_RESERVE};

use crate::engine::ProtocolStats;
use crate::extinfo::PlayerEncoders;
use bytes::BytesMut;
use info::PlayerFrame;
use rayon::prelude::*;
use std::sync::Arc;
use tilesync_config::InfoConfig;
use tilesync_core::{AvatarKind, CoordGrid, Platform, PlatformMap, Result, SyncError};
use tilesync_protocol::{BufferRecycler, InfoPacket};
use tilesync_world::{AvatarPool, BitSet, LowResPositionRepository};

/// Player avatars and the observers watching them
pub struct PlayerInfoProtocol {
    avatars: AvatarPool<PlayerAvatar>,
    infos: Vec<Option<PlayerInfo>>,
    lowres: LowResPositionRepository,
    encoders: PlatformMap<PlayerEncoders>,
    limits: PlayerLimits,
    recycler: Arc<BufferRecycler>,
    observers: [usize; Platform::COUNT],
    released: BitSet,
}

impl PlayerInfoProtocol {
    /// Create the protocol
    ///
    /// # Errors
    /// `ExtendedInfo` if an encoder layout is inconsistent
    pub fn new(
        config: &InfoConfig,
        encoders: PlatformMap<PlayerEncoders>,
        recycler: Arc<BufferRecycler>,
    ) -> Result<Self> {
        for (_, set) in encoders.iter() {
            set.layout.validate()?;
        }
        let capacity = config.player_capacity;
        Ok(Self {
            avatars: AvatarPool::new(AvatarKind::Player, capacity, config.reclaim_capacity),
            infos: (0..capacity).map(|_| None).collect(),
            lowres: LowResPositionRepository::new(capacity),
            encoders,
            limits: PlayerLimits {
                add_limit: config.player_add_limit,
                max_high_res: config.player_max_high_res,
                view_distance: config.player_view_distance,
                build_area_zones: config.build_area_zones,
                max_packet_size: config.max_packet_size,
            },
            recycler,
            observers: [0; Platform::COUNT],
            released: BitSet::new(capacity),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    /// Log a player in at slot `index`
    ///
    /// # Returns
    /// The init block the login packet embeds
    ///
    /// # Errors
    /// - `InvalidArgument` if no encoders exist for `platform` or `coord` is invalid
    /// - `SlotOccupied` if the slot is live or was released this tick
    /// - `IndexOutOfRange` if `index >= capacity`
    pub fn alloc(&mut self, index: usize, coord: CoordGrid, platform: Platform) -> Result<BytesMut> {
        if !self.encoders.contains(platform) {
            return Err(SyncError::InvalidArgument(format!(
                "platform {} is not enabled",
                platform.as_str()
            )));
        }
        if self.released.get(index) {
            return Err(SyncError::SlotOccupied(index));
        }
        let args = PlayerArgs {
            coord,
            platform,
            recycler: Arc::clone(&self.recycler),
        };
        self.avatars.alloc(index, args)?;

        let mut info = PlayerInfo::new(index, coord, platform, self.capacity(), &self.limits);
        let mut init = BytesMut::with_capacity(self.capacity() * 18 / 8 + 8);
        if let Err(e) = info.write_init(&mut init, coord, &self.lowres) {
            self.avatars.destroy(index);
            return Err(e);
        }
        self.lowres.update(index, coord);
        self.infos[index] = Some(info);
        self.observers[platform.index()] += 1;
        tracing::debug!("Player {} logged in on {} at {}", index, platform.as_str(), coord);
        Ok(init)
    }

    /// Log the player at `index` out
    ///
    /// The slot cannot be reallocated until the tick ends, so every observer
    /// first sees the removal.
    pub fn release(&mut self, index: usize) -> bool {
        let Some(info) = self.infos.get_mut(index).and_then(Option::take) else {
            return false;
        };
        self.observers[info.platform().index()] -= 1;
        self.released.set(index);
        self.avatars.release(index)
    }

    #[inline]
    pub fn avatar(&self, index: usize) -> Option<&PlayerAvatar> {
        self.avatars.get(index)
    }

    /// Mutable access for extended info and priority
    #[inline]
    pub fn avatar_mut(&mut self, index: usize) -> Option<&mut PlayerAvatar> {
        self.avatars.get_mut(index)
    }

    #[inline]
    pub fn avatars(&self) -> &AvatarPool<PlayerAvatar> {
        &self.avatars
    }

    #[inline]
    pub fn info(&self, index: usize) -> Option<&PlayerInfo> {
        self.infos.get(index)?.as_ref()
    }

    #[inline]
    pub fn info_mut(&mut self, index: usize) -> Option<&mut PlayerInfo> {
        self.infos.get_mut(index)?.as_mut()
    }

    /// Move a player; observers receive a compass opcode when possible
    pub fn move_to(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.avatars.relocate(index, coord)
    }

    /// Move a player and force an absolute coordinate
    pub fn teleport(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.avatars.relocate(index, coord)?;
        if let Some(avatar) = self.avatars.get_mut(index) {
            avatar.set_jump();
        }
        Ok(())
    }

    /// Precompute barrier before the parallel phase
    pub fn prepare(&mut self) {
        let mut failed = Vec::new();
        for (index, avatar) in self.avatars.iter_mut() {
            if let Err(e) = avatar.prepare() {
                tracing::warn!("Movement of player {} not precomputed: {}", index, e);
                failed.push(index);
            }
            self.lowres.update(index, avatar.coord());
            for platform in Platform::ALL {
                if self.observers[platform.index()] == 0 {
                    continue;
                }
                let Some(encoders) = self.encoders.get(platform) else {
                    continue;
                };
                if let Err(e) = avatar.ext_mut().precompute(encoders) {
                    tracing::warn!(
                        "Extended info of player {} not precomputed for {}: {}",
                        index,
                        platform.as_str(),
                        e
                    );
                    failed.push(index);
                }
            }
        }
        for index in failed {
            self.avatars.taint(index);
        }

        for (index, slot) in self.infos.iter_mut().enumerate() {
            if let (Some(info), Some(avatar)) = (slot.as_mut(), self.avatars.get(index)) {
                info.sync(avatar.coord());
            }
        }
    }

    /// Build every observer's packet on `workers`
    pub fn compute(&mut self, workers: &rayon::ThreadPool) {
        let frame = PlayerFrame {
            avatars: &self.avatars,
            lowres: &self.lowres,
            encoders: &self.encoders,
            limits: &self.limits,
            recycler: &self.recycler,
            released: &self.released,
        };
        let infos = &mut self.infos;
        workers.install(|| {
            infos.par_iter_mut().for_each(|slot| {
                if let Some(info) = slot {
                    info.compute(&frame);
                }
            })
        });
    }

    /// End of tick
    pub fn post_update(&mut self) {
        for info in self.infos.iter_mut().flatten() {
            for &index in info.tainted() {
                self.avatars.taint(index);
            }
            info.post_update();
        }
        for (_, avatar) in self.avatars.iter_mut() {
            avatar.post_update();
        }
        self.lowres.roll();
        self.released.clear();
    }

    pub fn take_packet(&mut self, index: usize) -> Option<InfoPacket> {
        self.info_mut(index)?.take_packet()
    }

    pub fn stats(&self) -> ProtocolStats {
        let mut stats = ProtocolStats::default();
        for info in self.infos.iter().flatten() {
            info.stats(&mut stats);
        }
        stats
    }
}
