//! # NPC info
//!
//! NPCs have no low-resolution stream: an observer tracks up to
//! `npc_max_high_res` of them in packet order and learns of the rest only
//! when they are added. Observers are player slots; the engine keeps them in
//! step with [`PlayerInfoProtocol`](crate::player::PlayerInfoProtocol).

mod avatar;
mod info;

pub use avatar::{NpcArgs, NpcAvatar, MAX_NPC_ID};
pub use info::{NpcInfo, NpcLimits, NPC_REMOVAL_RESERVE, SMALL_VIEW_DISTANCE};

use crate::engine::ProtocolStats;
use crate::extinfo::NpcEncoders;
use info::NpcFrame;
use rayon::prelude::*;
use std::sync::Arc;
use tilesync_config::InfoConfig;
use tilesync_core::{AvatarKind, CoordGrid, Platform, PlatformMap, Result, SyncError};
use tilesync_protocol::{BufferRecycler, InfoPacket};
use tilesync_world::{AvatarPool, BitSet};

/// NPC avatars and the player observers watching them
pub struct NpcInfoProtocol {
    avatars: AvatarPool<NpcAvatar>,
    infos: Vec<Option<NpcInfo>>,
    encoders: PlatformMap<NpcEncoders>,
    limits: NpcLimits,
    recycler: Arc<BufferRecycler>,
    observers: [usize; Platform::COUNT],
    released: BitSet,
}

impl NpcInfoProtocol {
    /// Create the protocol
    ///
    /// # Arguments
    /// * `config` - capacities and limits; observers are sized by `player_capacity`
    /// * `encoders` - one encoder set per enabled platform
    /// * `recycler` - shared buffer recycler
    pub fn new(
        config: &InfoConfig,
        encoders: PlatformMap<NpcEncoders>,
        recycler: Arc<BufferRecycler>,
    ) -> Result<Self> {
        for (_, set) in encoders.iter() {
            set.layout.validate()?;
        }
        Ok(Self {
            avatars: AvatarPool::new(AvatarKind::Npc, config.npc_capacity, config.reclaim_capacity),
            infos: (0..config.player_capacity).map(|_| None).collect(),
            encoders,
            limits: NpcLimits {
                add_limit: config.npc_add_limit,
                max_high_res: config.npc_max_high_res,
                view_distance: config.npc_view_distance,
                build_area_zones: config.build_area_zones,
                max_packet_size: config.max_packet_size,
            },
            recycler,
            observers: [0; Platform::COUNT],
            released: BitSet::new(config.npc_capacity),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.avatars.capacity()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.avatars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.avatars.is_empty()
    }

    /// Spawn an NPC of type `id` at slot `index`
    ///
    /// # Errors
    /// - `InvalidArgument` if `id` exceeds [`MAX_NPC_ID`]
    /// - `SlotOccupied` if the slot is live or was despawned this tick
    /// - `IndexOutOfRange` if `index >= capacity`
    pub fn spawn(&mut self, index: usize, id: u16, coord: CoordGrid, direction: u8) -> Result<()> {
        if id > MAX_NPC_ID {
            return Err(SyncError::InvalidArgument(format!(
                "npc id {} exceeds {}",
                id, MAX_NPC_ID
            )));
        }
        if self.released.get(index) {
            return Err(SyncError::SlotOccupied(index));
        }
        let args = NpcArgs {
            id,
            coord,
            direction,
            recycler: Arc::clone(&self.recycler),
        };
        self.avatars.alloc(index, args)?;
        tracing::debug!("NPC {} (type {}) spawned at {}", index, id, coord);
        Ok(())
    }

    /// Despawn the NPC at `index`; observers remove it on the next packet
    pub fn despawn(&mut self, index: usize) -> bool {
        if !self.avatars.release(index) {
            return false;
        }
        self.released.set(index);
        true
    }

    #[inline]
    pub fn avatar(&self, index: usize) -> Option<&NpcAvatar> {
        self.avatars.get(index)
    }

    #[inline]
    pub fn avatar_mut(&mut self, index: usize) -> Option<&mut NpcAvatar> {
        self.avatars.get_mut(index)
    }

    #[inline]
    pub fn avatars(&self) -> &AvatarPool<NpcAvatar> {
        &self.avatars
    }

    pub fn move_to(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.avatars.relocate(index, coord)
    }

    /// Move an NPC and make observers re-add it at the new coordinate
    pub fn teleport(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.avatars.relocate(index, coord)?;
        if let Some(avatar) = self.avatars.get_mut(index) {
            avatar.set_jump();
        }
        Ok(())
    }

    /// Start building NPC packets for player `player`
    ///
    /// # Errors
    /// - `InvalidArgument` if `platform` has no encoders
    /// - `IndexOutOfRange` if `player` exceeds the observer capacity
    /// - `SlotOccupied` if `player` already observes
    pub fn add_observer(&mut self, player: usize, coord: CoordGrid, platform: Platform) -> Result<()> {
        if !self.encoders.contains(platform) {
            return Err(SyncError::InvalidArgument(format!(
                "platform {} is not enabled",
                platform.as_str()
            )));
        }
        let capacity = self.infos.len();
        let npc_capacity = self.capacity();
        let limits = &self.limits;
        let slot = self.infos.get_mut(player).ok_or(SyncError::IndexOutOfRange {
            index: player,
            capacity,
        })?;
        if slot.is_some() {
            return Err(SyncError::SlotOccupied(player));
        }
        *slot = Some(NpcInfo::new(player, coord, platform, npc_capacity, limits));
        self.observers[platform.index()] += 1;
        Ok(())
    }

    pub fn remove_observer(&mut self, player: usize) -> bool {
        let Some(info) = self.infos.get_mut(player).and_then(Option::take) else {
            return false;
        };
        self.observers[info.platform().index()] -= 1;
        true
    }

    #[inline]
    pub fn observer(&self, player: usize) -> Option<&NpcInfo> {
        self.infos.get(player)?.as_ref()
    }

    /// Change one observer's view distance
    pub fn set_view_distance(&mut self, player: usize, distance: u32) -> bool {
        match self.infos.get_mut(player).and_then(Option::as_mut) {
            Some(info) => {
                info.set_view_distance(distance);
                true
            }
            None => false,
        }
    }

    /// Move an observer's viewpoint
    pub fn sync_observer(&mut self, player: usize, coord: CoordGrid) {
        if let Some(info) = self.infos.get_mut(player).and_then(Option::as_mut) {
            info.sync(coord);
        }
    }

    /// Precompute barrier before the parallel phase
    pub fn prepare(&mut self) {
        let mut failed = Vec::new();
        for (index, avatar) in self.avatars.iter_mut() {
            avatar.prepare();
            for platform in Platform::ALL {
                if self.observers[platform.index()] == 0 {
                    continue;
                }
                let Some(encoders) = self.encoders.get(platform) else {
                    continue;
                };
                if let Err(e) = avatar.ext_mut().precompute(encoders) {
                    tracing::warn!(
                        "Extended info of NPC {} not precomputed for {}: {}",
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
    }

    /// Build every observer's packet on `workers`
    pub fn compute(&mut self, workers: &rayon::ThreadPool) {
        let frame = NpcFrame {
            avatars: &self.avatars,
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

    pub fn post_update(&mut self) {
        for info in self.infos.iter().flatten() {
            for &index in info.tainted() {
                self.avatars.taint(index);
            }
        }
        for (_, avatar) in self.avatars.iter_mut() {
            avatar.post_update();
        }
        self.released.clear();
    }

    pub fn take_packet(&mut self, player: usize) -> Option<InfoPacket> {
        self.infos.get_mut(player)?.as_mut()?.take_packet()
    }

    pub fn stats(&self) -> ProtocolStats {
        let mut stats = ProtocolStats::default();
        for info in self.infos.iter().flatten() {
            info.stats(&mut stats);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extinfo::desktop;
    use crate::testing::{NpcInfoDecoder, Seen};

    fn protocol() -> NpcInfoProtocol {
        let config = InfoConfig {
            player_capacity: 8,
            npc_capacity: 16,
            ..InfoConfig::default()
        };
        let encoders = PlatformMap::new().with(Platform::Desktop, desktop::npc_encoders());
        NpcInfoProtocol::new(&config, encoders, Arc::new(BufferRecycler::default())).unwrap()
    }

    #[test]
    fn test_spawn_rejects_large_id() {
        let mut npcs = protocol();
        let coord = CoordGrid::new(0, 3200, 3200);
        assert!(matches!(
            npcs.spawn(0, MAX_NPC_ID + 1, coord, 0),
            Err(SyncError::InvalidArgument(_))
        ));
        npcs.spawn(0, MAX_NPC_ID, coord, 9).unwrap();
        assert_eq!(npcs.avatar(0).unwrap().direction(), 1);
    }

    #[test]
    fn test_despawned_slot_reserved_until_tick_end() {
        let mut npcs = protocol();
        let coord = CoordGrid::new(0, 3200, 3200);
        npcs.spawn(3, 10, coord, 0).unwrap();
        assert!(npcs.despawn(3));
        assert!(!npcs.despawn(3));
        assert!(matches!(npcs.spawn(3, 10, coord, 0), Err(SyncError::SlotOccupied(3))));
        npcs.post_update();
        npcs.spawn(3, 11, coord, 0).unwrap();
    }

    #[test]
    fn test_observer_platform_must_be_enabled() {
        let mut npcs = protocol();
        let coord = CoordGrid::new(0, 3200, 3200);
        assert!(npcs.add_observer(0, coord, Platform::Mobile).is_err());
        npcs.add_observer(0, coord, Platform::Desktop).unwrap();
        assert!(matches!(
            npcs.add_observer(0, coord, Platform::Desktop),
            Err(SyncError::SlotOccupied(0))
        ));
        assert!(npcs.add_observer(8, coord, Platform::Desktop).is_err());
        assert!(npcs.remove_observer(0));
        assert!(!npcs.remove_observer(0));
    }

    #[test]
    fn test_aborted_packet_still_removes_despawned_npc() {
        let mut npcs = protocol();
        let workers = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let origin = CoordGrid::new(0, 3200, 3200);
        npcs.add_observer(0, origin, Platform::Desktop).unwrap();
        let first = origin.translate(1, 1, 0).unwrap();
        npcs.spawn(3, 10, first, 0).unwrap();
        let tick = |npcs: &mut NpcInfoProtocol| {
            npcs.prepare();
            npcs.compute(&workers);
            npcs.post_update();
        };
        tick(&mut npcs);
        let mut client = NpcInfoDecoder::default();
        client.decode(&npcs.take_packet(0).unwrap(), origin).unwrap();
        assert_eq!(client.coord(3), Some(first));

        assert!(npcs.despawn(3));
        let limit = npcs.limits.max_packet_size;
        npcs.limits.max_packet_size = 0;
        npcs.prepare();
        npcs.compute(&workers);
        assert_eq!(npcs.stats().aborted, 1);
        npcs.post_update();
        npcs.limits.max_packet_size = limit;

        let second = first.translate(1, 0, 0).unwrap();
        npcs.spawn(3, 11, second, 0).unwrap();
        tick(&mut npcs);
        let update = client.decode(&npcs.take_packet(0).unwrap(), origin).unwrap();
        assert_eq!(update.seen, vec![Seen::Removed(3), Seen::Added(3)]);
        assert_eq!(update.adds[0].id, 11);
        assert_eq!(client.coord(3), Some(second));
    }

    #[test]
    fn test_view_distance_selects_packet() {
        let mut npcs = protocol();
        npcs.add_observer(1, CoordGrid::new(0, 3200, 3200), Platform::Desktop).unwrap();
        assert_eq!(npcs.observer(1).unwrap().prot(), tilesync_protocol::ServerProt::NpcInfoSmall);
        assert!(npcs.set_view_distance(1, 60));
        assert_eq!(npcs.observer(1).unwrap().prot(), tilesync_protocol::ServerProt::NpcInfoLarge);
        assert!(!npcs.set_view_distance(2, 60));
    }
}
