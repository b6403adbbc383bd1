//! # World entity info
//!
//! Large moving structures tracked by player observers. Few exist at once,
//! so the packet is byte oriented and carries no extended info.

mod avatar;
mod info;

pub use avatar::{WorldEntityArgs, WorldEntityAvatar, ANGLE_UNITS};
pub use info::{
    WorldEntityInfo, WorldEntityLimits, MASK_MOVED, MASK_PRESENT, MASK_TELEPORTED, MASK_TURNED,
    WORLD_ENTITY_REMOVAL_RESERVE,
};

use crate::engine::ProtocolStats;
use info::WorldEntityFrame;
use rayon::prelude::*;
use std::sync::Arc;
use tilesync_config::InfoConfig;
use tilesync_core::{AvatarKind, CoordGrid, Platform, Result, SyncError};
use tilesync_protocol::{BufferRecycler, InfoPacket};
use tilesync_world::{AvatarPool, BitSet};

pub struct WorldEntityInfoProtocol {
    avatars: AvatarPool<WorldEntityAvatar>,
    infos: Vec<Option<WorldEntityInfo>>,
    limits: WorldEntityLimits,
    recycler: Arc<BufferRecycler>,
    released: BitSet,
}

impl WorldEntityInfoProtocol {
    pub fn new(config: &InfoConfig, recycler: Arc<BufferRecycler>) -> Self {
        Self {
            avatars: AvatarPool::new(
                AvatarKind::WorldEntity,
                config.world_entity_capacity,
                config.reclaim_capacity,
            ),
            infos: (0..config.player_capacity).map(|_| None).collect(),
            limits: WorldEntityLimits {
                add_limit: config.world_entity_add_limit,
                max_high_res: config.world_entity_max_high_res,
                view_distance: config.world_entity_view_distance,
                build_area_zones: config.build_area_zones,
                max_packet_size: config.max_packet_size,
            },
            recycler,
            released: BitSet::new(config.world_entity_capacity),
        }
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

    /// Spawn a world entity at slot `index`
    ///
    /// # Errors
    /// - `SlotOccupied` if the slot is live or was despawned this tick
    /// - `IndexOutOfRange` if `index >= capacity`
    pub fn spawn(&mut self, index: usize, args: WorldEntityArgs) -> Result<()> {
        if self.released.get(index) {
            return Err(SyncError::SlotOccupied(index));
        }
        self.avatars.alloc(index, args)?;
        Ok(())
    }

    pub fn despawn(&mut self, index: usize) -> bool {
        if !self.avatars.release(index) {
            return false;
        }
        self.released.set(index);
        true
    }

    #[inline]
    pub fn avatar(&self, index: usize) -> Option<&WorldEntityAvatar> {
        self.avatars.get(index)
    }

    #[inline]
    pub fn avatar_mut(&mut self, index: usize) -> Option<&mut WorldEntityAvatar> {
        self.avatars.get_mut(index)
    }

    pub fn move_to(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.avatars.relocate(index, coord)
    }

    pub fn teleport(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.avatars.relocate(index, coord)?;
        if let Some(avatar) = self.avatars.get_mut(index) {
            avatar.set_jump();
        }
        Ok(())
    }

    /// # Errors
    /// - `IndexOutOfRange` if `player` exceeds the observer capacity
    /// - `SlotOccupied` if `player` already observes
    pub fn add_observer(&mut self, player: usize, coord: CoordGrid, platform: Platform) -> Result<()> {
        let capacity = self.infos.len();
        let entity_capacity = self.capacity();
        let limits = &self.limits;
        let slot = self.infos.get_mut(player).ok_or(SyncError::IndexOutOfRange {
            index: player,
            capacity,
        })?;
        if slot.is_some() {
            return Err(SyncError::SlotOccupied(player));
        }
        *slot = Some(WorldEntityInfo::new(player, coord, platform, entity_capacity, limits));
        Ok(())
    }

    pub fn remove_observer(&mut self, player: usize) -> bool {
        self.infos.get_mut(player).and_then(Option::take).is_some()
    }

    #[inline]
    pub fn observer(&self, player: usize) -> Option<&WorldEntityInfo> {
        self.infos.get(player)?.as_ref()
    }

    pub fn sync_observer(&mut self, player: usize, coord: CoordGrid) {
        if let Some(info) = self.infos.get_mut(player).and_then(Option::as_mut) {
            info.sync(coord);
        }
    }

    pub fn compute(&mut self, workers: &rayon::ThreadPool) {
        let frame = WorldEntityFrame {
            avatars: &self.avatars,
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
    use crate::testing::{Seen, WorldEntityInfoDecoder};

    fn protocol() -> WorldEntityInfoProtocol {
        let config = InfoConfig {
            player_capacity: 4,
            world_entity_capacity: 8,
            ..InfoConfig::default()
        };
        WorldEntityInfoProtocol::new(&config, Arc::new(BufferRecycler::default()))
    }

    fn workers() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap()
    }

    fn tick(entities: &mut WorldEntityInfoProtocol, workers: &rayon::ThreadPool) {
        entities.compute(workers);
        entities.post_update();
    }

    fn receive(entities: &mut WorldEntityInfoProtocol, client: &mut WorldEntityInfoDecoder) -> Vec<Seen> {
        client.decode(&entities.take_packet(0).unwrap().payload).unwrap()
    }

    fn ship(coord: CoordGrid) -> WorldEntityArgs {
        WorldEntityArgs {
            coord,
            size_x: 1,
            size_z: 1,
            angle: 0,
        }
    }

    #[test]
    fn test_packet_ceiling_defers_moves_until_later_ticks() {
        let mut entities = protocol();
        let workers = workers();
        let origin = CoordGrid::new(0, 3200, 3200);
        entities.add_observer(0, origin, Platform::Desktop).unwrap();
        for i in 0..8 {
            entities.spawn(i, ship(origin.translate(i as i32, 2, 0).unwrap())).unwrap();
        }
        let mut client = WorldEntityInfoDecoder::default();
        tick(&mut entities, &workers);
        assert_eq!(receive(&mut entities, &mut client).len(), 8);

        // Room for three moved and turned entities per packet
        entities.limits.max_packet_size = WORLD_ENTITY_REMOVAL_RESERVE + 16;
        for step in 0..3 {
            for i in 0..8 {
                let next = entities.avatar(i).unwrap().coord().translate(0, 1, 0).unwrap();
                entities.move_to(i, next).unwrap();
                entities.avatar_mut(i).unwrap().set_angle(100 * (step + 1));
            }
            tick(&mut entities, &workers);
            assert_eq!(entities.stats().deferred, 5);
            assert_eq!(entities.stats().aborted, 0);
            receive(&mut entities, &mut client);
            for i in 0..8 {
                assert_eq!(client.entity(i).map(|e| e.coord), entities.observer(0).unwrap().known_coord(i));
            }
        }

        for _ in 0..3 {
            tick(&mut entities, &workers);
            receive(&mut entities, &mut client);
            for i in 0..8 {
                assert_eq!(client.entity(i).map(|e| e.coord), entities.observer(0).unwrap().known_coord(i));
            }
        }
        assert_eq!(entities.stats().deferred, 0);
        for i in 0..8 {
            let entity = client.entity(i).unwrap();
            let avatar = entities.avatar(i).unwrap();
            assert_eq!((entity.coord, entity.angle), (avatar.coord(), 300));
        }
    }

    #[test]
    fn test_aborted_packet_still_removes_despawned_entity() {
        let mut entities = protocol();
        let workers = workers();
        let origin = CoordGrid::new(0, 3200, 3200);
        entities.add_observer(0, origin, Platform::Desktop).unwrap();
        let first = origin.translate(3, 3, 0).unwrap();
        entities.spawn(2, ship(first)).unwrap();
        let mut client = WorldEntityInfoDecoder::default();
        tick(&mut entities, &workers);
        assert_eq!(receive(&mut entities, &mut client), vec![Seen::Added(2)]);

        assert!(entities.despawn(2));
        let limit = entities.limits.max_packet_size;
        entities.limits.max_packet_size = 0;
        tick(&mut entities, &workers);
        assert_eq!(entities.stats().aborted, 1);
        assert!(entities.take_packet(0).is_none());
        entities.limits.max_packet_size = limit;

        let second = first.translate(1, 0, 0).unwrap();
        entities.spawn(2, ship(second)).unwrap();
        tick(&mut entities, &workers);
        assert_eq!(receive(&mut entities, &mut client), vec![Seen::Removed(2), Seen::Added(2)]);
        assert_eq!(client.entity(2).unwrap().coord, second);
    }
}
