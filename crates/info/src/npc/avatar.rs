//! NPC avatar

use crate::extinfo::NpcExtendedInfo;
use crate::movement::Movement;
use std::sync::Arc;
use tilesync_core::{AvatarKind, AvatarPriority, CoordGrid};
use tilesync_protocol::BufferRecycler;
use tilesync_world::Poolable;

/// Largest NPC type id the add record can carry
pub const MAX_NPC_ID: u16 = 0x3FFF;

#[derive(Debug, Clone)]
pub struct NpcArgs {
    pub id: u16,
    pub coord: CoordGrid,
    /// Spawn direction, 0-7
    pub direction: u8,
    pub recycler: Arc<BufferRecycler>,
}

#[derive(Debug)]
pub struct NpcAvatar {
    index: usize,
    id: u16,
    coord: CoordGrid,
    last_coord: CoordGrid,
    direction: u8,
    priority: AvatarPriority,
    jump: bool,
    movement: Movement,
    ext: NpcExtendedInfo,
}

impl NpcAvatar {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[inline]
    pub fn coord(&self) -> CoordGrid {
        self.coord
    }

    #[inline]
    pub fn last_coord(&self) -> CoordGrid {
        self.last_coord
    }

    #[inline]
    pub fn direction(&self) -> u8 {
        self.direction
    }

    #[inline]
    pub fn priority(&self) -> AvatarPriority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: AvatarPriority) {
        self.priority = priority;
    }

    #[inline]
    pub fn is_jumping(&self) -> bool {
        self.jump
    }

    pub(crate) fn set_jump(&mut self) {
        self.jump = true;
    }

    #[inline]
    pub fn movement(&self) -> Movement {
        self.movement
    }

    #[inline]
    pub fn ext(&self) -> &NpcExtendedInfo {
        &self.ext
    }

    #[inline]
    pub fn ext_mut(&mut self) -> &mut NpcExtendedInfo {
        &mut self.ext
    }

    pub(crate) fn prepare(&mut self) {
        self.movement = Movement::between(self.last_coord, self.coord, self.jump);
    }

    pub(crate) fn post_update(&mut self) {
        self.last_coord = self.coord;
        self.jump = false;
        self.movement = Movement::Stationary;
        self.ext.post_update();
    }
}

impl Poolable for NpcAvatar {
    type Args = NpcArgs;

    fn create(index: usize, args: NpcArgs) -> Self {
        Self {
            index,
            id: args.id,
            coord: args.coord,
            last_coord: args.coord,
            direction: args.direction & 0x7,
            priority: AvatarKind::Npc.default_priority(),
            jump: false,
            movement: Movement::Stationary,
            ext: NpcExtendedInfo::new(args.recycler),
        }
    }

    fn on_alloc(&mut self, index: usize, args: NpcArgs) {
        self.index = index;
        self.id = args.id;
        self.coord = args.coord;
        self.last_coord = args.coord;
        self.direction = args.direction & 0x7;
        self.priority = AvatarKind::Npc.default_priority();
        self.jump = false;
        self.movement = Movement::Stationary;
        self.ext.reset();
    }

    fn on_dealloc(&mut self) {
        self.ext.reset();
    }

    fn coord(&self) -> CoordGrid {
        self.coord
    }

    fn set_coord(&mut self, coord: CoordGrid) {
        self.coord = coord;
    }
}
