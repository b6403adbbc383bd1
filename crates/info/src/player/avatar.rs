//! Player avatar

use crate::extinfo::PlayerExtendedInfo;
use crate::movement::Movement;
use std::sync::Arc;
use tilesync_core::{AvatarKind, AvatarPriority, CoordGrid, Platform, Result};
use tilesync_protocol::{BitScratch, BufferRecycler};
use tilesync_world::Poolable;

/// Construction arguments for a [`PlayerAvatar`]
#[derive(Debug, Clone)]
pub struct PlayerArgs {
    pub coord: CoordGrid,
    pub platform: Platform,
    pub recycler: Arc<BufferRecycler>,
}

/// Server-side state of one player as others see it
#[derive(Debug)]
pub struct PlayerAvatar {
    index: usize,
    coord: CoordGrid,
    last_coord: CoordGrid,
    platform: Platform,
    priority: AvatarPriority,
    jump: bool,
    movement: Movement,
    record: BitScratch,
    ext: PlayerExtendedInfo,
}

impl PlayerAvatar {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn coord(&self) -> CoordGrid {
        self.coord
    }

    /// Coordinate at the end of the previous tick
    #[inline]
    pub fn last_coord(&self) -> CoordGrid {
        self.last_coord
    }

    #[inline]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    #[inline]
    pub fn priority(&self) -> AvatarPriority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: AvatarPriority) {
        self.priority = priority;
    }

    /// Whether this tick's move must be sent as an absolute coordinate
    #[inline]
    pub fn is_jumping(&self) -> bool {
        self.jump
    }

    pub(crate) fn set_jump(&mut self) {
        self.jump = true;
    }

    /// Movement from the last coordinate, valid after the precompute phase
    #[inline]
    pub fn movement(&self) -> Movement {
        self.movement
    }

    /// High-resolution record type and payload shared by every observer that
    /// last saw this avatar at [`last_coord`](Self::last_coord); empty when
    /// stationary
    #[inline]
    pub fn record(&self) -> &BitScratch {
        &self.record
    }

    #[inline]
    pub fn ext(&self) -> &PlayerExtendedInfo {
        &self.ext
    }

    #[inline]
    pub fn ext_mut(&mut self) -> &mut PlayerExtendedInfo {
        &mut self.ext
    }

    pub(crate) fn prepare(&mut self) -> Result<()> {
        self.movement = Movement::between(self.last_coord, self.coord, self.jump);
        self.record.clear();
        super::info::write_movement(&mut self.record, self.movement)
    }

    pub(crate) fn post_update(&mut self) {
        self.last_coord = self.coord;
        self.jump = false;
        self.movement = Movement::Stationary;
        self.record.clear();
        self.ext.post_update();
    }
}

impl Poolable for PlayerAvatar {
    type Args = PlayerArgs;

    fn create(index: usize, args: PlayerArgs) -> Self {
        Self {
            index,
            coord: args.coord,
            last_coord: args.coord,
            platform: args.platform,
            priority: AvatarKind::Player.default_priority(),
            jump: false,
            movement: Movement::Stationary,
            record: BitScratch::new(),
            ext: PlayerExtendedInfo::new(args.recycler),
        }
    }

    fn on_alloc(&mut self, index: usize, args: PlayerArgs) {
        self.index = index;
        self.coord = args.coord;
        self.last_coord = args.coord;
        self.platform = args.platform;
        self.priority = AvatarKind::Player.default_priority();
        self.jump = false;
        self.movement = Movement::Stationary;
        self.record.clear();
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
