//! World entity avatar

use tilesync_core::{AvatarKind, AvatarPriority, CoordGrid};
use tilesync_world::Poolable;

/// Angle units in a full turn
pub const ANGLE_UNITS: u16 = 2048;

#[derive(Debug, Clone, Copy)]
pub struct WorldEntityArgs {
    pub coord: CoordGrid,
    /// Footprint in zones
    pub size_x: u8,
    pub size_z: u8,
    pub angle: u16,
}

/// A moving multi-tile structure such as a ship
#[derive(Debug)]
pub struct WorldEntityAvatar {
    index: usize,
    coord: CoordGrid,
    last_coord: CoordGrid,
    angle: u16,
    last_angle: u16,
    size_x: u8,
    size_z: u8,
    priority: AvatarPriority,
    jump: bool,
}

impl WorldEntityAvatar {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
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
    pub fn angle(&self) -> u16 {
        self.angle
    }

    /// Turn to `angle`, taken modulo [`ANGLE_UNITS`]
    pub fn set_angle(&mut self, angle: u16) {
        self.angle = angle % ANGLE_UNITS;
    }

    #[inline]
    pub fn last_angle(&self) -> u16 {
        self.last_angle
    }

    #[inline]
    pub fn size(&self) -> (u8, u8) {
        (self.size_x, self.size_z)
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

    pub(crate) fn post_update(&mut self) {
        self.last_coord = self.coord;
        self.last_angle = self.angle;
        self.jump = false;
    }
}

impl Poolable for WorldEntityAvatar {
    type Args = WorldEntityArgs;

    fn create(index: usize, args: WorldEntityArgs) -> Self {
        let angle = args.angle % ANGLE_UNITS;
        Self {
            index,
            coord: args.coord,
            last_coord: args.coord,
            angle,
            last_angle: angle,
            size_x: args.size_x,
            size_z: args.size_z,
            priority: AvatarKind::WorldEntity.default_priority(),
            jump: false,
        }
    }

    fn on_alloc(&mut self, index: usize, args: WorldEntityArgs) {
        *self = Self::create(index, args);
    }

    fn on_dealloc(&mut self) {}

    fn coord(&self) -> CoordGrid {
        self.coord
    }

    fn set_coord(&mut self, coord: CoordGrid) {
        self.coord = coord;
    }
}
