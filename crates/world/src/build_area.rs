//! Build area
//!
//! The square of zones an observer's client has loaded. Nothing outside it
//! can be rendered, so range queries are clipped to it.

use crate::zone::ZoneRect;
use tilesync_core::{CoordGrid, ZoneCoord};

/// Zones from the edge at which the client map is rebuilt around the observer
const REBUILD_MARGIN: u16 = 2;

/// Square zone region loaded by one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildArea {
    origin_x: u16,
    origin_z: u16,
    size: u16,
}

impl BuildArea {
    /// 13x13 zones, 104x104 tiles
    pub const DEFAULT_SIZE: u16 = 13;

    /// Build area of `size` zones centred on the zone of `coord`
    pub fn centered(coord: CoordGrid, size: u16) -> Self {
        let size = size.max(1);
        let half = size / 2;
        Self {
            origin_x: coord.zone_x().saturating_sub(half),
            origin_z: coord.zone_z().saturating_sub(half),
            size,
        }
    }

    #[inline]
    pub fn origin_zone_x(&self) -> u16 {
        self.origin_x
    }

    #[inline]
    pub fn origin_zone_z(&self) -> u16 {
        self.origin_z
    }

    /// Width and height in zones
    #[inline]
    pub fn size(&self) -> u16 {
        self.size
    }

    /// The area as a zone rectangle on `level`
    pub fn rect(&self, level: u8) -> ZoneRect {
        ZoneRect::new(
            level,
            self.origin_x,
            self.origin_z,
            (self.origin_x + self.size - 1).min(ZoneCoord::MAX_AXIS),
            (self.origin_z + self.size - 1).min(ZoneCoord::MAX_AXIS),
        )
    }

    /// Whether the zone of `coord` is loaded, on any level
    pub fn contains(&self, coord: CoordGrid) -> bool {
        coord.is_valid() && self.rect(coord.level()).contains(coord.zone())
    }

    /// Zones within `radius` tiles of `center` that are also loaded
    pub fn clip(&self, center: CoordGrid, radius: u32) -> Option<ZoneRect> {
        ZoneRect::around(center, radius).intersect(&self.rect(center.level()))
    }

    /// Whether `coord` is close enough to the edge to need a new map
    pub fn needs_rebuild(&self, coord: CoordGrid) -> bool {
        if !self.contains(coord) {
            return true;
        }
        let margin = REBUILD_MARGIN.min(self.size / 2);
        let zx = coord.zone_x();
        let zz = coord.zone_z();
        zx < self.origin_x + margin
            || zz < self.origin_z + margin
            || zx >= self.origin_x + self.size - margin
            || zz >= self.origin_z + self.size - margin
    }

    /// Re-centre on `coord` if the observer is near the edge
    ///
    /// # Returns
    /// `true` if the area moved
    pub fn follow(&mut self, coord: CoordGrid) -> bool {
        if !self.needs_rebuild(coord) {
            return false;
        }
        let rebuilt = Self::centered(coord, self.size);
        let moved = rebuilt != *self;
        *self = rebuilt;
        moved
    }
}

impl Default for BuildArea {
    fn default() -> Self {
        Self {
            origin_x: 0,
            origin_z: 0,
            size: Self::DEFAULT_SIZE,
        }
    }
}
