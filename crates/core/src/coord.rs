//! Packed coordinate types

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};

/// Absolute tile coordinate packed as `level(2) | x(14) | z(14)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordGrid(u32);

impl CoordGrid {
    pub const MAX_LEVEL: u8 = 3;
    pub const MAX_AXIS: u16 = 16383;

    /// Sentinel for "no coordinate"; never produced by a constructor
    pub const INVALID: CoordGrid = CoordGrid(u32::MAX);

    /// Pack a coordinate, masking each component to its field width
    #[inline]
    pub const fn new(level: u8, x: u16, z: u16) -> Self {
        Self(
            ((level as u32 & 0x3) << 28)
                | ((x as u32 & 0x3FFF) << 14)
                | (z as u32 & 0x3FFF),
        )
    }

    /// Pack a coordinate, rejecting out-of-range components
    pub fn try_new(level: i32, x: i32, z: i32) -> Result<Self> {
        if !(0..=Self::MAX_LEVEL as i32).contains(&level) {
            return Err(SyncError::InvalidArgument(format!("level {} not in [0, 4)", level)));
        }
        if !(0..=Self::MAX_AXIS as i32).contains(&x) {
            return Err(SyncError::InvalidArgument(format!("x {} not in [0, 16384)", x)));
        }
        if !(0..=Self::MAX_AXIS as i32).contains(&z) {
            return Err(SyncError::InvalidArgument(format!("z {} not in [0, 16384)", z)));
        }
        Ok(Self::new(level as u8, x as u16, z as u16))
    }

    #[inline]
    pub const fn from_packed(packed: u32) -> Self {
        Self(packed)
    }

    #[inline]
    pub const fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn level(self) -> u8 {
        ((self.0 >> 28) & 0x3) as u8
    }

    #[inline]
    pub const fn x(self) -> u16 {
        ((self.0 >> 14) & 0x3FFF) as u16
    }

    #[inline]
    pub const fn z(self) -> u16 {
        (self.0 & 0x3FFF) as u16
    }

    #[inline]
    pub const fn zone_x(self) -> u16 {
        self.x() >> 3
    }

    #[inline]
    pub const fn zone_z(self) -> u16 {
        self.z() >> 3
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }

    pub const fn zone(self) -> ZoneCoord {
        ZoneCoord::new(self.level(), self.zone_x(), self.zone_z())
    }

    pub const fn low_res(self) -> LowResPosition {
        LowResPosition::new(self.level(), (self.x() >> 13) as u8, (self.z() >> 13) as u8)
    }

    /// Signed (dx, dz) from `self` to `other`, ignoring level
    #[inline]
    pub fn delta_to(self, other: CoordGrid) -> (i32, i32) {
        (other.x() as i32 - self.x() as i32, other.z() as i32 - self.z() as i32)
    }

    /// Chebyshev distance on the x/z plane, ignoring level
    #[inline]
    pub fn chebyshev(self, other: CoordGrid) -> u32 {
        let (dx, dz) = self.delta_to(other);
        dx.unsigned_abs().max(dz.unsigned_abs())
    }

    /// Whether `other` is on the same level and within `distance` tiles
    #[inline]
    pub fn in_distance(self, other: CoordGrid, distance: u32) -> bool {
        self.level() == other.level() && self.chebyshev(other) <= distance
    }

    /// Offset this coordinate, failing if the result leaves the map
    pub fn translate(self, dx: i32, dz: i32, dlevel: i32) -> Result<Self> {
        Self::try_new(
            self.level() as i32 + dlevel,
            self.x() as i32 + dx,
            self.z() as i32 + dz,
        )
    }
}

impl Default for CoordGrid {
    fn default() -> Self {
        Self::INVALID
    }
}

impl std::fmt::Display for CoordGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "({}, {}, {})", self.level(), self.x(), self.z())
        } else {
            write!(f, "(invalid)")
        }
    }
}

/// Zone key packed as `level(2) | zone_x(11) | zone_z(11)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneCoord(u32);

impl ZoneCoord {
    pub const MAX_AXIS: u16 = 2047;

    #[inline]
    pub const fn new(level: u8, zone_x: u16, zone_z: u16) -> Self {
        Self(((level as u32 & 0x3) << 22) | ((zone_x as u32 & 0x7FF) << 11) | (zone_z as u32 & 0x7FF))
    }

    #[inline]
    pub const fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn level(self) -> u8 {
        ((self.0 >> 22) & 0x3) as u8
    }

    #[inline]
    pub const fn x(self) -> u16 {
        ((self.0 >> 11) & 0x7FF) as u16
    }

    #[inline]
    pub const fn z(self) -> u16 {
        (self.0 & 0x7FF) as u16
    }
}

/// Coarse 18-bit position sent for every player outside high resolution
///
/// Layout: `level(2) | region_x(8) | region_z(8)` where a region is 8192 tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LowResPosition(u32);

impl LowResPosition {
    #[inline]
    pub const fn new(level: u8, region_x: u8, region_z: u8) -> Self {
        Self(((level as u32 & 0x3) << 16) | ((region_x as u32) << 8) | region_z as u32)
    }

    #[inline]
    pub const fn from_packed(packed: u32) -> Self {
        Self(packed & 0x3FFFF)
    }

    #[inline]
    pub const fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn level(self) -> u8 {
        ((self.0 >> 16) & 0x3) as u8
    }

    #[inline]
    pub const fn region_x(self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }

    #[inline]
    pub const fn region_z(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let coord = CoordGrid::new(2, 3200, 3220);
        assert_eq!(coord.level(), 2);
        assert_eq!(coord.x(), 3200);
        assert_eq!(coord.z(), 3220);
        assert_eq!(CoordGrid::from_packed(coord.packed()), coord);
    }

    #[test]
    fn test_extremes() {
        let coord = CoordGrid::new(3, 16383, 16383);
        assert_eq!(coord.level(), 3);
        assert_eq!(coord.x(), 16383);
        assert_eq!(coord.z(), 16383);
        assert!(coord.is_valid());
        assert!(!CoordGrid::INVALID.is_valid());
    }

    #[test]
    fn test_try_new_rejects_out_of_range() {
        assert!(CoordGrid::try_new(4, 0, 0).is_err());
        assert!(CoordGrid::try_new(0, 16384, 0).is_err());
        assert!(CoordGrid::try_new(0, 0, -1).is_err());
        assert!(CoordGrid::try_new(0, 16383, 0).is_ok());
    }

    #[test]
    fn test_zone_and_low_res() {
        let coord = CoordGrid::new(1, 3205, 9000);
        let zone = coord.zone();
        assert_eq!(zone.level(), 1);
        assert_eq!(zone.x(), 3205 >> 3);
        assert_eq!(zone.z(), 9000 >> 3);

        let low = coord.low_res();
        assert_eq!(low.level(), 1);
        assert_eq!(low.region_x(), 0);
        assert_eq!(low.region_z(), 1);
        assert_eq!(LowResPosition::from_packed(low.packed()), low);
    }

    #[test]
    fn test_distance() {
        let a = CoordGrid::new(0, 3200, 3200);
        let b = CoordGrid::new(0, 3215, 3190);
        assert_eq!(a.chebyshev(b), 15);
        assert!(a.in_distance(b, 15));
        assert!(!a.in_distance(b, 14));
        assert!(!a.in_distance(CoordGrid::new(1, 3200, 3200), 15));
    }

    #[test]
    fn test_translate() {
        let a = CoordGrid::new(0, 10, 10);
        assert_eq!(a.translate(-2, 3, 1).unwrap(), CoordGrid::new(1, 8, 13));
        assert!(a.translate(-11, 0, 0).is_err());
    }
}
