//! Zone index
//!
//! Maps 8x8-tile zones to the avatar indices standing in them, so a range
//! query costs the population of the queried zones rather than the world.

use std::collections::HashMap;
use tilesync_core::{CoordGrid, Result, SyncError, ZoneCoord};

/// Inclusive rectangle of zones on one level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRect {
    pub level: u8,
    pub min_x: u16,
    pub min_z: u16,
    pub max_x: u16,
    pub max_z: u16,
}

impl ZoneRect {
    pub fn new(level: u8, min_x: u16, min_z: u16, max_x: u16, max_z: u16) -> Self {
        Self {
            level,
            min_x: min_x.min(max_x),
            min_z: min_z.min(max_z),
            max_x: max_x.max(min_x),
            max_z: max_z.max(min_z),
        }
    }

    /// Zones covering every tile within `radius` of `coord`, clamped to the map
    pub fn around(coord: CoordGrid, radius: u32) -> Self {
        let radius = radius.min(CoordGrid::MAX_AXIS as u32) as i32;
        let clamp = |v: i32| v.clamp(0, CoordGrid::MAX_AXIS as i32) as u16 >> 3;
        let x = coord.x() as i32;
        let z = coord.z() as i32;
        Self {
            level: coord.level(),
            min_x: clamp(x - radius),
            min_z: clamp(z - radius),
            max_x: clamp(x + radius),
            max_z: clamp(z + radius),
        }
    }

    /// Overlap of two rectangles, `None` when disjoint or on different levels
    pub fn intersect(&self, other: &ZoneRect) -> Option<ZoneRect> {
        if self.level != other.level {
            return None;
        }
        let min_x = self.min_x.max(other.min_x);
        let min_z = self.min_z.max(other.min_z);
        let max_x = self.max_x.min(other.max_x);
        let max_z = self.max_z.min(other.max_z);
        if min_x > max_x || min_z > max_z {
            return None;
        }
        Some(ZoneRect { level: self.level, min_x, min_z, max_x, max_z })
    }

    #[inline]
    pub fn contains(&self, zone: ZoneCoord) -> bool {
        zone.level() == self.level
            && (self.min_x..=self.max_x).contains(&zone.x())
            && (self.min_z..=self.max_z).contains(&zone.z())
    }

    pub fn zone_count(&self) -> usize {
        (self.max_x - self.min_x + 1) as usize * (self.max_z - self.min_z + 1) as usize
    }

    /// Every zone in the rectangle, row by row
    pub fn zones(&self) -> impl Iterator<Item = ZoneCoord> {
        let rect = *self;
        (rect.min_z..=rect.max_z)
            .flat_map(move |z| (rect.min_x..=rect.max_x).map(move |x| ZoneCoord::new(rect.level, x, z)))
    }
}

/// Zone to avatar-index buckets for one avatar kind
#[derive(Debug)]
pub struct ZoneIndex {
    buckets: HashMap<ZoneCoord, Vec<u16>>,
    membership: Vec<Option<ZoneCoord>>,
    len: usize,
}

impl ZoneIndex {
    /// Create an index for slots `0..capacity`
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: HashMap::new(),
            membership: vec![None; capacity],
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.membership.len()
    }

    /// Number of registered indices
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, index: usize, coord: CoordGrid) -> Result<()> {
        if index >= self.membership.len() || index > u16::MAX as usize {
            return Err(SyncError::IndexOutOfRange {
                index,
                capacity: self.membership.len(),
            });
        }
        if !coord.is_valid() {
            return Err(SyncError::InvalidArgument(format!(
                "cannot index slot {} at an invalid coordinate",
                index
            )));
        }
        Ok(())
    }

    /// Register `index` in the bucket for `coord`
    ///
    /// An index that is already registered is moved, so it never appears in
    /// two buckets.
    pub fn insert(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        self.check(index, coord)?;
        self.update(index, coord).map(|_| ())
    }

    /// Move `index` to the bucket for `coord`
    ///
    /// # Returns
    /// `true` if the index changed bucket (or was newly registered)
    pub fn update(&mut self, index: usize, coord: CoordGrid) -> Result<bool> {
        self.check(index, coord)?;
        let zone = coord.zone();
        match self.membership[index] {
            Some(current) if current == zone => return Ok(false),
            Some(current) => self.detach(index, current),
            None => self.len += 1,
        }
        self.buckets.entry(zone).or_default().push(index as u16);
        self.membership[index] = Some(zone);
        Ok(true)
    }

    /// Deregister `index`, returning `false` if it was not registered
    pub fn remove(&mut self, index: usize) -> bool {
        let Some(zone) = self.membership.get_mut(index).and_then(Option::take) else {
            return false;
        };
        self.detach(index, zone);
        self.len -= 1;
        true
    }

    fn detach(&mut self, index: usize, zone: ZoneCoord) {
        if let Some(bucket) = self.buckets.get_mut(&zone) {
            if let Some(pos) = bucket.iter().position(|&i| i as usize == index) {
                bucket.swap_remove(pos);
            }
            if bucket.is_empty() {
                self.buckets.remove(&zone);
            }
        }
    }

    /// Zone `index` is registered in
    #[inline]
    pub fn zone_of(&self, index: usize) -> Option<ZoneCoord> {
        self.membership.get(index).copied().flatten()
    }

    /// Indices in one zone, in no particular order
    pub fn bucket(&self, zone: ZoneCoord) -> &[u16] {
        self.buckets.get(&zone).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every index registered in a zone inside `rect`
    pub fn indices_in(&self, rect: ZoneRect) -> impl Iterator<Item = usize> + '_ {
        rect.zones()
            .flat_map(move |zone| self.bucket(zone).iter().map(|&i| i as usize))
    }

    /// Number of non-empty buckets
    pub fn occupied_zones(&self) -> usize {
        self.buckets.len()
    }
}
