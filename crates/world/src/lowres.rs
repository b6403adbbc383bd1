//! Low-resolution position repository
//!
//! Every player slot has a coarse 18-bit position that all observers keep
//! for the players they do not track in high resolution. The repository
//! holds the authoritative value per slot and which slots changed since the
//! last roll.

use crate::flags::BitSet;
use tilesync_core::{CoordGrid, LowResPosition};

#[derive(Debug, Clone)]
pub struct LowResPositionRepository {
    current: Vec<LowResPosition>,
    previous: Vec<LowResPosition>,
    changed: BitSet,
}

impl LowResPositionRepository {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: vec![LowResPosition::default(); capacity],
            previous: vec![LowResPosition::default(); capacity],
            changed: BitSet::new(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.current.len()
    }

    /// Record the low-res position for the coordinate of slot `index`
    ///
    /// # Returns
    /// `true` if the stored value changed
    pub fn update(&mut self, index: usize, coord: CoordGrid) -> bool {
        if !coord.is_valid() {
            return false;
        }
        let Some(slot) = self.current.get_mut(index) else {
            return false;
        };
        let position = coord.low_res();
        if *slot == position {
            return false;
        }
        *slot = position;
        if position != self.previous[index] {
            self.changed.set(index);
        } else {
            self.changed.unset(index);
        }
        true
    }

    #[inline]
    pub fn get(&self, index: usize) -> LowResPosition {
        self.current.get(index).copied().unwrap_or_default()
    }

    #[inline]
    pub fn previous(&self, index: usize) -> LowResPosition {
        self.previous.get(index).copied().unwrap_or_default()
    }

    /// Slots whose position differs from the last roll
    pub fn changed(&self) -> impl Iterator<Item = usize> + '_ {
        self.changed.iter()
    }

    /// End of tick: the current positions become the reference
    pub fn roll(&mut self) {
        for index in self.changed.iter() {
            self.previous[index] = self.current[index];
        }
        self.changed.clear();
    }
}
