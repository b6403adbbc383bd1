//! # Avatar pool
//!
//! Index-addressed avatar slots for one avatar kind, plus a bounded queue of
//! released avatars kept for reuse.
//!
//! ## Slot life cycle
//!
//! ```text
//! empty --alloc--> live --release--> reclaimable --alloc (reuse)--> live
//!                   |                     |
//!                   |                     +--evicted (oldest first)--> dropped
//!                   +--destroy / release while tainted--> dropped
//! ```
//!
//! Released avatars are reclaimable, never live: nothing else holds them, and
//! [`Poolable::on_alloc`] resets them to construction defaults before reuse.
//! A tainted avatar (one whose state was left inconsistent by a failed
//! write) is never reused.
//!
//! # Thread Safety
//!
//! Mutation takes `&mut self` and happens only between ticks; the parallel
//! observer phase reads through `&AvatarPool`.

use crate::zone::ZoneIndex;
use std::collections::VecDeque;
use tilesync_core::{AvatarKind, CoordGrid, Result, SyncError};

/// An avatar type that can live in an [`AvatarPool`]
pub trait Poolable: Send + Sync {
    /// Arguments for constructing or re-initialising an instance
    type Args;

    /// Construct a fresh instance for slot `index`
    fn create(index: usize, args: Self::Args) -> Self;

    /// Re-initialise a reclaimed instance for slot `index`
    ///
    /// Every transient field must end up equal to what [`create`](Self::create)
    /// would produce for the same arguments.
    fn on_alloc(&mut self, index: usize, args: Self::Args);

    /// Release extended info and buffers before the slot is vacated
    fn on_dealloc(&mut self);

    /// Current coordinate, used for zone membership
    fn coord(&self) -> CoordGrid;

    /// Store a new coordinate; only the pool calls this, via
    /// [`AvatarPool::relocate`]
    fn set_coord(&mut self, coord: CoordGrid);
}

/// Fixed-capacity slots for one avatar kind
pub struct AvatarPool<A: Poolable> {
    kind: AvatarKind,
    slots: Vec<Option<A>>,
    tainted: Vec<bool>,
    reclaim: VecDeque<A>,
    reclaim_capacity: usize,
    zones: ZoneIndex,
    live: usize,
}

impl<A: Poolable> AvatarPool<A> {
    /// Create a pool
    ///
    /// # Arguments
    /// * `kind` - Avatar kind, used in logs
    /// * `capacity` - Number of slots
    /// * `reclaim_capacity` - Released instances kept for reuse
    pub fn new(kind: AvatarKind, capacity: usize, reclaim_capacity: usize) -> Self {
        Self {
            kind,
            slots: (0..capacity).map(|_| None).collect(),
            tainted: vec![false; capacity],
            reclaim: VecDeque::with_capacity(reclaim_capacity),
            reclaim_capacity,
            zones: ZoneIndex::new(capacity),
            live: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> AvatarKind {
        self.kind
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live avatars
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Released instances waiting for reuse
    #[inline]
    pub fn reclaimable(&self) -> usize {
        self.reclaim.len()
    }

    /// Allocate slot `index`
    ///
    /// Reuses the most recently released instance when one is queued,
    /// otherwise constructs a new one, then registers its zone.
    ///
    /// # Errors
    /// - `IndexOutOfRange` if `index >= capacity`
    /// - `SlotOccupied` if the slot holds a live avatar
    /// - `InvalidArgument` if the initialised avatar has an invalid coordinate
    pub fn alloc(&mut self, index: usize, args: A::Args) -> Result<&mut A> {
        if index >= self.slots.len() {
            return Err(SyncError::IndexOutOfRange {
                index,
                capacity: self.slots.len(),
            });
        }
        if self.slots[index].is_some() {
            return Err(SyncError::SlotOccupied(index));
        }

        let avatar = match self.reclaim.pop_back() {
            Some(mut avatar) => {
                avatar.on_alloc(index, args);
                avatar
            }
            None => A::create(index, args),
        };

        if let Err(e) = self.zones.insert(index, avatar.coord()) {
            self.enqueue(avatar);
            return Err(e);
        }

        self.tainted[index] = false;
        self.live += 1;
        tracing::debug!("Allocated {} slot {} at {}", self.kind.as_str(), index, avatar.coord());
        Ok(self.slots[index].insert(avatar))
    }

    /// Release slot `index` for reuse
    ///
    /// A tainted avatar is destroyed instead.
    ///
    /// # Returns
    /// `false` if the slot was empty
    pub fn release(&mut self, index: usize) -> bool {
        if self.tainted.get(index).copied().unwrap_or(false) {
            return self.destroy(index);
        }
        let Some(avatar) = self.vacate(index) else {
            return false;
        };
        self.enqueue(avatar);
        tracing::debug!("Released {} slot {}", self.kind.as_str(), index);
        true
    }

    /// Vacate slot `index` without queueing the avatar for reuse
    ///
    /// # Returns
    /// `false` if the slot was empty
    pub fn destroy(&mut self, index: usize) -> bool {
        let Some(avatar) = self.vacate(index) else {
            return false;
        };
        self.tainted[index] = false;
        drop(avatar);
        tracing::debug!("Destroyed {} slot {}", self.kind.as_str(), index);
        true
    }

    fn vacate(&mut self, index: usize) -> Option<A> {
        let mut avatar = self.slots.get_mut(index)?.take()?;
        self.zones.remove(index);
        avatar.on_dealloc();
        self.live -= 1;
        Some(avatar)
    }

    fn enqueue(&mut self, avatar: A) {
        if self.reclaim_capacity == 0 {
            return;
        }
        if self.reclaim.len() >= self.reclaim_capacity {
            self.reclaim.pop_front();
        }
        self.reclaim.push_back(avatar);
    }

    /// Mark slot `index` as unsafe for reuse
    ///
    /// # Returns
    /// `false` if the slot was empty
    pub fn taint(&mut self, index: usize) -> bool {
        if !self.contains(index) {
            return false;
        }
        if !self.tainted[index] {
            tracing::warn!("Tainted {} slot {}; it will be destroyed on release", self.kind.as_str(), index);
        }
        self.tainted[index] = true;
        true
    }

    #[inline]
    pub fn is_tainted(&self, index: usize) -> bool {
        self.tainted.get(index).copied().unwrap_or(false)
    }

    /// Move the avatar in slot `index`, keeping its zone membership current
    ///
    /// # Errors
    /// - `IndexOutOfRange` if the slot is empty or out of range
    /// - `InvalidArgument` if `coord` is invalid
    pub fn relocate(&mut self, index: usize, coord: CoordGrid) -> Result<()> {
        let capacity = self.slots.len();
        let Some(avatar) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return Err(SyncError::IndexOutOfRange { index, capacity });
        };
        self.zones.update(index, coord)?;
        avatar.set_coord(coord);
        Ok(())
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&A> {
        self.slots.get(index)?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut A> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Live avatars with their slot index, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &A)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|a| (i, a)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut A)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|a| (i, a)))
    }

    #[inline]
    pub fn zones(&self) -> &ZoneIndex {
        &self.zones
    }
}
