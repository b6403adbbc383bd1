//! Per-slot flag storage
//!
//! - [`BitSet`]: fixed-capacity bitset indexed by avatar slot
//! - [`DoubleBufferedBits`]: the same, with a snapshot of the previous tick
//! - [`ObserverExtFlags`]: extended-info bits still owed to one observer

/// Fixed-capacity bitset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    capacity: usize,
}

impl BitSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; (capacity + 63) / 64],
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Set bit `index`, returning whether it was previously clear
    ///
    /// Indices beyond capacity are ignored.
    #[inline]
    pub fn set(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let word = &mut self.words[index >> 6];
        let bit = 1u64 << (index & 63);
        let was_clear = *word & bit == 0;
        *word |= bit;
        was_clear
    }

    /// Clear bit `index`, returning whether it was previously set
    #[inline]
    pub fn unset(&mut self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let word = &mut self.words[index >> 6];
        let bit = 1u64 << (index & 63);
        let was_set = *word & bit != 0;
        *word &= !bit;
        was_set
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        index < self.capacity && self.words[index >> 6] & (1u64 << (index & 63)) != 0
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut remaining = word;
            std::iter::from_fn(move || {
                if remaining == 0 {
                    return None;
                }
                let bit = remaining.trailing_zeros() as usize;
                remaining &= remaining - 1;
                Some(i * 64 + bit)
            })
        })
    }

    /// Copy every bit from `other`, which must have the same capacity
    pub fn copy_from(&mut self, other: &BitSet) {
        debug_assert_eq!(self.capacity, other.capacity);
        self.words.copy_from_slice(&other.words);
    }
}

/// Bitset with the state at the start of the tick kept alongside
///
/// Reads of [`previous`](Self::previous) during a tick see the state the
/// client also had, while [`current`](Self::current) accumulates this tick's
/// changes. [`roll`](Self::roll) makes current the new previous.
#[derive(Debug, Clone)]
pub struct DoubleBufferedBits {
    current: BitSet,
    previous: BitSet,
}

impl DoubleBufferedBits {
    pub fn new(capacity: usize) -> Self {
        Self {
            current: BitSet::new(capacity),
            previous: BitSet::new(capacity),
        }
    }

    #[inline]
    pub fn current(&self) -> &BitSet {
        &self.current
    }

    #[inline]
    pub fn previous(&self) -> &BitSet {
        &self.previous
    }

    #[inline]
    pub fn set(&mut self, index: usize) -> bool {
        self.current.set(index)
    }

    #[inline]
    pub fn unset(&mut self, index: usize) -> bool {
        self.current.unset(index)
    }

    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        self.current.get(index)
    }

    #[inline]
    pub fn was_set(&self, index: usize) -> bool {
        self.previous.get(index)
    }

    /// End of tick: previous becomes a copy of current
    pub fn roll(&mut self) {
        self.previous.copy_from(&self.current);
    }

    /// Discard this tick's changes
    pub fn revert(&mut self) {
        self.current.copy_from(&self.previous);
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.previous.clear();
    }
}

/// Extended-info block bits one observer is still owed, per avatar slot
#[derive(Debug, Clone)]
pub struct ObserverExtFlags {
    flags: Vec<u32>,
}

impl ObserverExtFlags {
    pub fn new(capacity: usize) -> Self {
        Self {
            flags: vec![0; capacity],
        }
    }

    /// Add `bits` to what is owed for `index`
    #[inline]
    pub fn owe(&mut self, index: usize, bits: u32) {
        if let Some(slot) = self.flags.get_mut(index) {
            *slot |= bits;
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> u32 {
        self.flags.get(index).copied().unwrap_or(0)
    }

    /// Take and reset what is owed for `index`
    #[inline]
    pub fn take(&mut self, index: usize) -> u32 {
        self.flags.get_mut(index).map(std::mem::take).unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.flags.fill(0);
    }
}
