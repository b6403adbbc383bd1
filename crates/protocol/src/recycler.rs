//! # Buffer recycler
//!
//! Precomputed extended-info blocks and finished info packets are built once
//! per tick and then shared by many observers and by the outbound pipeline,
//! so no single call site can say when a buffer is free again.
//!
//! Owners hand their handle to the recycler with [`BufferRecycler::retire`].
//! At the end of every tick [`BufferRecycler::cycle`] checks each retired
//! buffer:
//!
//! - held only by the recycler: cleared and returned to the free pool
//! - still shared (e.g. queued in a channel): kept pending for the next cycle
//! - pending longer than the leak threshold: force-released with a warning
//!
//! # Thread Safety
//! All state sits behind a `parking_lot::Mutex`; retiring the same buffer more
//! than once is harmless.

use bytes::BytesMut;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Buffer shared between the engine and the pipeline
pub type SharedBuf = Arc<BytesMut>;

/// Outcome of one [`BufferRecycler::cycle`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecycleStats {
    /// Buffers no longer referenced elsewhere
    pub reclaimed: usize,
    /// Buffers still referenced, carried into the next cycle
    pub retained: usize,
    /// Buffers dropped after exceeding the leak threshold
    pub forced: usize,
}

#[derive(Debug)]
struct Pending {
    buf: SharedBuf,
    age: u32,
}

#[derive(Debug, Default)]
struct RecyclerState {
    free: Vec<BytesMut>,
    retired: Vec<SharedBuf>,
    pending: Vec<Pending>,
}

/// Deferred, reference-aware release of shared buffers
#[derive(Debug)]
pub struct BufferRecycler {
    state: Mutex<RecyclerState>,
    pool_size: usize,
    leak_threshold: u32,
}

impl BufferRecycler {
    /// Create a recycler
    ///
    /// # Arguments
    /// * `pool_size` - Maximum number of cleared buffers kept for reuse
    /// * `leak_threshold` - Cycles a shared buffer may stay pending before it
    ///   is force-released
    pub fn new(pool_size: usize, leak_threshold: u32) -> Self {
        Self {
            state: Mutex::new(RecyclerState::default()),
            pool_size,
            leak_threshold,
        }
    }

    /// Take an empty buffer with at least `min_capacity` bytes reserved
    pub fn alloc(&self, min_capacity: usize) -> BytesMut {
        let reused = self.state.lock().free.pop();
        match reused {
            Some(mut buf) => {
                buf.reserve(min_capacity);
                buf
            }
            None => BytesMut::with_capacity(min_capacity),
        }
    }

    /// Hand over ownership of a shared buffer for deferred release
    pub fn retire(&self, buf: SharedBuf) {
        self.state.lock().retired.push(buf);
    }

    /// Release what can be released; called once per tick after every
    /// observer has been served
    pub fn cycle(&self) -> RecycleStats {
        let mut stats = RecycleStats::default();
        let mut state = self.state.lock();

        let mut candidates = std::mem::take(&mut state.pending);
        let retired = std::mem::take(&mut state.retired);
        candidates.extend(retired.into_iter().map(|buf| Pending { buf, age: 0 }));

        let mut seen = HashSet::with_capacity(candidates.len());
        candidates.retain(|entry| seen.insert(Arc::as_ptr(&entry.buf) as usize));

        let mut still_pending = Vec::new();
        for entry in candidates {
            match Arc::try_unwrap(entry.buf) {
                Ok(mut buf) => {
                    stats.reclaimed += 1;
                    if state.free.len() < self.pool_size {
                        buf.clear();
                        state.free.push(buf);
                    }
                }
                Err(shared) => {
                    let age = entry.age + 1;
                    if age > self.leak_threshold {
                        stats.forced += 1;
                        tracing::warn!(
                            "Force-releasing shared buffer of {} bytes after {} cycles ({} other holders)",
                            shared.len(),
                            age,
                            Arc::strong_count(&shared) - 1
                        );
                    } else {
                        stats.retained += 1;
                        still_pending.push(Pending { buf: shared, age });
                    }
                }
            }
        }
        state.pending = still_pending;

        tracing::trace!(
            "Recycler cycle: reclaimed={} retained={} forced={} free={}",
            stats.reclaimed,
            stats.retained,
            stats.forced,
            state.free.len()
        );
        stats
    }

    /// Number of shared buffers waiting on outside holders
    pub fn pending_count(&self) -> usize {
        let state = self.state.lock();
        state.pending.len() + state.retired.len()
    }

    /// Number of cleared buffers ready for reuse
    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }
}

impl Default for BufferRecycler {
    fn default() -> Self {
        Self::new(1024, 16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn shared(bytes: &[u8]) -> SharedBuf {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(bytes);
        Arc::new(buf)
    }

    #[test]
    fn test_unique_buffer_is_reclaimed() {
        let recycler = BufferRecycler::new(4, 3);
        recycler.retire(shared(&[1, 2, 3]));
        let stats = recycler.cycle();
        assert_eq!(stats, RecycleStats { reclaimed: 1, retained: 0, forced: 0 });
        assert_eq!(recycler.free_count(), 1);

        let buf = recycler.alloc(16);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 64);
        assert_eq!(recycler.free_count(), 0);
    }

    #[test]
    fn test_shared_buffer_waits_for_holder() {
        let recycler = BufferRecycler::new(4, 3);
        let buf = shared(&[9]);
        let in_flight = Arc::clone(&buf);
        recycler.retire(buf);

        assert_eq!(recycler.cycle().retained, 1);
        assert_eq!(recycler.pending_count(), 1);

        drop(in_flight);
        let stats = recycler.cycle();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(recycler.pending_count(), 0);
    }

    #[test]
    fn test_leak_threshold_forces_release() {
        let recycler = BufferRecycler::new(4, 2);
        let buf = shared(&[7]);
        let leaked = Arc::clone(&buf);
        recycler.retire(buf);

        assert_eq!(recycler.cycle().retained, 1);
        assert_eq!(recycler.cycle().retained, 1);
        let stats = recycler.cycle();
        assert_eq!(stats.forced, 1);
        assert_eq!(recycler.pending_count(), 0);
        assert_eq!(Arc::strong_count(&leaked), 1);
    }

    #[test]
    fn test_duplicate_retire_is_idempotent() {
        let recycler = BufferRecycler::new(4, 3);
        let buf = shared(&[1]);
        recycler.retire(Arc::clone(&buf));
        recycler.retire(buf);
        let stats = recycler.cycle();
        assert_eq!(stats.reclaimed, 1);
        assert_eq!(stats.retained, 0);
        assert_eq!(recycler.free_count(), 1);
    }

    #[test]
    fn test_free_pool_is_bounded() {
        let recycler = BufferRecycler::new(1, 3);
        recycler.retire(shared(&[1]));
        recycler.retire(shared(&[2]));
        assert_eq!(recycler.cycle().reclaimed, 2);
        assert_eq!(recycler.free_count(), 1);
    }
}
