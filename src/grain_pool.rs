//! Fixed-capacity grain arena
//!
//! All grain storage is allocated up front. Free slot indices live in a
//! lock-free `ArrayQueue`; the active slot list is a `Vec` that never grows
//! past its initial capacity. Acquiring, reclaiming and iterating therefore
//! never allocate, which keeps the pool usable from the audio callback.
//!
//! When every slot is taken, [`GrainPool::acquire`] returns `None` and the
//! request is dropped.
//!
//! # Example
//! ```ignore
//! let mut pool = GrainPool::new(100);
//! if let Some(slot) = pool.acquire(grain, GrainOwner { note: 0, generator: 1 }) {
//!     // grain is now mixed until it expires
//! }
//! pool.reclaim_expired(now);
//! ```

use crate::grain::Grain;
use crossbeam_queue::ArrayQueue;

/// Note slot and generator a grain belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GrainOwner {
    pub note: usize,
    pub generator: usize,
}

pub struct GrainPool {
    grains: Vec<Grain>,
    owners: Vec<GrainOwner>,
    free: ArrayQueue<usize>,
    active: Vec<usize>,
}

impl GrainPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let free = ArrayQueue::new(capacity);
        for idx in 0..capacity {
            let _ = free.push(idx);
        }
        Self {
            grains: vec![Grain::default(); capacity],
            owners: vec![GrainOwner::default(); capacity],
            free,
            active: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.grains.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Store `grain` in a free slot, or drop it if the pool is exhausted
    pub fn acquire(&mut self, grain: Grain, owner: GrainOwner) -> Option<usize> {
        let idx = self.free.pop()?;
        self.grains[idx] = grain;
        self.owners[idx] = owner;
        self.active.push(idx);
        Some(idx)
    }

    /// Return every grain that has finished by `ts` to the free list
    pub fn reclaim_expired(&mut self, ts: i64) -> usize {
        let mut reclaimed = 0;
        let mut i = 0;
        while i < self.active.len() {
            let idx = self.active[i];
            if self.grains[idx].is_expired(ts) {
                self.active.swap_remove(i);
                let _ = self.free.push(idx);
                reclaimed += 1;
            } else {
                i += 1;
            }
        }
        reclaimed
    }

    /// Active grains with their owners
    pub fn iter_active(&self) -> impl Iterator<Item = (&Grain, GrainOwner)> + '_ {
        self.active.iter().map(move |&idx| (&self.grains[idx], self.owners[idx]))
    }

    /// Active grains owned by note slot `note`
    pub fn count_for_note(&self, note: usize) -> usize {
        self.active.iter().filter(|&&idx| self.owners[idx].note == note).count()
    }

    /// Drop every grain at once
    pub fn clear(&mut self) {
        for idx in self.active.drain(..) {
            let _ = self.free.push(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grain::ENV_LUT_SIZE;

    fn grain(trig_ts: i64, duration: i64) -> Grain {
        Grain::new([1.0; ENV_LUT_SIZE], duration, 1.0, 0, trig_ts, 1.0, 0.0)
    }

    #[test]
    fn test_pool_bounded() {
        let mut pool = GrainPool::new(4);
        let owner = GrainOwner::default();
        for _ in 0..4 {
            assert!(pool.acquire(grain(0, 100), owner).is_some());
        }
        assert!(pool.is_full());
        for _ in 0..10 {
            assert!(pool.acquire(grain(0, 100), owner).is_none());
        }
        assert_eq!(pool.active_count(), 4);
    }

    #[test]
    fn test_reclaim_frees_slots() {
        let mut pool = GrainPool::new(3);
        let owner = GrainOwner::default();
        pool.acquire(grain(0, 10), owner);
        pool.acquire(grain(0, 50), owner);
        pool.acquire(grain(5, 10), owner);
        assert_eq!(pool.reclaim_expired(9), 0);
        assert_eq!(pool.reclaim_expired(10), 1);
        assert_eq!(pool.reclaim_expired(15), 1);
        assert_eq!(pool.active_count(), 1);
        assert!(pool.acquire(grain(20, 10), owner).is_some());
        assert!(pool.acquire(grain(20, 10), owner).is_some());
        assert!(pool.acquire(grain(20, 10), owner).is_none());
    }

    #[test]
    fn test_owner_counts() {
        let mut pool = GrainPool::new(8);
        pool.acquire(grain(0, 10), GrainOwner { note: 1, generator: 0 });
        pool.acquire(grain(0, 10), GrainOwner { note: 1, generator: 3 });
        pool.acquire(grain(0, 10), GrainOwner { note: 2, generator: 0 });
        assert_eq!(pool.count_for_note(1), 2);
        assert_eq!(pool.count_for_note(2), 1);
        assert_eq!(pool.count_for_note(0), 0);
        pool.clear();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.iter_active().count(), 0);
    }
}
