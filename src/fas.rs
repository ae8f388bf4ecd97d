//! Flagged Array Set (C2)
//!
//! A bounded, insertion-ordered, content-addressed cache of transaction
//! blobs, shared in lockstep between two relay peers so that back-references
//! emitted by one side's encoder resolve to the same transaction on the
//! other side's decoder. See spec.md §3, §4.2.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A single resident entry: the transaction bytes plus its oversize flag.
#[derive(Debug, Clone)]
struct Entry {
    tx: Arc<[u8]>,
    oversize: bool,
}

/// Bounded, insertion-ordered, content-addressed transaction set.
///
/// `entries` holds insertion order; `index` maps transaction bytes to their
/// current position in `entries` so `contains`/`index_of` stay O(1) average
/// even as the front of the deque is evicted and every surviving index
/// shifts down.
#[derive(Debug, Default)]
pub struct FlaggedArraySet {
    entries: VecDeque<Entry>,
    index: HashMap<Arc<[u8]>, usize>,
    max_total: usize,
    max_oversize: usize,
    flag_count: usize,
}

impl FlaggedArraySet {
    /// Create an empty set bounded by `max_total` resident entries and
    /// `max_oversize` resident oversize-flagged entries.
    pub fn new(max_total: usize, max_oversize: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            index: HashMap::new(),
            max_total,
            max_oversize,
            flag_count: 0,
        }
    }

    /// Number of currently resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of currently resident entries whose oversize flag is set.
    pub fn flag_count(&self) -> usize {
        self.flag_count
    }

    /// `true` if `tx`'s bytes are already resident.
    pub fn contains(&self, tx: &[u8]) -> bool {
        self.index.contains_key(tx)
    }

    /// The current insertion-order position of `tx`, if resident.
    pub fn index_of(&self, tx: &[u8]) -> Option<u16> {
        self.index.get(tx).map(|&i| i as u16)
    }

    /// The transaction bytes resident at `index`, if any.
    pub fn get(&self, index: u16) -> Option<Arc<[u8]>> {
        self.entries.get(index as usize).map(|e| e.tx.clone())
    }

    /// Insert `tx` with the given oversize flag if not already present,
    /// then evict from the head until both quotas are satisfied.
    ///
    /// A call where `tx` is already resident is a no-op: the existing entry
    /// keeps its original position and flag (spec.md: "a contains-check
    /// returns true and the entry is not re-ordered").
    pub fn add(&mut self, tx: Arc<[u8]>, oversize: bool) {
        if self.index.contains_key(&tx) {
            return;
        }

        let position = self.entries.len();
        self.index.insert(tx.clone(), position);
        if oversize {
            self.flag_count += 1;
        }
        self.entries.push_back(Entry { tx, oversize });

        while self.entries.len() > self.max_total || self.flag_count > self.max_oversize {
            self.evict_oldest();
        }
    }

    /// Drop all entries and reset counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.flag_count = 0;
    }

    fn evict_oldest(&mut self) {
        let Some(evicted) = self.entries.pop_front() else {
            return;
        };
        if evicted.oversize {
            self.flag_count -= 1;
        }
        self.index.remove(&evicted.tx);

        // Every surviving entry's insertion-order position shifted down by one.
        for (_, position) in self.index.iter_mut() {
            *position -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(byte: u8) -> Arc<[u8]> {
        Arc::from(vec![byte])
    }

    #[test]
    fn add_then_contains_and_index_of() {
        let mut set = FlaggedArraySet::new(525, 20);
        set.add(tx(1), false);
        assert!(set.contains(&[1]));
        assert_eq!(set.index_of(&[1]), Some(0));
        assert_eq!(set.get(0).as_deref(), Some(&[1][..]));
    }

    #[test]
    fn duplicate_add_is_noop_and_not_reordered() {
        let mut set = FlaggedArraySet::new(525, 20);
        set.add(tx(1), false);
        set.add(tx(2), false);
        set.add(tx(1), true); // duplicate; flag argument is ignored
        assert_eq!(set.len(), 2);
        assert_eq!(set.index_of(&[1]), Some(0));
        assert_eq!(set.flag_count(), 0);
    }

    #[test]
    fn eviction_on_total_overflow_is_fifo_and_shifts_indices() {
        // S3: insert 526 distinct non-oversize transactions.
        let mut set = FlaggedArraySet::new(525, 20);
        for i in 0..526u32 {
            let bytes: Arc<[u8]> = Arc::from(i.to_le_bytes().to_vec());
            set.add(bytes, false);
        }
        assert_eq!(set.len(), 525);

        let t1 = 0u32.to_le_bytes();
        let t2 = 1u32.to_le_bytes();
        assert!(!set.contains(&t1));
        assert!(set.contains(&t2));
        assert_eq!(set.index_of(&t2), Some(0));
    }

    #[test]
    fn eviction_on_oversize_overflow() {
        let mut set = FlaggedArraySet::new(525, 2);
        set.add(tx(1), true);
        set.add(tx(2), true);
        set.add(tx(3), true); // pushes flag_count to 3 > max_oversize(2)

        assert!(!set.contains(&[1])); // oldest oversize entry evicted
        assert!(set.contains(&[2]));
        assert!(set.contains(&[3]));
        assert_eq!(set.flag_count(), 2);
    }

    #[test]
    fn get_index_of_roundtrip_invariant() {
        let mut set = FlaggedArraySet::new(525, 20);
        for i in 0..10u8 {
            set.add(tx(i), i % 3 == 0);
        }
        for i in 0..10u8 {
            let idx = set.index_of(&[i]).expect("resident");
            assert_eq!(set.get(idx).as_deref(), Some(&[i][..]));
        }
    }

    #[test]
    fn clear_resets_everything() {
        let mut set = FlaggedArraySet::new(525, 20);
        set.add(tx(1), true);
        set.clear();
        assert_eq!(set.len(), 0);
        assert_eq!(set.flag_count(), 0);
        assert!(!set.contains(&[1]));
    }

    #[test]
    fn invariant_bounds_hold_after_many_adds() {
        let mut set = FlaggedArraySet::new(525, 20);
        for i in 0..2000u32 {
            let bytes: Arc<[u8]> = Arc::from(i.to_le_bytes().to_vec());
            set.add(bytes, i % 5 == 0);
            assert!(set.len() <= 525);
            assert!(set.flag_count() <= 20);
        }
    }
}
