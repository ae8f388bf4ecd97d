//! Property tests for the flagged array set's spec.md §8 invariant 1:
//! after any sequence of `add` calls, `size <= 525 && flag_count <= 20`, and
//! every resident transaction round-trips through `get(index_of(t))`.

use proptest::prelude::*;
use std::sync::Arc;

use relay_hub::fas::FlaggedArraySet;

proptest! {
    #[test]
    fn invariant_1_holds_over_arbitrary_add_sequences(
        ops in prop::collection::vec((0u8..40, any::<bool>()), 0..500)
    ) {
        let mut set = FlaggedArraySet::new(525, 20);
        for (byte, oversize) in &ops {
            set.add(Arc::from(vec![*byte]), *oversize);
            prop_assert!(set.len() <= 525);
            prop_assert!(set.flag_count() <= 20);
        }
        for byte in 0u8..40 {
            if let Some(index) = set.index_of(&[byte]) {
                prop_assert_eq!(set.get(index).as_deref(), Some(&[byte][..]));
            }
        }
    }

    #[test]
    fn eviction_always_drops_the_oldest_surviving_entry(
        extra in 1usize..50usize
    ) {
        // S3 generalized: inserting max_total + extra distinct transactions
        // always leaves exactly the most recent max_total resident, oldest first out.
        let mut set = FlaggedArraySet::new(10, 20);
        let total = 10 + extra;
        for i in 0..total {
            let bytes: Arc<[u8]> = Arc::from((i as u32).to_le_bytes().to_vec());
            set.add(bytes, false);
        }
        prop_assert_eq!(set.len(), 10);
        for i in 0..extra {
            let bytes = (i as u32).to_le_bytes();
            prop_assert!(!set.contains(&bytes));
        }
        let first_surviving = (extra as u32).to_le_bytes();
        prop_assert_eq!(set.index_of(&first_surviving), Some(0));
    }
}
