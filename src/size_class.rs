//! The static schedule mapping a requested (post-header) byte count
//! to a bucket index, element size, and chunk page count.
//!
//! The schedule and its "all slots free" bitmap constants are carried
//! over bit-for-bit from the C allocator this crate's specification
//! was distilled from (`SUPPORTED_BUCKETS_*` in `opt_malloc.c`).
use static_assertions::const_assert;

use crate::bitmap::Bitmap256;
use crate::page::PAGE_SIZE;

/// One size class ("bucket") in the schedule.
#[derive(Clone, Copy, Debug)]
pub struct SizeClass {
    /// Byte size of one slot, including the per-allocation block header.
    pub element_size: usize,
    /// Number of pages a single chunk of this class spans.
    pub pages: usize,
    /// Number of real slots in one chunk of this class.
    pub slot_count: usize,
    /// The bitmap value meaning "every real slot free, every padding
    /// position (beyond `slot_count`) busy." A chunk transitions back
    /// to this value exactly when its last live allocation is freed.
    pub empty_bitmap: Bitmap256,
}

const fn full() -> u64 {
    u64::MAX
}

/// Eight size classes, smallest first. See spec §3 for the derivation
/// of each `slot_count` from `element_size` and `pages`.
pub static SCHEDULE: [SizeClass; 8] = [
    SizeClass {
        element_size: 24,
        pages: 1,
        slot_count: 168,
        empty_bitmap: Bitmap256::from_lanes([full(), 0xFFFFFF0000000000, 0, 0]),
    },
    SizeClass {
        element_size: 32,
        pages: 1,
        slot_count: 126,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), 0xC000000000000000, 0]),
    },
    SizeClass {
        element_size: 40,
        pages: 1,
        slot_count: 100,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), 0xFFFFFFF000000000, 0]),
    },
    SizeClass {
        element_size: 72,
        pages: 1,
        slot_count: 56,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), full(), 0xFF00000000000000]),
    },
    SizeClass {
        element_size: 520,
        pages: 8,
        slot_count: 62,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), full(), 0xC000000000000000]),
    },
    SizeClass {
        element_size: 1032,
        pages: 16,
        slot_count: 63,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), full(), 0x8000000000000000]),
    },
    SizeClass {
        element_size: 2056,
        pages: 16,
        slot_count: 31,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), full(), 0xFFFFFFFF80000000]),
    },
    SizeClass {
        element_size: 4104,
        pages: 16,
        slot_count: 15,
        empty_bitmap: Bitmap256::from_lanes([full(), full(), full(), 0xFFFFFFFFFFFF8000]),
    },
];

/// Largest post-header byte count servable by any bucket; anything
/// bigger goes through the large-allocation path.
pub const MAX_BUCKETED_SIZE: usize = SCHEDULE[SCHEDULE.len() - 1].element_size;

// The schedule must be strictly increasing for `classify`'s
// first-fit rule to have no ties, and every chunk must actually fit
// in its declared page count.
const_assert!(SCHEDULE[0].element_size < SCHEDULE[1].element_size);
const_assert!(SCHEDULE[1].element_size < SCHEDULE[2].element_size);
const_assert!(SCHEDULE[2].element_size < SCHEDULE[3].element_size);
const_assert!(SCHEDULE[3].element_size < SCHEDULE[4].element_size);
const_assert!(SCHEDULE[4].element_size < SCHEDULE[5].element_size);
const_assert!(SCHEDULE[5].element_size < SCHEDULE[6].element_size);
const_assert!(SCHEDULE[6].element_size < SCHEDULE[7].element_size);

// Every class's element size must be a multiple of 8: payloads sit
// right after the pointer-sized block header, so this is what keeps
// every slot's payload aligned to `alignof(max_align_t)` (spec §6, P3).
const_assert!(SCHEDULE[0].element_size % 8 == 0);
const_assert!(SCHEDULE[1].element_size % 8 == 0);
const_assert!(SCHEDULE[2].element_size % 8 == 0);
const_assert!(SCHEDULE[3].element_size % 8 == 0);
const_assert!(SCHEDULE[4].element_size % 8 == 0);
const_assert!(SCHEDULE[5].element_size % 8 == 0);
const_assert!(SCHEDULE[6].element_size % 8 == 0);
const_assert!(SCHEDULE[7].element_size % 8 == 0);

/// Outcome of classifying a requested byte count.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Classification {
    /// Index into [`SCHEDULE`].
    Bucket(usize),
    /// Exceeds every bucket; served by the large-allocation path.
    Large,
}

/// Classifies `size` (the caller's requested bytes, plus the
/// per-allocation block header) into a bucket or the large path.
///
/// The smallest class whose element size strictly exceeds `size`
/// wins; classes are strictly increasing so there are no ties.
pub fn classify(size: usize) -> Classification {
    for (index, class) in SCHEDULE.iter().enumerate() {
        if size < class.element_size {
            return Classification::Bucket(index);
        }
    }
    Classification::Large
}
