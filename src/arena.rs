//! A small, fixed number of independent arenas stripe contention
//! across threads. Each arena owns one chunk-list sentinel per size
//! class, guarded by a single mutex (spec §4.6, Variant A).
use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::Mutex;

use crate::bucket_list;
use crate::chunk::{BlockHeader, BucketChunkHeader};
use crate::size_class::SCHEDULE;

/// Recommended arena count from spec §3 ("recommend 4").
#[cfg(not(feature = "test_only_small_constants"))]
pub const NUM_ARENAS: usize = 4;

/// Shrunk under `test_only_small_constants` (mirrors the teacher's own
/// use of that feature in `magazine_impl.rs`): fewer arenas means the
/// trylock round-robin and the favorite-arena handoff get exercised
/// with far less concurrent traffic per test run.
#[cfg(feature = "test_only_small_constants")]
pub const NUM_ARENAS: usize = 2;

struct ArenaState {
    /// One sentinel per size class; `class_heads[i]` anchors the
    /// chunk list for `SCHEDULE[i]` in this arena. Each sentinel comes
    /// out of `new_sentinel()` unlinked (`next`/`prev` null) and stays
    /// that way through every move `ArenaState` still has ahead of it
    /// (into a `Mutex`, into the arena array, into `lazy_static`
    /// storage): self-linking here would bake in the address of a
    /// temporary that's about to be moved away from.
    /// `bucket_list::find_or_create_chunk_with_space` self-links each
    /// sentinel lazily, the first time it's used at its final address.
    class_heads: [BucketChunkHeader; SCHEDULE.len()],
}

impl ArenaState {
    fn new() -> ArenaState {
        ArenaState {
            class_heads: [
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
                bucket_list::new_sentinel(),
            ],
        }
    }
}

pub struct Arena {
    state: Mutex<ArenaState>,
}

impl Arena {
    fn new() -> Arena {
        Arena {
            state: Mutex::new(ArenaState::new()),
        }
    }
}

lazy_static::lazy_static! {
    // Process-global, initialized exactly once on first use; never
    // destroyed (spec §3, "Lifecycle"). `lazy_static`'s `Once` is the
    // "one-shot mutex, double-checked" spec §4.8 step 1 asks for.
    static ref ARENAS: [Arena; NUM_ARENAS] = [(); NUM_ARENAS].map(|_| Arena::new());
}

thread_local! {
    // The thread-local hint for which arena to try first. Starts at
    // 0 and is updated to whichever arena the thread last
    // successfully locked (spec §3, "Thread affinity").
    static FAVORITE_ARENA: Cell<usize> = Cell::new(0);
}

/// Allocates one object of `class_index` from whichever arena this
/// thread can lock first, trying its favorite arena before the
/// others in round-robin order (spec §4.6).
pub fn allocate(class_index: usize) -> NonNull<u8> {
    let class = &SCHEDULE[class_index];
    let start = FAVORITE_ARENA.with(Cell::get);

    loop {
        for offset in 0..NUM_ARENAS {
            let arena_index = (start + offset) % NUM_ARENAS;

            if let Ok(mut guard) = ARENAS[arena_index].state.try_lock() {
                FAVORITE_ARENA.with(|fav| fav.set(arena_index));

                let sentinel = &mut guard.class_heads[class_index] as *mut BucketChunkHeader;
                let block = unsafe {
                    let chunk = bucket_list::find_or_create_chunk_with_space(
                        sentinel,
                        class_index,
                        class,
                        arena_index,
                    );
                    bucket_list::claim_slot(chunk, class.element_size)
                };
                return block;
            }
        }
        // Every arena was contended this cycle; try again. No thread
        // sleeps here (spec §5) — this just spins on `try_lock`.
    }
}

/// Releases `block`, a payload previously returned by `allocate` for
/// `class_index` from arena `arena_index`. Blocks until that arena's
/// lock is available: free does not migrate chunks between arenas
/// (spec §4.6).
///
/// # Safety
/// `chunk` and `block` must come from a matching, not-yet-freed
/// `allocate` call.
pub unsafe fn release(
    arena_index: usize,
    class_index: usize,
    chunk: NonNull<BucketChunkHeader>,
    block: NonNull<BlockHeader>,
) {
    let class = &SCHEDULE[class_index];
    // Held for the duration of `release_slot`, which mutates this
    // chunk's bitmap and possibly its arena's list links: the guard
    // itself is the mutual exclusion spec I5 requires, even though
    // `release_slot` operates through raw pointers rather than `guard`.
    let _guard = ARENAS[arena_index].state.lock().unwrap();
    bucket_list::release_slot(chunk, block, class);
}
