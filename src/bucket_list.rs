//! Per arena, per size-class: a circular doubly-linked list of
//! chunks, with a sentinel head owned by the arena. All operations
//! here assume the caller already holds the owning arena's lock
//! (spec I5) — nothing in this module takes or releases it.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
)))]
use disabled_contracts::*;

use std::ptr::NonNull;

use crate::chunk::{BlockHeader, BucketChunkHeader, ChunkHeader};
use crate::page;
use crate::size_class::SizeClass;

/// Builds a fresh, *not yet linked* sentinel (`prev`/`next` both
/// null). Deliberately left unlinked: a sentinel embedded in a struct
/// that is still being built (e.g. `ArenaState::new`) gets moved
/// several times — into a `Mutex`, into an array, into `lazy_static`
/// storage — before it reaches its final address, and a self-link
/// taken before that last move would point at a stale, freed stack
/// slot. `find_or_create_chunk_with_space` self-links lazily, the
/// first time the sentinel is used at its final, stable address. The
/// bitmap is `ALL_ONES` so a not-yet-linked (or still-empty) sentinel
/// never looks like "a chunk with space".
pub fn new_sentinel() -> BucketChunkHeader {
    BucketChunkHeader {
        chunk: ChunkHeader::bucketed(0, 0, 0),
        prev: std::ptr::null_mut(),
        next: std::ptr::null_mut(),
        bitmap: crate::bitmap::Bitmap256::ALL_ONES,
    }
}

/// Self-links a sentinel that lives at a stable address (it must
/// never move after this call — the arena that owns it is immortal).
///
/// # Safety
/// `sentinel` must be a unique, pinned `BucketChunkHeader`.
pub unsafe fn init_sentinel(sentinel: *mut BucketChunkHeader) {
    (*sentinel).prev = sentinel;
    (*sentinel).next = sentinel;
}

/// Walks the list starting at `sentinel`, returning the first chunk
/// whose bitmap isn't full. Allocates and links a fresh chunk via the
/// page source on a complete miss.
///
/// A not-yet-linked sentinel (`next` still null, per `new_sentinel`)
/// is self-linked here, in place, before the walk starts — by this
/// point `sentinel` is guaranteed to be at its final, stable address,
/// since the caller only reaches it through an already-locked arena.
///
/// # Safety
/// `sentinel` must be a pinned `BucketChunkHeader` for `class`, either
/// already self-linked or fresh from `new_sentinel` at its final
/// address, and the caller must hold the owning arena's lock.
#[ensures(unsafe { (*ret.as_ptr()).bitmap.find_first_zero() } < 256,
          "the returned chunk always has at least one free slot")]
pub unsafe fn find_or_create_chunk_with_space(
    sentinel: *mut BucketChunkHeader,
    class_index: usize,
    class: &SizeClass,
    arena_index: usize,
) -> NonNull<BucketChunkHeader> {
    if (*sentinel).next.is_null() {
        init_sentinel(sentinel);
    }

    let mut current = (*sentinel).next;

    while current != sentinel {
        if !(*current).bitmap.equal(&crate::bitmap::Bitmap256::ALL_ONES) {
            return NonNull::new_unchecked(current);
        }
        current = (*current).next;
    }

    // Walked all the way back to the sentinel: every existing chunk
    // is full (or there were none). Mint a new one.
    let (region, mapped_size) = page::acquire(class.pages * page::PAGE_SIZE);
    let new_chunk = region.as_ptr() as *mut BucketChunkHeader;

    std::ptr::write(
        new_chunk,
        BucketChunkHeader {
            chunk: ChunkHeader::bucketed(mapped_size, class_index, arena_index),
            prev: sentinel,
            next: (*sentinel).next,
            bitmap: class.empty_bitmap,
        },
    );

    // New chunks go to the front of the list: a heuristic, not an
    // invariant (spec §4.5) — the next allocation is likely to look
    // here first.
    (*(*sentinel).next).prev = new_chunk;
    (*sentinel).next = new_chunk;

    NonNull::new_unchecked(new_chunk)
}

/// Claims a free slot in `chunk`, stamps its block header, and
/// returns the payload address (just past the block header).
///
/// # Safety
/// The caller must hold the owning arena's lock, and `chunk` must
/// have at least one free slot (as `find_or_create_chunk_with_space`
/// guarantees).
#[requires(unsafe { (*chunk.as_ptr()).bitmap.find_first_zero() } < 256,
           "the chunk must have a free slot")]
pub unsafe fn claim_slot(chunk: NonNull<BucketChunkHeader>, element_size: usize) -> NonNull<u8> {
    let index = (*chunk.as_ptr()).bitmap.find_first_zero();
    (*chunk.as_ptr()).bitmap.flip(index);

    let slot = BucketChunkHeader::slot_ptr(chunk, index, element_size);
    let block = slot as *mut BlockHeader;
    std::ptr::write(
        block,
        BlockHeader {
            parent_chunk: NonNull::new_unchecked(chunk.as_ptr() as *mut ChunkHeader),
        },
    );

    NonNull::new_unchecked(block.add(1) as *mut u8)
}

/// Releases the slot occupied by `block` back to `chunk`. If that
/// was the chunk's last live allocation, unlinks the chunk and
/// returns its memory to the page source (spec I3).
///
/// # Safety
/// The caller must hold the owning arena's lock, and `block` must be
/// a slot previously returned by `claim_slot` on this chunk.
pub unsafe fn release_slot(
    chunk: NonNull<BucketChunkHeader>,
    block: NonNull<BlockHeader>,
    class: &SizeClass,
) {
    let index = BucketChunkHeader::slot_index_of(chunk, block, class.element_size);
    (*chunk.as_ptr()).bitmap.flip(index);

    if (*chunk.as_ptr()).bitmap.equal(&class.empty_bitmap) {
        let prev = (*chunk.as_ptr()).prev;
        let next = (*chunk.as_ptr()).next;
        (*prev).next = next;
        (*next).prev = prev;

        let chunk_size = (*chunk.as_ptr()).chunk.chunk_size;
        page::release(chunk.cast::<u8>(), chunk_size);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::size_class::SCHEDULE;

    // Deliberately left unlinked, as `new_sentinel` always returns it:
    // `find_or_create_chunk_with_space` must self-link it lazily on
    // first use, exactly as it does for a freshly moved `ArenaState`.
    fn with_sentinel<F: FnOnce(*mut BucketChunkHeader)>(f: F) {
        let mut sentinel = new_sentinel();
        f(&mut sentinel);
    }

    #[test]
    fn sentinel_self_links_lazily_on_first_use() {
        let mut sentinel = new_sentinel();
        assert!(sentinel.next.is_null());
        assert!(sentinel.prev.is_null());

        unsafe {
            let class_index = 0;
            let class = &SCHEDULE[class_index];
            let chunk = find_or_create_chunk_with_space(&mut sentinel, class_index, class, 0);

            // The sentinel is now self-linked and `chunk` is its only
            // neighbor in both directions (a two-element circular list).
            assert_eq!(sentinel.next, chunk.as_ptr());
            assert_eq!(sentinel.prev, chunk.as_ptr());
            let block = claim_slot(chunk, class.element_size);
            let block_header = (block.as_ptr() as *mut BlockHeader).offset(-1);
            release_slot(chunk, NonNull::new_unchecked(block_header), class);
        }
    }

    #[test]
    fn allocate_and_free_one_slot() {
        with_sentinel(|sentinel| {
            let class_index = 0;
            let class = &SCHEDULE[class_index];

            unsafe {
                let chunk = find_or_create_chunk_with_space(sentinel, class_index, class, 0);
                let block = claim_slot(chunk, class.element_size);

                // Writing the whole usable size must not fault.
                std::ptr::write_bytes(block.as_ptr(), 0xCD, class.element_size - 8);

                let block_header = (block.as_ptr() as *mut BlockHeader).offset(-1);
                release_slot(chunk, NonNull::new_unchecked(block_header), class);

                // The chunk is now empty and should have been
                // unlinked: walking from the sentinel finds nothing.
                assert_eq!((*sentinel).next, sentinel);
            }
        });
    }

    #[test]
    fn fills_chunk_then_creates_a_new_one() {
        with_sentinel(|sentinel| {
            let class_index = 3; // smallest slot_count among the 1-page classes
            let class = &SCHEDULE[class_index];

            let mut blocks = Vec::new();
            unsafe {
                for _ in 0..class.slot_count {
                    let chunk = find_or_create_chunk_with_space(sentinel, class_index, class, 0);
                    blocks.push(claim_slot(chunk, class.element_size));
                }

                // The one chunk should now be full; the next request
                // must mint a second chunk.
                let first_chunk = (*sentinel).next;
                assert!((*first_chunk)
                    .bitmap
                    .equal(&crate::bitmap::Bitmap256::ALL_ONES));

                let second_chunk =
                    find_or_create_chunk_with_space(sentinel, class_index, class, 0);
                assert_ne!(second_chunk.as_ptr(), first_chunk);

                // Clean up: free everything we allocated from the
                // first chunk.
                for block in blocks {
                    let block_header = (block.as_ptr() as *mut BlockHeader).offset(-1);
                    release_slot(
                        NonNull::new_unchecked(first_chunk),
                        NonNull::new_unchecked(block_header),
                        class,
                    );
                }

                // Free the still-empty second chunk too.
                let block = claim_slot(second_chunk, class.element_size);
                let block_header = (block.as_ptr() as *mut BlockHeader).offset(-1);
                release_slot(second_chunk, NonNull::new_unchecked(block_header), class);
            }
        });
    }
}
