//! On-disk-like layout of the two kinds of chunk a live allocation
//! can live in, and the per-allocation header every payload carries.
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

use static_assertions::assert_eq_size;
use std::ptr::NonNull;

use crate::bitmap::Bitmap256;

/// Sentinel `tag` value meaning "this is a large allocation, not a
/// bucketed chunk" (spec I6). A bucketed chunk's tag is always a
/// small non-negative integer (see `ChunkHeader::bucketed`), so it
/// can never collide with `-1`.
pub const LARGE_TAG: i64 = -1;

/// Common prefix shared by every chunk, bucketed or large.
///
/// For a bucketed chunk, `tag` packs both the size-class index (low
/// byte) and the owning arena index (next byte) — see
/// `ChunkHeader::bucketed`/`class_index`/`arena_index`. Packing both
/// into the one field the spec calls `bucket_index` keeps the header
/// the same size as the original single-threaded design, which the
/// bucket schedule's slot counts are tuned against.
#[repr(C)]
#[derive(Debug)]
pub struct ChunkHeader {
    /// Byte length of the mapped region backing this chunk, needed
    /// to release it exactly (spec I6).
    pub chunk_size: usize,
    tag: i64,
}

impl ChunkHeader {
    pub fn large(chunk_size: usize) -> ChunkHeader {
        ChunkHeader {
            chunk_size,
            tag: LARGE_TAG,
        }
    }

    pub fn bucketed(chunk_size: usize, class_index: usize, arena_index: usize) -> ChunkHeader {
        debug_assert!(class_index < 256);
        debug_assert!(arena_index < 256);
        ChunkHeader {
            chunk_size,
            tag: (class_index as i64) | ((arena_index as i64) << 8),
        }
    }

    #[inline(always)]
    pub fn is_large(&self) -> bool {
        self.tag == LARGE_TAG
    }

    /// Precondition: `!self.is_large()`.
    #[inline(always)]
    pub fn class_index(&self) -> usize {
        debug_assert!(!self.is_large());
        (self.tag & 0xFF) as usize
    }

    /// Precondition: `!self.is_large()`.
    #[inline(always)]
    pub fn arena_index(&self) -> usize {
        debug_assert!(!self.is_large());
        ((self.tag >> 8) & 0xFF) as usize
    }
}

/// A bucketed chunk: header, sibling links for the per-class chunk
/// list, and the occupancy bitmap, followed immediately by the slot
/// payload (not represented in this struct — it's computed with
/// pointer arithmetic in `first_slot_ptr`/`slot_ptr`).
#[repr(C)]
pub struct BucketChunkHeader {
    pub chunk: ChunkHeader,
    pub prev: *mut BucketChunkHeader,
    pub next: *mut BucketChunkHeader,
    pub bitmap: Bitmap256,
}

// BucketChunkHeader is safe to Send/Sync because every access to its
// sibling pointers and bitmap happens through the owning arena's
// mutex (spec I5) — same justification the teacher gives
// MagazineStack in magazine_stack.rs for its own intrusive list.
unsafe impl Send for BucketChunkHeader {}
unsafe impl Sync for BucketChunkHeader {}

impl BucketChunkHeader {
    /// Address of slot 0, immediately after this header.
    #[inline(always)]
    pub fn first_slot_ptr(chunk: NonNull<BucketChunkHeader>) -> *mut u8 {
        unsafe { (chunk.as_ptr() as *mut u8).add(std::mem::size_of::<BucketChunkHeader>()) }
    }

    /// Address of slot `index`, `element_size` bytes per slot.
    #[requires(index < 256, "slot indices never exceed the bitmap's width")]
    #[inline(always)]
    pub fn slot_ptr(
        chunk: NonNull<BucketChunkHeader>,
        index: usize,
        element_size: usize,
    ) -> *mut u8 {
        unsafe { Self::first_slot_ptr(chunk).add(index * element_size) }
    }

    /// Recovers the slot index for `block`, a pointer returned by
    /// `slot_ptr` (viewed as a `BlockHeader`). The division is exact
    /// by construction (spec §4.4).
    pub fn slot_index_of(
        chunk: NonNull<BucketChunkHeader>,
        block: NonNull<BlockHeader>,
        element_size: usize,
    ) -> usize {
        let first = Self::first_slot_ptr(chunk) as usize;
        let block_addr = block.as_ptr() as usize;
        debug_assert!(block_addr >= first);
        (block_addr - first) / element_size
    }
}

/// The single pointer-sized header preceding every live payload.
/// `free` reads `p - sizeof(BlockHeader)` to recover the owning
/// chunk and never rewrites this field after it's stamped (spec I4).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockHeader {
    pub parent_chunk: NonNull<ChunkHeader>,
}

// The block header must be exactly pointer-sized: the data model
// (spec §3) relies on "one pointer-sized header" to keep the bucket
// schedule's element sizes and slot counts valid.
assert_eq_size!(BlockHeader, usize);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_round_trips() {
        for class_index in 0..8usize {
            for arena_index in 0..4usize {
                let header = ChunkHeader::bucketed(4096, class_index, arena_index);
                assert!(!header.is_large());
                assert_eq!(header.class_index(), class_index);
                assert_eq!(header.arena_index(), arena_index);
            }
        }
    }

    #[test]
    fn large_tag_is_recognizable() {
        let header = ChunkHeader::large(8192);
        assert!(header.is_large());
    }
}
