//! The large-allocation path: requests too big for any bucket are
//! mapped directly, one `mmap` per allocation, with no locking (spec
//! §4.7) — each mapping is independent of every other.
use std::ptr::NonNull;

use crate::chunk::{BlockHeader, ChunkHeader};
use crate::page;

/// Maps a fresh region sized to hold `n` payload bytes plus both
/// headers, stamps a large `ChunkHeader` and a `BlockHeader`, and
/// returns the payload address.
pub fn allocate(n: usize) -> NonNull<u8> {
    let header_bytes = std::mem::size_of::<ChunkHeader>() + std::mem::size_of::<BlockHeader>();
    let (region, mapped_size) = page::acquire(n + header_bytes);

    let chunk = region.as_ptr() as *mut ChunkHeader;
    unsafe {
        std::ptr::write(chunk, ChunkHeader::large(mapped_size));

        let block = chunk.add(1) as *mut BlockHeader;
        std::ptr::write(
            block,
            BlockHeader {
                parent_chunk: NonNull::new_unchecked(chunk),
            },
        );

        NonNull::new_unchecked(block.add(1) as *mut u8)
    }
}

/// Unmaps the whole region backing a large allocation.
///
/// # Safety
/// `chunk` must be the `ChunkHeader` of a still-live large allocation
/// (i.e. `chunk.is_large()`).
pub unsafe fn release(chunk: NonNull<ChunkHeader>) {
    let chunk_size = chunk.as_ref().chunk_size;
    page::release(chunk.cast::<u8>(), chunk_size);
}

/// Usable payload bytes for a live large allocation, needed by
/// `reallocate` to decide whether a copy is necessary (spec §4.8).
pub unsafe fn usable_size(chunk: NonNull<ChunkHeader>) -> usize {
    let header_bytes = std::mem::size_of::<ChunkHeader>() + std::mem::size_of::<BlockHeader>();
    chunk.as_ref().chunk_size - header_bytes
}
