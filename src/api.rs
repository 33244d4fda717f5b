//! The three public operations: `allocate`, `free`, `reallocate`.
//! Everything here dispatches on the block header every live payload
//! carries, routing to either the bucket engine or the large path.
use std::ptr::NonNull;

use crate::arena;
use crate::chunk::{BlockHeader, ChunkHeader};
use crate::large;
use crate::size_class::{self, Classification};

/// Largest request this allocator will ever accept (spec §4.1): the
/// post-header size must still fit in an `i64` tag-free `usize`
/// comfortably, and mirrors the original's `assert(n < INT_MAX)`.
const MAX_REQUEST: usize = i32::MAX as usize;

/// Allocates `n` bytes, returning a pointer valid for reads and
/// writes of `n` bytes. Aborts (via `page::die`, reached through the
/// bucket/large paths) rather than returning null on OS failure.
///
/// # Panics
/// Panics if `n >= i32::MAX` (spec §4.1).
pub fn allocate(n: usize) -> NonNull<u8> {
    assert!(n < MAX_REQUEST, "bucketalloc: request size {} too large", n);

    let size = n + std::mem::size_of::<BlockHeader>();
    match size_class::classify(size) {
        Classification::Bucket(class_index) => arena::allocate(class_index),
        Classification::Large => large::allocate(n),
    }
}

/// Frees a pointer previously returned by `allocate` or `reallocate`.
/// A null pointer is a no-op (spec §4.2).
///
/// # Safety
/// `p` must be null or a still-live pointer returned by this crate's
/// `allocate`/`reallocate`, not already freed.
pub unsafe fn free(p: *mut u8) {
    if p.is_null() {
        return;
    }

    let block = NonNull::new_unchecked((p as *mut BlockHeader).offset(-1));
    let chunk: NonNull<ChunkHeader> = block.as_ref().parent_chunk;

    if chunk.as_ref().is_large() {
        large::release(chunk);
    } else {
        let class_index = chunk.as_ref().class_index();
        let arena_index = chunk.as_ref().arena_index();
        arena::release(arena_index, class_index, chunk.cast(), block);
    }
}

/// Usable payload size of a live bucketed or large allocation, used
/// internally by `reallocate` (spec §4.8).
unsafe fn usable_size(chunk: NonNull<ChunkHeader>) -> usize {
    if chunk.as_ref().is_large() {
        large::usable_size(chunk)
    } else {
        let class_index = chunk.as_ref().class_index();
        crate::size_class::SCHEDULE[class_index].element_size
            - std::mem::size_of::<BlockHeader>()
    }
}

/// Resizes a live allocation, preserving the lesser of the old and
/// new sizes' worth of content (spec §4.8, P4). `p` null behaves like
/// `allocate`; `n == 0` behaves like `free` and returns null.
///
/// # Safety
/// `p` must be null or a still-live pointer returned by this crate's
/// `allocate`/`reallocate`.
pub unsafe fn reallocate(p: *mut u8, n: usize) -> *mut u8 {
    if p.is_null() {
        return allocate(n).as_ptr();
    }

    if n == 0 {
        free(p);
        return std::ptr::null_mut();
    }

    let block = NonNull::new_unchecked((p as *mut BlockHeader).offset(-1));
    let chunk: NonNull<ChunkHeader> = block.as_ref().parent_chunk;
    let old_usable = usable_size(chunk);

    let new_p = allocate(n);
    let copy_len = old_usable.min(n);
    std::ptr::copy_nonoverlapping(p, new_p.as_ptr(), copy_len);
    free(p);

    new_p.as_ptr()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[test]
    fn allocate_free_small() {
        let p = allocate(16);
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0x11, 16);
            free(p.as_ptr());
        }
    }

    #[test]
    fn allocate_free_large() {
        let p = allocate(1 << 20);
        unsafe {
            std::ptr::write_bytes(p.as_ptr(), 0x22, 1 << 20);
            free(p.as_ptr());
        }
    }

    #[test]
    fn free_null_is_a_no_op() {
        unsafe { free(std::ptr::null_mut()) };
    }

    #[test]
    fn reallocate_null_behaves_like_allocate() {
        unsafe {
            let p = reallocate(std::ptr::null_mut(), 8);
            assert!(!p.is_null());
            free(p);
        }
    }

    #[test]
    fn reallocate_zero_behaves_like_free() {
        let p = allocate(8);
        unsafe {
            let q = reallocate(p.as_ptr(), 0);
            assert!(q.is_null());
        }
    }

    #[test]
    fn reallocate_preserves_contents_growing() {
        unsafe {
            let p = allocate(8);
            std::ptr::copy_nonoverlapping(b"abcdefgh".as_ptr(), p.as_ptr(), 8);

            let q = reallocate(p.as_ptr(), 4096);
            let mut buf = [0u8; 8];
            std::ptr::copy_nonoverlapping(q, buf.as_mut_ptr(), 8);
            assert_eq!(&buf, b"abcdefgh");
            free(q);
        }
    }

    #[test]
    fn reallocate_preserves_contents_shrinking() {
        unsafe {
            let p = allocate(4096);
            std::ptr::write_bytes(p.as_ptr(), 0x7A, 4096);

            let q = reallocate(p.as_ptr(), 4);
            let mut buf = [0u8; 4];
            std::ptr::copy_nonoverlapping(q, buf.as_mut_ptr(), 4);
            assert_eq!(buf, [0x7A; 4]);
            free(q);
        }
    }

    #[test]
    #[should_panic]
    fn oversized_request_panics() {
        allocate(i32::MAX as usize);
    }

    #[test]
    fn concurrent_allocate_free_never_aliases() {
        let seen: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let p = allocate(32);
                        {
                            let mut seen = seen.lock().unwrap();
                            assert!(seen.insert(p.as_ptr() as usize));
                        }
                        unsafe {
                            std::ptr::write_bytes(p.as_ptr(), 0x5A, 32);
                        }
                        {
                            let mut seen = seen.lock().unwrap();
                            seen.remove(&(p.as_ptr() as usize));
                        }
                        unsafe { free(p.as_ptr()) };
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
