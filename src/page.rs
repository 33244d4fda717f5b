//! Primitive allocation from the OS: round byte counts up to page
//! multiples, mmap/munmap page-aligned anonymous regions, and abort
//! the process with a diagnostic when the OS cannot satisfy a
//! mapping request.
//!
//! The actual mmap/munmap syscalls are an out-of-scope external
//! collaborator (spec §1); we reach them through `libc` directly
//! rather than vendoring a C shim, since nothing here needs more than
//! what `libc::mmap`/`libc::munmap` already expose.
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

use std::ffi::c_void;
use std::ptr::NonNull;

/// The schedule in `size_class` is tuned to 4KiB pages; we don't
/// probe `sysconf(_SC_PAGESIZE)` because every platform this crate
/// targets uses that page size for anonymous mmap.
pub const PAGE_SIZE: usize = 4096;

#[inline]
fn round_up_to_page(bytes: usize) -> usize {
    let pages = (bytes + PAGE_SIZE - 1) / PAGE_SIZE;
    pages * PAGE_SIZE
}

/// Emits a diagnostic naming the OS failure and aborts the process.
/// There is no recovery path: allocation either succeeds or the
/// process ends (spec §7).
#[cold]
fn die(what: &str) -> ! {
    let err = errno::errno();
    log::error!("bucketalloc: {} failed: {}", what, err);
    std::process::abort();
}

/// Obtains a fresh page-aligned region of at least `bytes` bytes,
/// rounded up to a whole number of pages. Aborts on failure.
#[ensures(ret.1 % PAGE_SIZE == 0, "the returned size is a whole number of pages")]
#[ensures(ret.1 >= bytes, "the returned region covers at least the request")]
#[ensures(ret.0.as_ptr() as usize % PAGE_SIZE == 0, "the returned address is page-aligned")]
pub fn acquire(bytes: usize) -> (NonNull<u8>, usize) {
    let size = round_up_to_page(bytes.max(1));

    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if addr == libc::MAP_FAILED {
        die("mmap");
    }

    let ptr = NonNull::new(addr as *mut u8).unwrap_or_else(|| die("mmap returned null"));
    (ptr, size)
}

/// Releases exactly the region previously returned by a matching
/// `acquire` call (same pointer, same rounded-up size).
#[requires(size % PAGE_SIZE == 0, "only whole pages are ever released")]
pub unsafe fn release(region: NonNull<u8>, size: usize) {
    if size == 0 {
        return;
    }

    let ret = libc::munmap(region.as_ptr() as *mut c_void, size);
    if ret != 0 {
        die("munmap");
    }
}
