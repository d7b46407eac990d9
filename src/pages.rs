use std::{marker::PhantomData, mem, ptr::NonNull, sync::OnceLock};

use log::{debug, warn};

use crate::{block::Block, list::Node, utils::align};

/// Supplier of the raw memory a [`crate::Heap`] carves blocks out of.
///
/// The heap only ever asks for whole pages and never hands memory back, but
/// [`PageSource::release_pages`] is part of the contract so a source can be
/// shared with code that does.
///
/// # Safety
///
/// Memory returned by [`PageSource::acquire_pages`] must be readable and
/// writable, aligned to at least 8 bytes, at least `len` bytes long, and
/// must not be handed out again until it is released.
pub unsafe trait PageSource {
    /// Request a memory region of at least `len` bytes. Returns `None` if
    /// the source is exhausted.
    fn acquire_pages(&mut self, len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the
    /// source.
    ///
    /// **SAFETY**: `addr` and `len` must describe a region previously
    /// returned by [`PageSource::acquire_pages`] that is no longer in use.
    unsafe fn release_pages(&mut self, addr: NonNull<u8>, len: usize);
}

/// Virtual memory page size of the computer. This is usually 4096, but we
/// can't know it at compile time.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Wrapper to calculate the computer's page size once.
#[inline]
pub fn system_page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { platform::page_size() })
}

/// Pages straight from the operating system: `mmap` on Unix and
/// `VirtualAlloc` on Windows.
///
/// Every request is rounded up to the OS page size, so asking for a
/// 4096-byte page on a system with 16 KiB pages maps 16 KiB. Set
/// [`crate::HeapConfig::page_size`] to [`system_page_size`] to use all of it.
#[derive(Debug, Default)]
pub struct SystemPages {
    _private: (),
}

impl SystemPages {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

unsafe impl PageSource for SystemPages {
    fn acquire_pages(&mut self, len: usize) -> Option<NonNull<u8>> {
        let len = align(len, system_page_size());

        unsafe { platform::request_memory(len) }
    }

    unsafe fn release_pages(&mut self, addr: NonNull<u8>, len: usize) {
        let len = align(len, system_page_size());

        unsafe { platform::return_memory(addr, len) }
    }
}

#[cfg(unix)]
mod platform {
    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    use libc::{mmap, munmap, off_t, size_t};

    pub(super) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // mmap parameters.
        const ADDR: *mut c_void = ptr::null_mut::<c_void>();
        // Read-Write only memory.
        const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
        const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        const FD: c_int = -1;
        const OFFSET: off_t = 0;

        let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

        if addr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(addr.cast::<u8>())
        }
    }

    pub(super) unsafe fn return_memory(addr: NonNull<u8>, len: usize) {
        unsafe {
            munmap(addr.as_ptr().cast::<c_void>(), len as size_t);
        }
    }

    pub(super) unsafe fn page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }
}

#[cfg(windows)]
mod platform {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    pub(super) unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
        // Read-Write only.
        let protection = Memory::PAGE_READWRITE;

        let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

        unsafe {
            let addr = Memory::VirtualAlloc(None, len, flags, protection);

            NonNull::new(addr.cast())
        }
    }

    pub(super) unsafe fn return_memory(addr: NonNull<u8>, _len: usize) {
        unsafe {
            let _ = Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
        }
    }

    pub(super) unsafe fn page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }
}

/// Pages carved one after another out of a caller-provided buffer.
///
/// Consecutive pages are adjacent in memory, which makes addresses fully
/// predictable. Released pages are not reused.
///
/// ```text
/// buffer
/// +--------+--------+--------+-----------------+
/// | page 0 | page 1 | page 2 |   unused ...    |
/// +--------+--------+--------+-----------------+
///                            ^
///                            next
/// ```
pub struct ArenaPages<'a> {
    next: NonNull<u8>,
    remaining: usize,
    marker: PhantomData<&'a mut [u8]>,
}

impl<'a> ArenaPages<'a> {
    /// Hands out pages from `buf`. The first few bytes may be skipped so
    /// every page starts suitably aligned for a block header.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let base = buf.as_mut_ptr();
        let skip = align(base as usize, mem::align_of::<Node<Block>>()) - base as usize;
        let remaining = buf.len().saturating_sub(skip);

        Self {
            // An empty slice still has a dangling, non-null pointer.
            next: NonNull::new(base.wrapping_add(skip.min(buf.len())))
                .unwrap_or(NonNull::dangling()),
            remaining,
            marker: PhantomData,
        }
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

unsafe impl PageSource for ArenaPages<'_> {
    fn acquire_pages(&mut self, len: usize) -> Option<NonNull<u8>> {
        let len = align(len, mem::align_of::<Node<Block>>());

        if len > self.remaining {
            warn!("arena exhausted: {len} bytes requested, {} left", self.remaining);
            return None;
        }

        let page = self.next;
        self.next = unsafe { self.next.add(len) };
        self.remaining -= len;

        Some(page)
    }

    unsafe fn release_pages(&mut self, addr: NonNull<u8>, len: usize) {
        debug!("arena page {addr:p} ({len} bytes) released, not reused");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn arena_pages_are_adjacent() {
        let mut buf = vec![0u8; 3 * 4096 + 64];
        let mut arena = ArenaPages::new(&mut buf);

        let first = arena.acquire_pages(4096).unwrap();
        let second = arena.acquire_pages(4096).unwrap();
        let third = arena.acquire_pages(4096).unwrap();

        assert_eq!(first.as_ptr() as usize % 8, 0);
        assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, 4096);
        assert_eq!(third.as_ptr() as usize - second.as_ptr() as usize, 4096);
        assert!(arena.acquire_pages(4096).is_none());
    }

    #[test]
    fn arena_rounds_requests_to_header_alignment() {
        let mut buf = vec![0u8; 256];
        let mut arena = ArenaPages::new(&mut buf);
        let before = arena.remaining();

        let first = arena.acquire_pages(12).unwrap();
        let second = arena.acquire_pages(8).unwrap();

        assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, 16);
        assert_eq!(before - arena.remaining(), 24);
    }

    #[test]
    fn empty_arena_has_no_pages() {
        let mut buf: Vec<u8> = Vec::new();
        let mut arena = ArenaPages::new(&mut buf);

        assert!(arena.acquire_pages(8).is_none());
    }

    #[test]
    fn system_pages_are_usable() {
        let mut pages = SystemPages::new();

        unsafe {
            let page = pages.acquire_pages(4096).unwrap();
            let words = page.cast::<u64>();

            words.write(2);
            words.add(511).write(45);
            assert_eq!(words.read(), 2);
            assert_eq!(words.add(511).read(), 45);

            pages.release_pages(page, 4096);
        }
    }

    #[test]
    fn system_page_size_is_a_power_of_two() {
        assert!(system_page_size().is_power_of_two());
        assert_eq!(system_page_size(), system_page_size());
    }
}
