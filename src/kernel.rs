use std::ptr::NonNull;

use log::{debug, warn};

use crate::{AllocError, AllocResult, PAGE_SIZE};

/// Source of the pages the allocator carves blocks from.
///
/// Every page handed out must be [`PAGE_SIZE`] bytes long, aligned to
/// [`PAGE_SIZE`], zero-initialized, readable and writable. The allocator never
/// asks for anything else, so implementations don't need to deal with sizes.
pub trait PageProvider {
    /// Maps a new page and returns its base address.
    fn acquire_page(&mut self) -> AllocResult<NonNull<u8>>;

    /// Gives the page starting at `base` back.
    ///
    /// # Safety
    ///
    /// `base` must have been returned by [`PageProvider::acquire_page`] on this
    /// same provider and must not have been released already. Every pointer into
    /// the page is dangling afterwards.
    unsafe fn release_page(&mut self, base: NonNull<u8>);
}

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the allocator, our top level view of this, has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    /// Returns `false` if the kernel refused to take it.
    unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size() -> usize;
}

/// Pages mapped straight from the operating system.
#[derive(Debug, Default)]
pub struct OsPages {
    _private: (),
}

impl OsPages {
    pub fn new() -> Self {
        debug!("os page size is {} bytes, allocator pages are {PAGE_SIZE}", os_page_size());
        Self { _private: () }
    }
}

/// Virtual memory page size of the computer. This is usually 4096.
///
/// Mappings are always aligned to this, so as long as it is a multiple of
/// [`PAGE_SIZE`] the pages we get are [`PAGE_SIZE`] aligned as well.
pub fn os_page_size() -> usize {
    OsPages::page_size()
}

impl PageProvider for OsPages {
    fn acquire_page(&mut self) -> AllocResult<NonNull<u8>> {
        // Safety: we ask for a fresh anonymous mapping, nothing else is touched.
        let base = unsafe { Self::request_memory(PAGE_SIZE) }.ok_or(AllocError::OutOfMemory)?;

        debug!("mapped page at {base:p}");

        Ok(base)
    }

    unsafe fn release_page(&mut self, base: NonNull<u8>) {
        let released = unsafe { Self::return_memory(base, PAGE_SIZE) };

        // There is no way to recover from the kernel refusing to unmap a page
        // we own, our bookkeeping already forgot about it.
        assert!(released, "kernel refused to unmap page at {base:p}");

        debug!("unmapped page at {base:p}");
    }
}

#[cfg(unix)]
mod unix {
    use super::{OsPages, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::{self, NonNull},
    };

    impl PlatformMemory for OsPages {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let addr = unsafe { mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET) };

            if addr == libc::MAP_FAILED {
                return None;
            }

            NonNull::new(addr.cast::<u8>())
        }

        unsafe fn return_memory(addr: NonNull<u8>, len: usize) -> bool {
            unsafe { munmap(addr.as_ptr().cast::<c_void>(), len as size_t) == 0 }
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{OsPages, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for OsPages {
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: NonNull<u8>, _len: usize) -> bool {
            unsafe { Memory::VirtualFree(addr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE).is_ok() }
        }

        fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// Provider that refuses to keep more than `limit` pages mapped at once.
///
/// Once the budget is spent [`PageProvider::acquire_page`] fails with
/// [`AllocError::OutOfMemory`] until some page is released. It also keeps count
/// of the pages that went through it, which makes page growth and reclamation
/// observable.
#[derive(Debug)]
pub struct BoundedPages<P = OsPages> {
    inner: P,
    limit: usize,
    acquired: usize,
    released: usize,
}

impl<P: PageProvider> BoundedPages<P> {
    pub fn new(inner: P, limit: usize) -> Self {
        Self {
            inner,
            limit,
            acquired: 0,
            released: 0,
        }
    }

    /// Pages currently mapped through this provider.
    #[inline]
    pub fn live(&self) -> usize {
        self.acquired - self.released
    }

    /// Pages mapped so far.
    #[inline]
    pub fn acquired(&self) -> usize {
        self.acquired
    }

    /// Pages given back so far.
    #[inline]
    pub fn released(&self) -> usize {
        self.released
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl<P: PageProvider> PageProvider for BoundedPages<P> {
    fn acquire_page(&mut self) -> AllocResult<NonNull<u8>> {
        if self.live() >= self.limit {
            warn!("page limit of {} reached", self.limit);
            return Err(AllocError::OutOfMemory);
        }

        let base = self.inner.acquire_page()?;
        self.acquired += 1;

        Ok(base)
    }

    unsafe fn release_page(&mut self, base: NonNull<u8>) {
        unsafe { self.inner.release_page(base) };
        self.released += 1;
    }
}
