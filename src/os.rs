//! The Page Source: the abstract `map_pages`/`unmap_pages`/`page_size`
//! collaborator the rest of the crate treats as an external boundary.
//!
//! A Unix backend (`libc` `mmap`/`munmap`) and a Windows backend
//! (`winapi` `VirtualAlloc`/`VirtualFree`) cover the primitives the heap
//! engine actually needs: reserve-and-commit one anonymous, zeroed,
//! read-write mapping, and release it again.

use core::sync::atomic::{AtomicUsize, Ordering};

#[cfg(not(windows))]
use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

#[cfg(windows)]
use winapi::{
    shared::minwindef::LPVOID,
    um::{
        memoryapi::{VirtualAlloc, VirtualFree},
        sysinfoapi::GetSystemInfo,
        sysinfoapi::SYSTEM_INFO,
        winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE},
    },
};

use log::warn;

/// Cached system page size; 0 means "not yet queried".
static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The process's page size, as reported by the OS. Queried once and
/// cached.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let queried = query_page_size();
    PAGE_SIZE.store(queried, Ordering::Relaxed);
    queried
}

#[cfg(not(windows))]
fn query_page_size() -> usize {
    let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if result > 0 {
        result as usize
    } else {
        4096
    }
}

#[cfg(windows)]
fn query_page_size() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = core::mem::zeroed();
        GetSystemInfo(&mut info);
        if info.dwPageSize > 0 {
            info.dwPageSize as usize
        } else {
            4096
        }
    }
}

/// Reserve and commit `size` bytes of fresh, zeroed, read+write, private
/// anonymous memory. `size` must already be a multiple of `page_size()`.
/// Returns null on failure; the failure is logged once via `log::warn!`
/// with the OS error.
pub fn map_pages(size: usize) -> *mut u8 {
    debug_assert!(size > 0 && size % page_size() == 0);
    if size == 0 {
        return core::ptr::null_mut();
    }

    #[cfg(not(windows))]
    {
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if p == MAP_FAILED {
            warn!("map_pages: mmap failed: {}, size {}", errno::errno(), size);
            return core::ptr::null_mut();
        }
        p as *mut u8
    }
    #[cfg(windows)]
    {
        let p = unsafe {
            VirtualAlloc(
                core::ptr::null_mut(),
                size,
                MEM_RESERVE | MEM_COMMIT,
                PAGE_READWRITE,
            )
        };
        if p.is_null() {
            warn!("map_pages: VirtualAlloc failed, size {}", size);
        }
        p as *mut u8
    }
}

/// Release a region previously returned by `map_pages`. `size` must be
/// the same value passed to the matching `map_pages` call (Unix needs it
/// to unmap the right length; Windows ignores it since `VirtualFree`
/// with `MEM_RELEASE` always frees the whole allocation).
pub fn unmap_pages(addr: *mut u8, size: usize) {
    if addr.is_null() {
        return;
    }

    #[cfg(not(windows))]
    {
        let rc = unsafe { munmap(addr as *mut _, size) };
        if rc != 0 {
            warn!(
                "unmap_pages: munmap failed: {}, addr {:p}, size {}",
                errno::errno(),
                addr,
                size
            );
        }
    }
    #[cfg(windows)]
    {
        let ok = unsafe { VirtualFree(addr as LPVOID, 0, MEM_RELEASE) };
        if ok == 0 {
            warn!("unmap_pages: VirtualFree failed, addr {:p}", addr);
        }
    }
}

/// Write raw bytes directly to the process's standard output descriptor,
/// bypassing any buffered I/O layer that might itself allocate. Used only
/// by `show_alloc_mem`, which must never re-enter the allocator.
pub fn write_stdout(buf: &[u8]) {
    #[cfg(not(windows))]
    unsafe {
        libc::write(1, buf.as_ptr() as *const _, buf.len());
    }
    #[cfg(windows)]
    unsafe {
        use winapi::um::{
            fileapi::WriteFile, processenv::GetStdHandle, winbase::STD_OUTPUT_HANDLE,
        };
        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut written = 0u32;
        WriteFile(
            handle,
            buf.as_ptr() as *const _,
            buf.len() as u32,
            &mut written,
            core::ptr::null_mut(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::align_up;

    #[test]
    fn page_size_is_cached_and_sane() {
        let a = page_size();
        let b = page_size();
        assert_eq!(a, b);
        assert!(a >= 4096);
        assert!(a.is_power_of_two());
    }

    #[test]
    fn map_and_unmap_roundtrip() {
        let size = align_up(page_size(), page_size());
        let p = map_pages(size);
        assert!(!p.is_null());
        unsafe {
            core::ptr::write_bytes(p, 0xAA, size);
        }
        unmap_pages(p, size);
    }

    #[test]
    fn unmap_of_null_is_a_no_op() {
        unmap_pages(core::ptr::null_mut(), 4096);
    }
}
