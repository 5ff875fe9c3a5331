//! A size-classed, boundary-tagged heap engine implementing the
//! classic `malloc`/`free`/`realloc` contract over raw `mmap`'d zones.
//!
//! Requests are aligned to 16 bytes and classified into TINY (≤512 B),
//! SMALL (≤4096 B), or LARGE buckets (`types.rs`). TINY/SMALL requests
//! are served first-fit from a registry of reusable zones (`zone.rs`,
//! `registry.rs`) using in-band boundary-tagged blocks that split on
//! allocation and coalesce on free (`block.rs`); LARGE requests always
//! get a dedicated zone that is unmapped the moment it is freed. Every
//! public entry point serializes on a single process-wide spinlock
//! (`lock.rs`), so every observable state transition is linearizable.
//! See DESIGN.md for the grounding ledger behind each module.
#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

use core::alloc::{GlobalAlloc, Layout};
use core::cmp::min;
use core::ptr::{copy_nonoverlapping, null_mut};

mod block;
mod diag;
mod lock;
mod os;
mod registry;
mod types;
mod zone;

use registry::{with_registry, Registry};
use types::{align_up, SizeClass, ALIGNMENT};
use zone::Zone;

/// Allocate `size` bytes, aligned to 16, from the appropriately sized
/// zone, creating a new zone if no existing one has room. `size == 0`
/// returns a null pointer without touching any state.
///
/// # Safety
/// The returned pointer, if non-null, must eventually be passed to
/// `free` or `realloc` from this crate and not to any other allocator.
pub unsafe extern "C" fn malloc(size: usize) -> *mut u8 {
    if size == 0 {
        return null_mut();
    }
    let aligned = align_up(size, ALIGNMENT);
    let class = SizeClass::classify(aligned);
    with_registry(|reg| malloc_locked(reg, class, aligned))
}

/// Release the block backing `ptr`. A null pointer, a pointer foreign
/// to this allocator, or a pointer to an already-free block are all
/// silently ignored.
///
/// # Safety
/// `ptr` must either be null or have been returned by `malloc`/`realloc`
/// from this crate and not yet freed.
pub unsafe extern "C" fn free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    with_registry(|reg| free_locked(reg, ptr));
}

/// Resize the allocation backing `ptr` to `size` bytes, preserving
/// `min(old_payload, size)` bytes of content.
///
/// `ptr == null` behaves as `malloc(size)`; `size == 0` frees `ptr` and
/// returns null. If `ptr` is not inside any zone this crate owns,
/// returns null without freeing `ptr`.
///
/// # Safety
/// Same contract as `malloc`/`free` combined: `ptr` must be null or a
/// live pointer from this allocator.
pub unsafe extern "C" fn realloc(ptr: *mut u8, size: usize) -> *mut u8 {
    if ptr.is_null() {
        return malloc(size);
    }
    if size == 0 {
        free(ptr);
        return null_mut();
    }
    with_registry(|reg| realloc_locked(reg, ptr, size))
}

/// Print every live (in-use) block across all zones to the process's
/// standard output, one line per live block, then a grand total line.
/// Returns that total, which is incidental to the public contract but
/// lets callers (and this crate's own tests) check the result without
/// scraping stdout.
pub fn show_alloc_mem() -> usize {
    with_registry(|reg| diag::dump(reg))
}

/// Try every existing zone of `class` first (skipped entirely for
/// LARGE, which always gets a dedicated zone); on a total
/// miss, map a fresh zone, register it, and allocate from it. Must be
/// called with the registry lock held.
fn malloc_locked(reg: &mut Registry, class: SizeClass, aligned: usize) -> *mut u8 {
    if class != SizeClass::Large {
        for existing in reg.list(class).iter() {
            if let Some(ptr) = existing.allocate(aligned) {
                return ptr;
            }
        }
    }

    let total_size = zone::zone_size_for(class, aligned);
    match zone::create_zone(total_size, class) {
        Some(fresh) => {
            reg.list_mut(class).insert(fresh);
            fresh.allocate(aligned).unwrap_or(null_mut())
        }
        None => null_mut(),
    }
}

/// Locate the owning zone, free the block, and apply the retention
/// policy. A foreign pointer (not inside any zone) is a no-op. Must be
/// called with the registry lock held.
fn free_locked(reg: &mut Registry, ptr: *mut u8) {
    let zone = match reg.find_zone_for_ptr(ptr) {
        Some(zone) => zone,
        None => return,
    };
    if !zone.free(ptr) {
        return; // already free: best-effort double-free tolerance.
    }
    apply_retention_policy(reg, zone);
}

/// Retention policy: LARGE zones are always unmapped once their sole
/// block is freed; TINY/SMALL zones are unmapped when empty unless they
/// are the last zone of their class, to avoid thrashing under
/// malloc-free-malloc churn.
fn apply_retention_policy(reg: &mut Registry, zone: Zone) {
    let class = zone.class();
    if class == SizeClass::Large {
        reg.list_mut(class).remove(zone);
        zone::destroy_zone(zone);
        return;
    }
    if zone.is_empty() {
        let list = reg.list_mut(class);
        if list.len() > 1 {
            list.remove(zone);
            zone::destroy_zone(zone);
        }
    }
}

/// Shrink-in-place when the existing block already fits; otherwise
/// malloc a new block, copy `min(old_payload, size)` bytes, and free the
/// old one. `size` is the caller's raw (unaligned) request, so the copy
/// length matches the raw request exactly. Returns null (without freeing `ptr`) if
/// `ptr` is foreign or the grow allocation fails. Must be called with
/// the registry lock held.
fn realloc_locked(reg: &mut Registry, ptr: *mut u8, size: usize) -> *mut u8 {
    let zone = match reg.find_zone_for_ptr(ptr) {
        Some(zone) => zone,
        None => return null_mut(),
    };
    let old = zone.block_for_ptr(ptr).payload_size();
    let aligned = align_up(size, ALIGNMENT);
    if aligned <= old {
        return ptr;
    }

    let class = SizeClass::classify(aligned);
    let new_ptr = malloc_locked(reg, class, aligned);
    if new_ptr.is_null() {
        return null_mut();
    }

    unsafe {
        copy_nonoverlapping(ptr, new_ptr, min(old, size));
    }
    free_locked(reg, ptr);
    new_ptr
}

/// Drop-in `#[global_allocator]` built on top of `malloc`/`free`/
/// `realloc`.
///
/// Over-alignment beyond `types::ALIGNMENT` (16 bytes) is not honored:
/// every block this crate hands out is 16-byte aligned, but a caller
/// requesting a 32- or 64-byte-aligned layout will not get one. This
/// mirrors this allocator's fixed 16-byte alignment contract rather than
/// silently doing the wrong thing: debug builds assert on it.
pub struct Heap;

unsafe impl GlobalAlloc for Heap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        debug_assert!(layout.align() <= ALIGNMENT);
        malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        debug_assert!(layout.align() <= ALIGNMENT);
        realloc(ptr, new_size)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.alloc(layout);
        if !ptr.is_null() {
            core::ptr::write_bytes(ptr, 0, layout.size());
        }
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::vec::Vec;

    /// The heap is one process-wide singleton, so tests that observe
    /// its aggregate state (`show_alloc_mem` totals, zone counts) must
    /// not run concurrently with each other.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn fill(ptr: *mut u8, byte: u8, len: usize) {
        unsafe { core::ptr::write_bytes(ptr, byte, len) };
    }

    fn read_byte(ptr: *mut u8, offset: usize) -> u8 {
        unsafe { *ptr.add(offset) }
    }

    #[test]
    fn s1_basic_round_trip_reports_aligned_sizes() {
        let _guard = TEST_LOCK.lock().unwrap();
        let baseline = show_alloc_mem();

        unsafe {
            let a = malloc(42);
            let b = malloc(1024);
            let c = malloc(5000);
            assert!(!a.is_null() && !b.is_null() && !c.is_null());
            fill(a, b'X', 42);
            fill(b, b'X', 1024);
            fill(c, b'X', 5000);

            let total = show_alloc_mem();
            assert_eq!(total, baseline + 48 + 1024 + 5008);

            free(a);
            free(b);
            free(c);
            assert_eq!(show_alloc_mem(), baseline);
        }
    }

    #[test]
    fn s2_coalesced_even_frees_satisfy_later_allocation() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            let mut ptrs: Vec<*mut u8> = Vec::with_capacity(100);
            for _ in 0..100 {
                let p = malloc(32);
                assert!(!p.is_null());
                ptrs.push(p);
            }
            for (i, p) in ptrs.iter().enumerate() {
                if i % 2 == 0 {
                    free(*p);
                }
            }

            let reused = malloc(64);
            assert!(!reused.is_null());

            free(reused);
            for (i, p) in ptrs.iter().enumerate() {
                if i % 2 != 0 {
                    free(*p);
                }
            }
        }
    }

    #[test]
    fn s3_grow_realloc_preserves_prefix_and_invalidates_old_pointer() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            let p = malloc(100);
            assert!(!p.is_null());
            fill(p, b'Y', 100);

            let q = realloc(p, 2000);
            assert!(!q.is_null());
            for i in 0..100 {
                assert_eq!(read_byte(q, i), b'Y');
            }

            free(q);
        }
    }

    #[test]
    fn s4_large_zone_is_unmapped_on_free() {
        let _guard = TEST_LOCK.lock().unwrap();
        let baseline = show_alloc_mem();
        unsafe {
            let p = malloc(1_000_000);
            assert!(!p.is_null());
            assert!(!registry::with_registry(|reg| reg.list(SizeClass::Large).is_empty()));

            free(p);
            assert_eq!(show_alloc_mem(), baseline);
            assert!(registry::with_registry(|reg| reg.list(SizeClass::Large).is_empty()));
        }
    }

    #[test]
    fn s5_foreign_free_is_a_silent_no_op() {
        let _guard = TEST_LOCK.lock().unwrap();
        let before = show_alloc_mem();
        unsafe {
            free(0x12345usize as *mut u8);
        }
        let after = show_alloc_mem();
        assert_eq!(before, after);
    }

    #[test]
    fn s6_tiny_list_retains_exactly_one_zone_under_churn() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            for _ in 0..100_000 {
                let p = malloc(64);
                assert!(!p.is_null());
                free(p);
            }
        }
        let tiny_zones = registry::with_registry(|reg| reg.list(SizeClass::Tiny).len());
        assert_eq!(tiny_zones, 1);
    }

    #[test]
    fn malloc_zero_returns_null() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            assert!(malloc(0).is_null());
        }
    }

    #[test]
    fn realloc_of_null_behaves_like_malloc() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            let p = realloc(null_mut(), 64);
            assert!(!p.is_null());
            free(p);
        }
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            let p = malloc(64);
            assert!(!p.is_null());
            let q = realloc(p, 0);
            assert!(q.is_null());
        }
    }

    #[test]
    fn returned_pointers_are_16_byte_aligned() {
        let _guard = TEST_LOCK.lock().unwrap();
        unsafe {
            for size in [1usize, 17, 512, 513, 4096, 4097, 100_000] {
                let p = malloc(size);
                assert!(!p.is_null());
                assert_eq!(p as usize % ALIGNMENT, 0);
                free(p);
            }
        }
    }
}