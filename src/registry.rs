//! Zone Registry: the crate's single global mutable singleton, three
//! address-ordered zone lists (TINY/SMALL/LARGE) guarded by one
//! process-wide lock.
//!
//! `ZoneList`/`Spinlock` are both `const`-constructible, so the
//! singleton below is a plain `static` built at compile time: there is
//! no lazy-init step, and bootstrapping the registry never itself
//! needs to allocate.

use crate::lock::Spinlock;
use crate::types::SizeClass;
use crate::zone::{Zone, ZoneList};

pub struct Registry {
    tiny: ZoneList,
    small: ZoneList,
    large: ZoneList,
}

impl Registry {
    const fn new() -> Registry {
        Registry {
            tiny: ZoneList::new(),
            small: ZoneList::new(),
            large: ZoneList::new(),
        }
    }

    pub fn list_mut(&mut self, class: SizeClass) -> &mut ZoneList {
        match class {
            SizeClass::Tiny => &mut self.tiny,
            SizeClass::Small => &mut self.small,
            SizeClass::Large => &mut self.large,
        }
    }

    pub fn list(&self, class: SizeClass) -> &ZoneList {
        match class {
            SizeClass::Tiny => &self.tiny,
            SizeClass::Small => &self.small,
            SizeClass::Large => &self.large,
        }
    }

    /// Scan all three lists (TINY, SMALL, LARGE, in that order, the
    /// order `show_alloc_mem` prints in) for the zone containing `ptr`.
    pub fn find_zone_for_ptr(&self, ptr: *const u8) -> Option<Zone> {
        self.tiny
            .find_for_ptr(ptr)
            .or_else(|| self.small.find_for_ptr(ptr))
            .or_else(|| self.large.find_for_ptr(ptr))
    }
}

static REGISTRY: Spinlock<Registry> = Spinlock::new(Registry::new());

/// Run `f` with exclusive access to the registry. Every public API
/// entry point (`malloc`/`free`/`realloc`/`show_alloc_mem`) goes through
/// exactly one call to this function, so the lock is held across the
/// whole operation: classification, zone scan, possible zone creation,
/// split/coalesce, and retention check all happen atomically with
/// respect to other threads.
pub fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    let mut guard = REGISTRY.lock();
    f(&mut guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        with_registry(|reg| {
            assert!(reg.list(SizeClass::Tiny).is_empty());
            assert!(reg.list(SizeClass::Small).is_empty());
            assert!(reg.list(SizeClass::Large).is_empty());
        });
    }
}
