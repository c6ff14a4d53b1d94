//! Per-call-site receiver type caches.
//!
//! Each polymorphic call site owns a fixed number of weak class slots. The
//! cache has no state tag: it is uninitialized, monomorphic, polymorphic or
//! megamorphic purely by how many slots are occupied.
//!
//! # Concurrency
//!
//! Any number of threads may record receivers for the same site while the
//! collector clears dead slots. Recording scans slots left to right and
//! publishes with a compare-and-swap. A lost CAS re-examines the same slot,
//! since the winner may have written the very class being recorded.

use crate::gc::WeakClassSlot;
use crate::runtime::ClassRef;
use smallvec::SmallVec;

/// Number of receiver types tracked per call site.
pub const INDIVIDUAL_CACHE_SIZE: usize = 4;

/// Occupancy-derived state of an inline cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineCacheState {
    /// No receiver seen yet.
    Uninitialized,
    /// Exactly one receiver type.
    Monomorphic,
    /// More than one, fewer than the capacity.
    Polymorphic,
    /// Every slot taken; further types are dropped.
    Megamorphic,
}

/// Outcome of recording a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUpdate {
    /// The class was already cached.
    AlreadyPresent,
    /// The class was published into the slot at this index.
    Inserted(usize),
    /// All slots hold other classes; the observation was dropped.
    Megamorphic,
}

/// Receiver types observed at one call site.
#[derive(Debug)]
pub struct InlineCache {
    dex_pc: u32,
    classes: [WeakClassSlot; INDIVIDUAL_CACHE_SIZE],
}

impl InlineCache {
    /// Create an empty cache for the call site at `dex_pc`.
    pub fn new(dex_pc: u32) -> Self {
        Self {
            dex_pc,
            classes: std::array::from_fn(|_| WeakClassSlot::empty()),
        }
    }

    /// Bytecode offset of the call site.
    #[inline]
    pub fn dex_pc(&self) -> u32 {
        self.dex_pc
    }

    /// Raw slots, in scan order.
    #[inline]
    pub fn slots(&self) -> &[WeakClassSlot] {
        &self.classes
    }

    /// Record `class` as a receiver at this site.
    pub fn add_receiver(&self, class: ClassRef) -> CacheUpdate {
        let mut i = 0;
        while i < INDIVIDUAL_CACHE_SIZE {
            let slot = &self.classes[i];
            match slot.load() {
                Some(existing) if existing == class => return CacheUpdate::AlreadyPresent,
                Some(_) => i += 1,
                None => match slot.publish(class) {
                    Ok(()) => return CacheUpdate::Inserted(i),
                    // Lost the race; look at the same slot again.
                    Err(_) => continue,
                },
            }
        }
        CacheUpdate::Megamorphic
    }

    /// Snapshot of the cached classes, in slot order.
    pub fn classes(&self) -> SmallVec<[ClassRef; INDIVIDUAL_CACHE_SIZE]> {
        self.classes.iter().filter_map(WeakClassSlot::load).collect()
    }

    /// Whether `class` is currently cached.
    pub fn contains(&self, class: ClassRef) -> bool {
        self.classes.iter().any(|slot| slot.load() == Some(class))
    }

    /// Occupancy-derived state.
    pub fn state(&self) -> InlineCacheState {
        match self.classes.iter().filter(|slot| !slot.is_empty()).count() {
            0 => InlineCacheState::Uninitialized,
            1 => InlineCacheState::Monomorphic,
            INDIVIDUAL_CACHE_SIZE => InlineCacheState::Megamorphic,
            _ => InlineCacheState::Polymorphic,
        }
    }

    #[inline]
    pub fn is_megamorphic(&self) -> bool {
        self.state() == InlineCacheState::Megamorphic
    }

    #[inline]
    pub fn is_monomorphic(&self) -> bool {
        self.state() == InlineCacheState::Monomorphic
    }

    #[inline]
    pub fn is_uninitialized(&self) -> bool {
        self.state() == InlineCacheState::Uninitialized
    }

    /// Clear slots whose class is no longer live. Returns the number cleared.
    pub fn sweep(&self, is_live: impl Fn(ClassRef) -> bool) -> usize {
        self.classes
            .iter()
            .filter(|slot| slot.clear_if_dead(&is_live))
            .count()
    }
}

// =============================================================================
// Tests
// =============================================================================
