//! Per-method profiling record.
//!
//! A `MethodProfile` is created once, when a method becomes a JIT candidate,
//! from the offsets found by the [`BlockAnalyzer`]. Its arrays never change
//! shape afterwards; interpreter and compiler threads only update slot and
//! counter contents.

use super::analyzer::BlockAnalyzer;
use super::block_count::BlockCount;
use super::inline_cache::{CacheUpdate, InlineCache};
use super::ProfileError;
use crate::gc::WriteBarrier;
use crate::runtime::{ClassRef, ClassResolver, JitCodeCache, MethodId, MethodInfo};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Profiling data for one method.
#[derive(Debug)]
pub struct MethodProfile {
    method: MethodId,
    /// Class whose fields the collector rescans after a slot is published.
    holding_class: ClassRef,
    inline_caches: Box<[InlineCache]>,
    block_counts: Box<[BlockCount]>,
    is_method_being_compiled: AtomicBool,
    is_osr_method_being_compiled: AtomicBool,
    current_inline_uses: AtomicU32,
    /// Entry point saved while the method's code is being replaced; 0 = none.
    saved_entry_point: AtomicUsize,
}

impl MethodProfile {
    /// Build the record. Offsets must be unique; block starts ascending.
    pub(crate) fn new(
        method: MethodId,
        holding_class: ClassRef,
        call_sites: &[u32],
        block_starts: &[u32],
    ) -> Self {
        debug_assert!(
            block_starts.windows(2).all(|w| w[0] < w[1]),
            "block starts must be unique and ascending"
        );
        Self {
            method,
            holding_class,
            inline_caches: call_sites.iter().map(|&pc| InlineCache::new(pc)).collect(),
            block_counts: block_starts.iter().map(|&pc| BlockCount::new(pc)).collect(),
            is_method_being_compiled: AtomicBool::new(false),
            is_osr_method_being_compiled: AtomicBool::new(false),
            current_inline_uses: AtomicU32::new(0),
            saved_entry_point: AtomicUsize::new(0),
        }
    }

    /// Bytes of JIT data space taken by a record of this shape.
    pub fn allocation_size(call_sites: usize, block_starts: usize) -> usize {
        std::mem::size_of::<Self>()
            + call_sites * std::mem::size_of::<InlineCache>()
            + block_starts * std::mem::size_of::<BlockCount>()
    }

    /// Analyze `method` and allocate its profile in `cache`.
    ///
    /// Returns the existing profile if the method already has one.
    pub fn create<R: ClassResolver + ?Sized>(
        cache: &JitCodeCache,
        resolver: &R,
        method: &MethodInfo,
        retry_allocation: bool,
    ) -> Result<Arc<MethodProfile>, ProfileError> {
        let code = method.code().ok_or(ProfileError::NoBytecode(method.id()))?;
        let analysis = BlockAnalyzer::analyze(code)?;
        let holding_class = method
            .holding_class(resolver)
            .ok_or(ProfileError::UnresolvedHoldingClass(method.id()))?;

        Ok(cache.add_profiling_info(
            method.id(),
            holding_class,
            &analysis.call_sites,
            &analysis.block_starts,
            retry_allocation,
        )?)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    #[inline]
    pub fn holding_class(&self) -> ClassRef {
        self.holding_class
    }

    #[inline]
    pub fn inline_caches(&self) -> &[InlineCache] {
        &self.inline_caches
    }

    #[inline]
    pub fn block_counts(&self) -> &[BlockCount] {
        &self.block_counts
    }

    /// Cache for the call site at `dex_pc`, if one was registered.
    pub fn inline_cache(&self, dex_pc: u32) -> Option<&InlineCache> {
        self.inline_caches.iter().find(|cache| cache.dex_pc() == dex_pc)
    }

    /// Count for the block starting at `dex_pc`, if one was registered.
    pub fn block_count(&self, dex_pc: u32) -> Option<u32> {
        self.block_counts
            .iter()
            .find(|block| block.dex_pc() == dex_pc)
            .map(BlockCount::count)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Record `class` as a receiver at the call site `dex_pc`.
    ///
    /// On a successful publish, `barrier` is notified for the holding class
    /// exactly once before returning.
    ///
    /// # Panics
    ///
    /// Panics if no call site was registered at `dex_pc`.
    pub fn add_invoke_info<B: WriteBarrier + ?Sized>(
        &self,
        dex_pc: u32,
        class: ClassRef,
        barrier: &B,
    ) -> CacheUpdate {
        let Some(cache) = self.inline_cache(dex_pc) else {
            panic!("no inline cache at dex pc {dex_pc:#x} in {}", self.method);
        };
        let update = cache.add_receiver(class);
        if let CacheUpdate::Inserted(_) = update {
            barrier.write_barrier_every_field_of(self.holding_class);
        }
        update
    }

    /// Count one execution of the block starting at `dex_pc`.
    ///
    /// # Panics
    ///
    /// Panics if no block starts at `dex_pc`.
    pub fn increment_block_count(&self, dex_pc: u32) {
        match self.block_counts.iter().find(|block| block.dex_pc() == dex_pc) {
            Some(block) => block.increment(),
            None => panic!("no block counter at dex pc {dex_pc:#x} in {}", self.method),
        }
    }

    // =========================================================================
    // Compilation Bookkeeping
    // =========================================================================

    /// Mark the method as (not) being compiled, normally or for OSR.
    pub fn set_is_method_being_compiled(&self, value: bool, osr: bool) {
        let flag = if osr {
            &self.is_osr_method_being_compiled
        } else {
            &self.is_method_being_compiled
        };
        flag.store(value, Ordering::Release);
    }

    pub fn is_method_being_compiled(&self, osr: bool) -> bool {
        if osr {
            self.is_osr_method_being_compiled.load(Ordering::Acquire)
        } else {
            self.is_method_being_compiled.load(Ordering::Acquire)
        }
    }

    /// A compilation started inlining this method.
    pub fn increment_inline_use(&self) {
        let prev = self.current_inline_uses.fetch_add(1, Ordering::AcqRel);
        debug_assert_ne!(prev, u32::MAX, "inline use count overflow");
    }

    /// A compilation that inlined this method finished.
    pub fn decrement_inline_use(&self) {
        let result = self
            .current_inline_uses
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(result.is_ok(), "inline use count underflow in {}", self.method);
    }

    pub fn current_inline_uses(&self) -> u32 {
        self.current_inline_uses.load(Ordering::Acquire)
    }

    /// Whether any compilation currently depends on this profile.
    pub fn is_in_use_by_compiler(&self) -> bool {
        self.is_method_being_compiled(false)
            || self.is_method_being_compiled(true)
            || self.current_inline_uses() > 0
    }

    /// Entry point saved for later restoration.
    pub fn saved_entry_point(&self) -> Option<usize> {
        match self.saved_entry_point.load(Ordering::Acquire) {
            0 => None,
            addr => Some(addr),
        }
    }

    pub fn set_saved_entry_point(&self, entry_point: Option<usize>) {
        self.saved_entry_point
            .store(entry_point.unwrap_or(0), Ordering::Release);
    }

    // =========================================================================
    // Collector Support
    // =========================================================================

    /// Clear cached receivers whose class died. Returns the number cleared.
    pub fn sweep_weak_classes(&self, is_live: impl Fn(ClassRef) -> bool) -> usize {
        self.inline_caches
            .iter()
            .map(|cache| cache.sweep(&is_live))
            .sum()
    }

    /// Report every cached receiver class.
    pub fn visit_classes(&self, mut visitor: impl FnMut(ClassRef)) {
        for cache in self.inline_caches.iter() {
            for class in cache.classes() {
                visitor(class);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::ClassCardTable;
    use crate::profile::InlineCacheState;

    fn class(raw: u32) -> ClassRef {
        ClassRef::new(raw).unwrap()
    }

    fn profile() -> MethodProfile {
        MethodProfile::new(MethodId(1), class(50), &[3, 9], &[0, 5, 12])
    }

    #[test]
    fn test_shape_follows_offsets() {
        let p = profile();
        assert_eq!(p.inline_caches().len(), 2);
        assert_eq!(p.block_counts().len(), 3);
        assert!(p.inline_cache(3).is_some());
        assert!(p.inline_cache(4).is_none());
        assert_eq!(p.block_count(12), Some(0));
        assert_eq!(p.block_count(13), None);
    }

    #[test]
    fn test_barrier_marks_holding_class_on_insert_only() {
        let p = profile();
        let cards = ClassCardTable::new(64);

        assert_eq!(p.add_invoke_info(3, class(7), &cards), CacheUpdate::Inserted(0));
        assert!(cards.is_dirty(class(50)));
        assert!(!cards.is_dirty(class(7)));

        cards.clear_all();
        assert_eq!(p.add_invoke_info(3, class(7), &cards), CacheUpdate::AlreadyPresent);
        assert_eq!(cards.dirty_count(), 0);
    }

    #[test]
    #[should_panic(expected = "no inline cache")]
    fn test_unknown_call_site_panics() {
        let cards = ClassCardTable::new(4);
        profile().add_invoke_info(4, class(1), &cards);
    }

    #[test]
    #[should_panic(expected = "no block counter")]
    fn test_unknown_block_panics() {
        profile().increment_block_count(1);
    }

    #[test]
    fn test_increment_block_count() {
        let p = profile();
        p.increment_block_count(5);
        p.increment_block_count(5);
        assert_eq!(p.block_count(5), Some(2));
        assert_eq!(p.block_count(0), Some(0));
    }

    #[test]
    fn test_in_use_by_compiler() {
        let p = profile();
        assert!(!p.is_in_use_by_compiler());

        p.set_is_method_being_compiled(true, true);
        assert!(p.is_in_use_by_compiler());
        assert!(!p.is_method_being_compiled(false));
        p.set_is_method_being_compiled(false, true);

        p.increment_inline_use();
        assert!(p.is_in_use_by_compiler());
        p.decrement_inline_use();
        assert!(!p.is_in_use_by_compiler());
    }

    #[test]
    fn test_saved_entry_point() {
        let p = profile();
        assert_eq!(p.saved_entry_point(), None);
        p.set_saved_entry_point(Some(0x4000));
        assert_eq!(p.saved_entry_point(), Some(0x4000));
        p.set_saved_entry_point(None);
        assert_eq!(p.saved_entry_point(), None);
    }

    #[test]
    fn test_sweep_and_visit() {
        let p = profile();
        let cards = ClassCardTable::new(64);
        p.add_invoke_info(3, class(7), &cards);
        p.add_invoke_info(3, class(8), &cards);
        p.add_invoke_info(9, class(7), &cards);

        let mut seen = Vec::new();
        p.visit_classes(|c| seen.push(c.raw()));
        assert_eq!(seen, vec![7, 8, 7]);

        assert_eq!(p.sweep_weak_classes(|c| c != class(7)), 2);
        assert_eq!(p.inline_cache(9).unwrap().state(), InlineCacheState::Uninitialized);
        assert!(p.inline_cache(3).unwrap().is_monomorphic());
    }
}
