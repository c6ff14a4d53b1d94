//! JIT code cache data region.
//!
//! The code cache owns the memory that profiling records live in. It provides:
//! - At most one profile per method, created under the cache's write lock
//! - A bounded data region with explicit exhaustion errors
//! - Reclamation of profiles no compilation or caller still holds
//! - Statistics and collector sweeping across all profiles

use super::method::{ClassRef, MethodId};
use crate::profile::MethodProfile;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable overriding [`CodeCacheConfig::data_capacity`].
pub const DATA_CAPACITY_ENV: &str = "PRISM_JIT_DATA_CAPACITY";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the code cache data region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeCacheConfig {
    /// Bytes available for profiling records.
    pub data_capacity: usize,
    /// Reclaim unused profiles and retry once when a caller allows it.
    pub reclaim_on_retry: bool,
}

impl Default for CodeCacheConfig {
    fn default() -> Self {
        Self {
            data_capacity: 2 * 1024 * 1024,
            reclaim_on_retry: true,
        }
    }
}

impl CodeCacheConfig {
    /// Large data region for long-running processes.
    pub fn production() -> Self {
        Self {
            data_capacity: 64 * 1024 * 1024,
            reclaim_on_retry: true,
        }
    }

    /// Small data region that fills up quickly in tests.
    pub fn for_testing() -> Self {
        Self {
            data_capacity: 4 * 1024,
            reclaim_on_retry: true,
        }
    }

    /// Defaults, with [`DATA_CAPACITY_ENV`] applied if set.
    pub fn from_env() -> Self {
        let value = std::env::var(DATA_CAPACITY_ENV).ok();
        Self::default().with_data_capacity_override(value.as_deref())
    }

    fn with_data_capacity_override(mut self, value: Option<&str>) -> Self {
        match value.map(|v| v.trim().parse::<usize>()) {
            Some(Ok(bytes)) => self.data_capacity = bytes,
            Some(Err(err)) => {
                warn!(var = DATA_CAPACITY_ENV, %err, "ignoring invalid data capacity");
            }
            None => {}
        }
        self
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error allocating from the code cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeCacheError {
    /// The data region cannot fit the requested record.
    #[error("JIT data space exhausted: requested {requested} bytes, {available} available")]
    OutOfDataSpace { requested: usize, available: usize },
}

// =============================================================================
// Code Cache
// =============================================================================

#[derive(Debug, Default)]
struct DataRegion {
    profiles: FxHashMap<MethodId, Arc<MethodProfile>>,
    used: usize,
}

impl DataRegion {
    /// Drop profiles nobody else references. Returns (count, bytes) freed.
    fn reclaim(&mut self) -> (usize, usize) {
        let mut freed = 0;
        let before = self.profiles.len();
        self.profiles.retain(|_, profile| {
            let keep = profile.is_in_use_by_compiler() || Arc::strong_count(profile) > 1;
            if !keep {
                freed += MethodProfile::allocation_size(
                    profile.inline_caches().len(),
                    profile.block_counts().len(),
                );
            }
            keep
        });
        self.used -= freed;
        (before - self.profiles.len(), freed)
    }
}

/// Code cache holding per-method profiling data.
///
/// Thread-safe via an internal `RwLock`; profile creation is serialized by
/// the write lock.
#[derive(Debug)]
pub struct JitCodeCache {
    config: CodeCacheConfig,
    data: RwLock<DataRegion>,
    allocations: AtomicU64,
    reuses: AtomicU64,
    failures: AtomicU64,
    reclaimed: AtomicU64,
}

impl JitCodeCache {
    pub fn new(config: CodeCacheConfig) -> Self {
        Self {
            config,
            data: RwLock::new(DataRegion::default()),
            allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn config(&self) -> &CodeCacheConfig {
        &self.config
    }

    /// Allocate the profile for `method` with one inline cache per entry of
    /// `entries` and one block counter per entry of `dex_pcs`.
    ///
    /// If the method already has a profile, that profile is returned. When
    /// the region is full and `retry_allocation` is set, unused profiles are
    /// reclaimed and the allocation is tried once more.
    pub fn add_profiling_info(
        &self,
        method: MethodId,
        holding_class: ClassRef,
        entries: &[u32],
        dex_pcs: &[u32],
        retry_allocation: bool,
    ) -> Result<Arc<MethodProfile>, CodeCacheError> {
        let mut data = self.data.write();

        if let Some(existing) = data.profiles.get(&method) {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(existing));
        }

        let requested = MethodProfile::allocation_size(entries.len(), dex_pcs.len());
        if data.used + requested > self.config.data_capacity
            && retry_allocation
            && self.config.reclaim_on_retry
        {
            let (count, bytes) = data.reclaim();
            self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
            debug!(count, bytes, "reclaimed profiles to retry allocation");
        }

        let available = self.config.data_capacity - data.used;
        if requested > available {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(%method, requested, available, "JIT data space exhausted");
            return Err(CodeCacheError::OutOfDataSpace {
                requested,
                available,
            });
        }

        let profile = Arc::new(MethodProfile::new(method, holding_class, entries, dex_pcs));
        data.used += requested;
        data.profiles.insert(method, Arc::clone(&profile));
        self.allocations.fetch_add(1, Ordering::Relaxed);
        debug!(
            %method,
            call_sites = entries.len(),
            blocks = dex_pcs.len(),
            bytes = requested,
            "allocated method profile"
        );

        Ok(profile)
    }

    /// Profile of `method`, if one exists.
    pub fn profiling_info(&self, method: MethodId) -> Option<Arc<MethodProfile>> {
        self.data.read().profiles.get(&method).cloned()
    }

    /// Free profiles that no compilation uses and no caller holds.
    ///
    /// Returns the number of profiles freed.
    pub fn reclaim_unused(&self) -> usize {
        let (count, bytes) = self.data.write().reclaim();
        self.reclaimed.fetch_add(count as u64, Ordering::Relaxed);
        debug!(count, bytes, "reclaimed unused profiles");
        count
    }

    /// Clear dead receiver classes from every profile.
    pub fn sweep_weak_classes(&self, is_live: impl Fn(ClassRef) -> bool) -> usize {
        self.data
            .read()
            .profiles
            .values()
            .map(|profile| profile.sweep_weak_classes(&is_live))
            .sum()
    }

    /// Bytes of the data region in use.
    #[inline]
    pub fn used_data(&self) -> usize {
        self.data.read().used
    }

    /// Number of live profiles.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.read().profiles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CodeCacheStats {
        CodeCacheStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
        }
    }
}

impl Default for JitCodeCache {
    fn default() -> Self {
        Self::new(CodeCacheConfig::default())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for the code cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CodeCacheStats {
    /// Profiles allocated.
    pub allocations: u64,
    /// Requests answered with an existing profile.
    pub reuses: u64,
    /// Allocations rejected for lack of space.
    pub failures: u64,
    /// Profiles freed by reclamation.
    pub reclaimed: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn class(raw: u32) -> ClassRef {
        ClassRef::new(raw).unwrap()
    }

    fn small_cache(profiles: usize) -> JitCodeCache {
        JitCodeCache::new(CodeCacheConfig {
            data_capacity: profiles * MethodProfile::allocation_size(1, 1),
            reclaim_on_retry: true,
        })
    }

    #[test]
    fn test_allocate_and_lookup() {
        let cache = JitCodeCache::default();
        let p = cache
            .add_profiling_info(MethodId(1), class(2), &[4], &[0, 6], false)
            .unwrap();
        assert_eq!(p.inline_caches().len(), 1);
        assert_eq!(p.block_counts().len(), 2);
        assert_eq!(cache.used_data(), MethodProfile::allocation_size(1, 2));
        assert!(Arc::ptr_eq(&cache.profiling_info(MethodId(1)).unwrap(), &p));
        assert!(cache.profiling_info(MethodId(2)).is_none());
    }

    #[test]
    fn test_existing_profile_returned() {
        let cache = JitCodeCache::default();
        let a = cache
            .add_profiling_info(MethodId(1), class(2), &[4], &[0], false)
            .unwrap();
        let b = cache
            .add_profiling_info(MethodId(1), class(2), &[], &[0], false)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().reuses, 1);
        assert_eq!(cache.stats().allocations, 1);
    }

    #[test]
    fn test_out_of_space_without_retry() {
        let cache = small_cache(1);
        cache
            .add_profiling_info(MethodId(1), class(2), &[0], &[0], false)
            .unwrap();
        let err = cache
            .add_profiling_info(MethodId(2), class(2), &[0], &[0], false)
            .unwrap_err();
        assert!(matches!(err, CodeCacheError::OutOfDataSpace { available: 0, .. }));
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn test_retry_reclaims_unreferenced_profiles() {
        let cache = small_cache(1);
        drop(
            cache
                .add_profiling_info(MethodId(1), class(2), &[0], &[0], false)
                .unwrap(),
        );
        let p = cache
            .add_profiling_info(MethodId(2), class(2), &[0], &[0], true)
            .unwrap();
        assert_eq!(p.method(), MethodId(2));
        assert!(cache.profiling_info(MethodId(1)).is_none());
        assert_eq!(cache.stats().reclaimed, 1);
    }

    #[test]
    fn test_reclaim_skips_profiles_in_use() {
        let cache = JitCodeCache::default();
        let held = cache
            .add_profiling_info(MethodId(1), class(2), &[], &[0], false)
            .unwrap();
        let compiling = cache
            .add_profiling_info(MethodId(2), class(2), &[], &[0], false)
            .unwrap();
        compiling.set_is_method_being_compiled(true, false);
        drop(compiling);
        drop(
            cache
                .add_profiling_info(MethodId(3), class(2), &[], &[0], false)
                .unwrap(),
        );

        assert_eq!(cache.reclaim_unused(), 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.profiling_info(MethodId(3)).is_none());
        drop(held);
    }

    #[test]
    fn test_capacity_override() {
        let config = CodeCacheConfig::default().with_data_capacity_override(Some("8192"));
        assert_eq!(config.data_capacity, 8192);

        let config = CodeCacheConfig::default().with_data_capacity_override(Some("lots"));
        assert_eq!(config, CodeCacheConfig::default());

        let config = CodeCacheConfig::for_testing().with_data_capacity_override(None);
        assert_eq!(config, CodeCacheConfig::for_testing());
    }
}
