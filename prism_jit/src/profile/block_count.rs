//! Basic-block execution counters.

use std::sync::atomic::{AtomicU32, Ordering};

/// Saturating execution counter for the block starting at `dex_pc`.
///
/// Increments are a relaxed load followed by a relaxed store. Concurrent
/// increments may be lost, but the counter never decreases and never wraps.
#[derive(Debug)]
pub struct BlockCount {
    dex_pc: u32,
    count: AtomicU32,
}

impl BlockCount {
    pub fn new(dex_pc: u32) -> Self {
        Self {
            dex_pc,
            count: AtomicU32::new(0),
        }
    }

    /// Bytecode offset of the block start.
    #[inline]
    pub fn dex_pc(&self) -> u32 {
        self.dex_pc
    }

    /// Current count.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Add one unless the counter is saturated.
    #[inline]
    pub fn increment(&self) {
        let current = self.count.load(Ordering::Relaxed);
        if current != u32::MAX {
            self.count.store(current + 1, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub(crate) fn set(&self, value: u32) {
        self.count.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment() {
        let block = BlockCount::new(12);
        block.increment();
        block.increment();
        assert_eq!(block.count(), 2);
        assert_eq!(block.dex_pc(), 12);
    }

    #[test]
    fn test_saturates() {
        let block = BlockCount::new(0);
        block.set(u32::MAX - 1);
        block.increment();
        block.increment();
        block.increment();
        assert_eq!(block.count(), u32::MAX);
    }
}
