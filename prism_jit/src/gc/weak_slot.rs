//! Weakly traced class slots.
//!
//! A slot holds at most one [`ClassRef`] in a single atomic word (0 = empty).
//! Mutators publish into empty slots with a compare-and-swap; the collector
//! clears slots whose class died, also with a compare-and-swap, so a value
//! published concurrently with a sweep is never lost to a blind store.

use crate::runtime::ClassRef;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Raw encoding of an empty slot.
const EMPTY: u32 = 0;

/// Atomic, collector-clearable reference to a class.
pub struct WeakClassSlot(AtomicU32);

impl WeakClassSlot {
    /// An empty slot.
    #[inline]
    pub const fn empty() -> Self {
        WeakClassSlot(AtomicU32::new(EMPTY))
    }

    /// Current occupant.
    #[inline]
    pub fn load(&self) -> Option<ClassRef> {
        ClassRef::new(self.0.load(Ordering::Acquire))
    }

    /// Whether the slot is currently empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.load(Ordering::Acquire) == EMPTY
    }

    /// Publish `class` if the slot is empty.
    ///
    /// On failure returns the occupant that won, which may already have been
    /// cleared again by the time the caller looks.
    #[inline]
    pub fn publish(&self, class: ClassRef) -> Result<(), Option<ClassRef>> {
        self.0
            .compare_exchange(EMPTY, class.raw(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(ClassRef::new)
    }

    /// Clear the slot if it still holds `expected`.
    #[inline]
    pub fn clear_if(&self, expected: ClassRef) -> bool {
        self.0
            .compare_exchange(expected.raw(), EMPTY, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Clear the slot if its occupant is no longer live.
    ///
    /// Returns `true` if a dead class was removed.
    pub fn clear_if_dead(&self, is_live: impl Fn(ClassRef) -> bool) -> bool {
        match self.load() {
            Some(class) if !is_live(class) => self.clear_if(class),
            _ => false,
        }
    }
}

impl Default for WeakClassSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for WeakClassSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.load() {
            Some(class) => write!(f, "{:?}", class),
            None => write!(f, "<empty>"),
        }
    }
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

    #[test]
    fn test_publish_into_empty() {
        let slot = WeakClassSlot::empty();
        assert!(slot.is_empty());
        assert_eq!(slot.publish(class(3)), Ok(()));
        assert_eq!(slot.load(), Some(class(3)));
    }

    #[test]
    fn test_publish_into_occupied_reports_winner() {
        let slot = WeakClassSlot::empty();
        slot.publish(class(3)).unwrap();
        assert_eq!(slot.publish(class(4)), Err(Some(class(3))));
        assert_eq!(slot.load(), Some(class(3)));
    }

    #[test]
    fn test_clear_if_dead() {
        let slot = WeakClassSlot::empty();
        slot.publish(class(5)).unwrap();

        assert!(!slot.clear_if_dead(|_| true));
        assert_eq!(slot.load(), Some(class(5)));

        assert!(slot.clear_if_dead(|c| c != class(5)));
        assert!(slot.is_empty());
    }

    #[test]
    fn test_clear_if_keeps_replacement() {
        let slot = WeakClassSlot::empty();
        slot.publish(class(5)).unwrap();
        assert!(slot.clear_if(class(5)));
        slot.publish(class(6)).unwrap();

        // A stale sweep for the old occupant must not clobber the new one.
        assert!(!slot.clear_if(class(5)));
        assert_eq!(slot.load(), Some(class(6)));
    }
}
