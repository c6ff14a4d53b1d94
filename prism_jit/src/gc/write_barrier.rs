//! Write barrier hooks for profiling data.
//!
//! Profiling records hold weak references to classes in memory the collector
//! does not scan by default. After a mutator publishes a new reference, it
//! dirties the card of the class that holds the record so the next
//! collection revisits every field of that class, and through it the record.
//!
//! # Class Card Table
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┬─────────┬──────────┐
//! │ class 0 │ class 1 │ class 2 │ class 3 │ class 4 │   ...    │
//! └────┬────┴────┬────┴────┬────┴────┬────┴────┬────┴──────────┘
//!      ▼         ▼         ▼         ▼         ▼
//!   [Clean]   [Dirty]   [Clean]   [Dirty]   [Clean]  ...
//!    0x00      0x01      0x00      0x01      0x00
//! ```

use crate::runtime::ClassRef;
use std::sync::atomic::{AtomicU8, Ordering};

// =============================================================================
// Constants
// =============================================================================

/// Card state: clean (no new references since the last scan).
pub const CARD_CLEAN: u8 = 0x00;

/// Card state: dirty (rescan every field of the class).
pub const CARD_DIRTY: u8 = 0x01;

// =============================================================================
// WriteBarrier
// =============================================================================

/// Collector notification issued after a reference is published.
pub trait WriteBarrier: Send + Sync {
    /// Ask the collector to rescan every reference field of `class`.
    fn write_barrier_every_field_of(&self, class: ClassRef);
}

/// Barrier for configurations without a concurrent collector.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWriteBarrier;

impl WriteBarrier for NoopWriteBarrier {
    #[inline]
    fn write_barrier_every_field_of(&self, _class: ClassRef) {}
}

// =============================================================================
// ClassCardTable
// =============================================================================

/// One card per class handle.
///
/// Marking is a relaxed byte store, so the barrier is safe to call from any
/// mutator thread without synchronization. Handles beyond the table's
/// capacity are not tracked.
#[derive(Debug)]
pub struct ClassCardTable {
    cards: Box<[AtomicU8]>,
}

impl ClassCardTable {
    /// Create a table covering class handles `1..class_capacity`.
    pub fn new(class_capacity: usize) -> Self {
        let cards: Vec<AtomicU8> = (0..class_capacity)
            .map(|_| AtomicU8::new(CARD_CLEAN))
            .collect();
        Self {
            cards: cards.into_boxed_slice(),
        }
    }

    /// Number of cards.
    #[inline]
    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    #[inline]
    fn card(&self, class: ClassRef) -> Option<&AtomicU8> {
        self.cards.get(class.raw() as usize)
    }

    /// Mark the card of `class` dirty.
    #[inline]
    pub fn mark_dirty(&self, class: ClassRef) {
        if let Some(card) = self.card(class) {
            card.store(CARD_DIRTY, Ordering::Relaxed);
        }
    }

    /// Check if the card of `class` is dirty.
    #[inline]
    pub fn is_dirty(&self, class: ClassRef) -> bool {
        self.card(class)
            .is_some_and(|card| card.load(Ordering::Relaxed) == CARD_DIRTY)
    }

    /// Clear the card of `class`.
    #[inline]
    pub fn clear(&self, class: ClassRef) {
        if let Some(card) = self.card(class) {
            card.store(CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Clear all cards.
    pub fn clear_all(&self) {
        for card in self.cards.iter() {
            card.store(CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Iterate over classes with dirty cards.
    pub fn dirty_classes(&self) -> impl Iterator<Item = ClassRef> + '_ {
        self.cards.iter().enumerate().filter_map(|(index, card)| {
            if card.load(Ordering::Relaxed) == CARD_DIRTY {
                ClassRef::new(index as u32)
            } else {
                None
            }
        })
    }

    /// Count dirty cards.
    pub fn dirty_count(&self) -> usize {
        self.dirty_classes().count()
    }
}

impl WriteBarrier for ClassCardTable {
    #[inline]
    fn write_barrier_every_field_of(&self, class: ClassRef) {
        self.mark_dirty(class);
    }
}

// =============================================================================
// Tests
// =============================================================================
