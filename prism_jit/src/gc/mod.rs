//! Collector integration for profiling data.
//!
//! - **Weak class slots**: receiver types recorded by inline caches, cleared
//!   by the collector when the class dies
//! - **Write barriers**: dirty the holding class after a slot is published

pub mod weak_slot;
pub mod write_barrier;

pub use weak_slot::WeakClassSlot;
pub use write_barrier::{ClassCardTable, NoopWriteBarrier, WriteBarrier, CARD_CLEAN, CARD_DIRTY};
