//! Profiling and graph-cloning core of the Prism JIT.
//!
//! - Per-method profiling records: call-site and block discovery from
//!   bytecode, lock-free receiver inline caches, saturating block counters
//! - The code-cache data region those records are allocated from
//! - Collector hooks for weakly held receiver classes
//! - A typed instruction graph with deoptimization environments
//! - A node cloner for loop unrolling and guarded specialization
#![deny(unsafe_code)]

pub mod gc;
pub mod ir;
pub mod opt;
pub mod profile;
pub mod runtime;

pub use gc::{ClassCardTable, NoopWriteBarrier, WeakClassSlot, WriteBarrier};
pub use ir::{Environment, Graph, Node, NodeId, Operator};
pub use opt::clone::{CloneMap, ClonerConfig, GraphCloner};
pub use profile::{
    BlockAnalysis, BlockAnalyzer, CacheUpdate, InlineCache, InlineCacheState, MethodProfile,
    ProfileError,
};
pub use runtime::{
    ClassRef, ClassResolver, CodeCacheConfig, CodeCacheError, JitCodeCache, MethodId, MethodInfo,
};
