//! Method profiling for recompilation decisions.
//!
//! # Components
//!
//! - **Analyzer** (`analyzer.rs`): one-pass call-site and block discovery
//! - **Inline caches** (`inline_cache.rs`): lock-free receiver type tracking
//! - **Block counts** (`block_count.rs`): best-effort execution counters
//! - **Method profile** (`method_profile.rs`): the fixed-shape record tying
//!   them together

pub mod analyzer;
pub mod block_count;
pub mod inline_cache;
pub mod method_profile;

pub use analyzer::{BlockAnalysis, BlockAnalyzer};
pub use block_count::BlockCount;
pub use inline_cache::{CacheUpdate, InlineCache, InlineCacheState, INDIVIDUAL_CACHE_SIZE};
pub use method_profile::MethodProfile;

use crate::runtime::{CodeCacheError, MethodId};
use prism_bytecode::DecodeError;
use thiserror::Error;

/// Error creating a method profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    /// Native and abstract methods have nothing to profile.
    #[error("{0} has no bytecode to profile")]
    NoBytecode(MethodId),

    /// A copied method whose holder the runtime could not name.
    #[error("no holding class known for copied {0}")]
    UnresolvedHoldingClass(MethodId),

    #[error("malformed bytecode: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Allocation(#[from] CodeCacheError),
}
