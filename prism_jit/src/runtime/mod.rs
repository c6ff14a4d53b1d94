//! Runtime services used by the JIT.
//!
//! - **Method handles** (`method.rs`): classes, methods and class resolution
//! - **Code cache** (`code_cache.rs`): the data region profiles live in

pub mod code_cache;
pub mod method;

pub use code_cache::{
    CodeCacheConfig, CodeCacheError, CodeCacheStats, JitCodeCache, DATA_CAPACITY_ENV,
};
pub use method::{ClassRef, ClassResolver, CopiedMethodTable, MethodFlags, MethodId, MethodInfo};
