//! Graph transformations.
//!
//! - **Clone** (`clone/`): node duplication for unrolling and specialization

pub mod clone;

pub use clone::{CloneMap, ClonerConfig, GraphCloner};
