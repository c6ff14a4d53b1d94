//! Instruction-graph cloning.
//!
//! # Components
//!
//! - **Policy** (`policy.rs`): which node kinds may be duplicated
//! - **Clone map** (`clone_map.rs`): original-to-clone mapping
//! - **Cloner** (`cloner.rs`): node, environment and region cloning

pub mod clone_map;
pub mod cloner;
pub mod policy;

pub use clone_map::CloneMap;
pub use cloner::{CloneFailure, CloneStats, ClonerConfig, GraphCloner};
pub use policy::{clone_support, CloneSupport, UnsupportedReason};
