//! Typed instruction graph.
//!
//! # Core Components
//!
//! - **Types** (`types.rs`): primitive result types
//! - **Operators** (`operators.rs`): the closed set of node kinds
//! - **Arena** (`arena.rs`): typed ids and append-only storage
//! - **Node** (`node.rs`): instruction nodes and their flags
//! - **Environment** (`environment.rs`): deoptimization state chains
//! - **Graph** (`graph.rs`): nodes, use chains, shared nodes, environments

pub mod arena;
pub mod environment;
pub mod graph;
pub mod node;
pub mod operators;
pub mod types;

pub use arena::{Arena, Id, SecondaryMap};
pub use environment::{EnvId, Environment};
pub use graph::Graph;
pub use node::{InputList, Node, NodeFlags, NodeId};
pub use operators::{
    ArithOp, ArrayOp, BitwiseOp, CheckKind, CmpOp, ControlOp, FieldOp, FusedMemoryOp, InvokeKind,
    Operator, X86Op,
};
pub use types::DataType;
