//! Instruction nodes.
//!
//! Each node has:
//! - **Operator**: what the node computes
//! - **Inputs**: the nodes whose values it consumes, in operand order
//! - **Type**: the primitive type of its result
//! - **Dex pc**: the bytecode offset it was built from
//! - **Environment**: the deoptimization state, for nodes that need one

use super::arena::Id;
use super::environment::EnvId;
use super::operators::Operator;
use super::types::DataType;
use smallvec::SmallVec;

// =============================================================================
// Node ID Type Alias
// =============================================================================

/// Unique identifier for a node in the graph.
pub type NodeId = Id<Node>;

// =============================================================================
// Input List
// =============================================================================

/// Inputs stored inline before spilling to the heap.
const INLINE_INPUTS: usize = 4;

/// Operand list. Most nodes have at most four inputs; phis and invokes with
/// many arguments spill.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InputList(SmallVec<[NodeId; INLINE_INPUTS]>);

impl InputList {
    #[inline]
    pub fn new() -> Self {
        InputList(SmallVec::new())
    }

    #[inline]
    pub fn from_slice(inputs: &[NodeId]) -> Self {
        InputList(SmallVec::from_slice(inputs))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied()
    }

    /// Replace the input at `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: NodeId) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = value;
        }
    }

    #[inline]
    pub fn push(&mut self, value: NodeId) {
        self.0.push(value);
    }

    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    #[inline]
    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }

    /// Whether the list spilled to the heap.
    #[inline]
    pub fn spilled(&self) -> bool {
        self.0.spilled()
    }
}

impl FromIterator<NodeId> for InputList {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        InputList(iter.into_iter().collect())
    }
}

impl std::fmt::Debug for InputList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

// =============================================================================
// Node
// =============================================================================

/// A node in the instruction graph.
#[derive(Clone)]
pub struct Node {
    /// The operation this node performs.
    pub op: Operator,

    /// Input nodes, in operand order.
    pub inputs: InputList,

    /// Result type.
    pub ty: DataType,

    /// Bytecode offset (for deoptimization and debugging).
    pub dex_pc: u32,

    /// Flags for various node properties.
    pub flags: NodeFlags,

    /// Innermost link of the node's environment chain.
    pub env: Option<EnvId>,
}

impl Node {
    pub fn new(op: Operator, inputs: InputList, ty: DataType) -> Self {
        let flags = if op.can_throw() {
            NodeFlags::CAN_THROW
        } else {
            NodeFlags::empty()
        };
        Node {
            op,
            inputs,
            ty,
            dex_pc: 0,
            flags,
            env: None,
        }
    }

    #[inline]
    pub fn with_dex_pc(mut self, dex_pc: u32) -> Self {
        self.dex_pc = dex_pc;
        self
    }

    #[inline]
    pub fn input(&self, index: usize) -> Option<NodeId> {
        self.inputs.get(index)
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.op.is_constant()
    }

    #[inline]
    pub fn is_control(&self) -> bool {
        self.op.is_control()
    }

    #[inline]
    pub fn is_phi(&self) -> bool {
        self.op.is_phi()
    }

    #[inline]
    pub fn has_environment(&self) -> bool {
        self.env.is_some()
    }

    #[inline]
    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    #[inline]
    pub fn mark_dead(&mut self) {
        self.flags.insert(NodeFlags::DEAD);
    }

    /// Integer value if this is an int or long constant.
    pub fn as_long(&self) -> Option<i64> {
        match self.op {
            Operator::IntConstant(v) => Some(v as i64),
            Operator::LongConstant(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.op)?;
        if !self.inputs.is_empty() {
            write!(f, " {:?}", self.inputs)?;
        }
        write!(f, " : {:?} @{}", self.ty, self.dex_pc)?;
        if let Some(env) = self.env {
            write!(f, " env={:?}", env)?;
        }
        Ok(())
    }
}

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags for node properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// Removed from the graph; slot kept for id stability.
        const DEAD = 0b0000_0001;
        /// Must not be moved by scheduling.
        const PINNED = 0b0000_0010;
        /// Node is in a loop body.
        const IN_LOOP = 0b0000_0100;
        /// Traversal mark; never carried over to clones.
        const VISITED = 0b0000_1000;
        /// Operation can raise an exception.
        const CAN_THROW = 0b0001_0000;
        /// Node is loop-invariant.
        const LOOP_INVARIANT = 0b0010_0000;
    }
}

// =============================================================================
// Tests
// =============================================================================
