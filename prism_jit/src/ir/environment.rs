//! Deoptimization environments.
//!
//! An environment records, for one frame, which node holds each virtual
//! register at a given dex pc. Inlined frames chain to the environment of
//! their caller through `parent`, so a node inside an inlined callee carries
//! a chain from the innermost frame outwards.

use super::arena::Id;
use super::node::NodeId;
use crate::runtime::MethodId;
use smallvec::SmallVec;

/// Identifier of an environment in its graph.
pub type EnvId = Id<Environment>;

/// Virtual registers stored inline.
const INLINE_VREGS: usize = 8;

/// One frame of deoptimization state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Value per vreg; `None` for dead or uninitialized registers.
    pub values: SmallVec<[Option<NodeId>; INLINE_VREGS]>,
    pub method: MethodId,
    pub dex_pc: u32,
    /// Caller frame for inlined code.
    pub parent: Option<EnvId>,
}

impl Environment {
    /// Environment with `vregs` empty registers.
    pub fn new(method: MethodId, dex_pc: u32, vregs: usize) -> Self {
        Environment {
            values: SmallVec::from_elem(None, vregs),
            method,
            dex_pc,
            parent: None,
        }
    }

    pub fn with_values(method: MethodId, dex_pc: u32, values: &[Option<NodeId>]) -> Self {
        Environment {
            values: SmallVec::from_slice(values),
            method,
            dex_pc,
            parent: None,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn get(&self, vreg: usize) -> Option<NodeId> {
        self.values.get(vreg).copied().flatten()
    }

    /// Store `value` in `vreg`. Out-of-range registers are ignored.
    pub fn set(&mut self, vreg: usize, value: Option<NodeId>) {
        if let Some(slot) = self.values.get_mut(vreg) {
            *slot = value;
        }
    }

    /// Nodes referenced by this frame.
    pub fn live_values(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.values.iter().flatten().copied()
    }
}
