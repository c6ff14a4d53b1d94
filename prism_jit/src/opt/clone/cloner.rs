//! Node-by-node graph cloner.
//!
//! Passes such as loop unrolling and guarded specialization duplicate a set
//! of nodes inside the same graph. The cloner visits nodes in the caller's
//! order and, for each cloneable one, creates a node with the same operator,
//! type, dex pc and flags, rewires its inputs to earlier clones, and copies
//! its environment chain. Unsupported kinds are recorded rather than
//! aborting, so a caller can clone a whole region and then ask whether it
//! all worked.
//!
//! With `enabled` off the cloner only classifies: no node, mapping or
//! environment is created, which lets a pass check feasibility first.

use super::clone_map::CloneMap;
use super::policy::{clone_support, CloneSupport, UnsupportedReason};
use crate::ir::{EnvId, Environment, Graph, InputList, Node, NodeFlags, NodeId, Operator};
#[cfg(debug_assertions)]
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::{debug, trace};

// =============================================================================
// Configuration
// =============================================================================

/// Cloner behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClonerConfig {
    /// Create clones. When off, only classify.
    pub enabled: bool,
    /// Rewire inputs to clones of earlier visited nodes.
    pub use_cloned_inputs: bool,
    /// Let a second clone of the same node replace the first mapping.
    pub allow_overwrite: bool,
}

impl Default for ClonerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            use_cloned_inputs: true,
            allow_overwrite: false,
        }
    }
}

impl ClonerConfig {
    /// Classification only.
    pub fn probe() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Repeated cloning of one body, each copy replacing the last.
    pub fn unrolling() -> Self {
        Self {
            allow_overwrite: true,
            ..Self::default()
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Counters for one cloner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneStats {
    /// Nodes passed to `clone_node`.
    pub visited: usize,
    /// Nodes created.
    pub cloned: usize,
    /// Visits that hit an unsupported kind.
    pub unsupported: usize,
    /// Environment links created.
    pub environments_cloned: usize,
}

/// First node the cloner could not duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneFailure {
    pub node: NodeId,
    pub kind: &'static str,
    pub reason: UnsupportedReason,
}

// =============================================================================
// Graph Cloner
// =============================================================================

/// Clones nodes of a graph into the same graph.
#[derive(Debug)]
pub struct GraphCloner {
    config: ClonerConfig,
    clone_map: CloneMap,
    first_failure: Option<CloneFailure>,
    stats: CloneStats,
    /// Originals seeded through `add_clone_manually`.
    #[cfg(debug_assertions)]
    manual_clones: FxHashSet<NodeId>,
}

impl GraphCloner {
    pub fn new(config: ClonerConfig) -> Self {
        Self {
            config,
            clone_map: CloneMap::new(),
            first_failure: None,
            stats: CloneStats::default(),
            #[cfg(debug_assertions)]
            manual_clones: FxHashSet::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> ClonerConfig {
        self.config
    }

    /// Clone `original`.
    ///
    /// Returns `None` for unsupported kinds (recording the failure) and in
    /// probe mode. Without `allow_overwrite`, cloning the same node twice is
    /// a bug: debug builds assert, release builds return the first clone.
    pub fn clone_node(&mut self, graph: &mut Graph, original: NodeId) -> Option<NodeId> {
        self.stats.visited += 1;
        let source = graph.node(original).clone();

        if let CloneSupport::Unsupported(reason) = clone_support(&source.op) {
            self.record_failure(original, &source.op, reason);
            return None;
        }
        if !self.config.enabled {
            return None;
        }

        if !self.config.allow_overwrite {
            debug_assert!(
                !self.clone_map.contains(original),
                "{original:?} ({}) cloned twice",
                source.op.debug_name()
            );
            if let Some(existing) = self.clone_map.get(original) {
                return Some(existing);
            }
        }

        let inputs: InputList = if self.config.use_cloned_inputs {
            source.inputs.iter().map(|id| self.clone_map.remap(id)).collect()
        } else {
            source.inputs.clone()
        };

        let mut node = Node::new(source.op, inputs, source.ty).with_dex_pc(source.dex_pc);
        node.flags = source.flags & !NodeFlags::VISITED;
        node.env = source.env.map(|env| self.clone_environment(graph, env));

        let clone = graph.insert(node);
        self.commit(original, clone);
        self.stats.cloned += 1;
        Some(clone)
    }

    /// Copy the environment chain starting at `env`.
    ///
    /// Values with a clone are replaced by it; the rest are shared with the
    /// original chain. Returns the innermost new link.
    pub fn clone_environment(&mut self, graph: &mut Graph, env: EnvId) -> EnvId {
        let outer: SmallVec<[EnvId; 4]> = graph.environment_chain(env).skip(1).collect();
        let mut parent = None;
        for &link in outer.iter().rev() {
            parent = Some(self.copy_environment_link(graph, link, parent));
        }
        self.copy_environment_link(graph, env, parent)
    }

    fn copy_environment_link(
        &mut self,
        graph: &mut Graph,
        link: EnvId,
        parent: Option<EnvId>,
    ) -> EnvId {
        let source = graph.environment(link);
        let copy = Environment {
            values: source
                .values
                .iter()
                .map(|value| value.map(|id| self.clone_map.remap(id)))
                .collect(),
            method: source.method,
            dex_pc: source.dex_pc,
            parent,
        };
        self.stats.environments_cloned += 1;
        graph.add_environment(copy)
    }

    /// Clone every node of `region` in order, then rewire inputs that point
    /// at region members cloned later (loop back edges).
    ///
    /// Returns [`all_okay`](Self::all_okay).
    pub fn clone_region(&mut self, graph: &mut Graph, region: &[NodeId]) -> bool {
        for &original in region {
            self.clone_node(graph, original);
        }
        let patched = if self.config.enabled && self.config.use_cloned_inputs {
            self.patch_forward_inputs(graph, region)
        } else {
            0
        };

        trace!(
            nodes = region.len(),
            cloned = self.stats.cloned,
            patched,
            okay = self.all_okay(),
            "cloned region"
        );
        self.all_okay()
    }

    fn patch_forward_inputs(&self, graph: &mut Graph, region: &[NodeId]) -> usize {
        let mut replacements: Vec<(NodeId, usize, NodeId)> = Vec::new();
        for &original in region {
            let Some(clone) = self.clone_map.get(original) else {
                continue;
            };
            let clone_inputs = &graph.node(clone).inputs;
            for (idx, input) in graph.node(original).inputs.iter().enumerate() {
                if let Some(image) = self.clone_map.get(input) {
                    if clone_inputs.get(idx) == Some(input) {
                        replacements.push((clone, idx, image));
                    }
                }
            }
        }

        let patched = replacements.len();
        for (node, idx, input) in replacements {
            graph.replace_input(node, idx, input);
        }
        patched
    }

    // =========================================================================
    // Manual Mappings
    // =========================================================================

    /// Seed the map with a clone built by the caller.
    ///
    /// `original` must not have a clone yet. Release builds keep an existing
    /// mapping.
    pub fn add_clone_manually(&mut self, original: NodeId, clone: NodeId) {
        debug_assert!(
            !self.clone_map.contains(original),
            "{original:?} already has a clone"
        );
        if self.clone_map.contains(original) {
            return;
        }
        #[cfg(debug_assertions)]
        self.manual_clones.insert(original);
        self.clone_map.insert(original, clone);
    }

    /// Set or replace the clone of `original`.
    pub fn add_or_update_clone_manually(&mut self, original: NodeId, clone: NodeId) {
        self.clone_map.insert(original, clone);
    }

    fn commit(&mut self, original: NodeId, clone: NodeId) {
        #[cfg(debug_assertions)]
        debug_assert!(
            !self.manual_clones.contains(&original),
            "automatic clone of {original:?} would replace a manual mapping"
        );
        self.clone_map.insert(original, clone);
    }

    fn record_failure(&mut self, node: NodeId, op: &Operator, reason: UnsupportedReason) {
        self.stats.unsupported += 1;
        debug!(
            node = %node,
            kind = op.debug_name(),
            reason = reason.describe(),
            "node kind cannot be cloned"
        );
        if self.first_failure.is_none() {
            self.first_failure = Some(CloneFailure {
                node,
                kind: op.debug_name(),
                reason,
            });
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub fn get_clone(&self, original: NodeId) -> Option<NodeId> {
        self.clone_map.get(original)
    }

    /// Whether every visited node was cloneable.
    #[inline]
    pub fn all_okay(&self) -> bool {
        self.first_failure.is_none()
    }

    /// Kind name of the first node that could not be cloned.
    #[inline]
    pub fn failed_clone_name(&self) -> Option<&'static str> {
        self.first_failure.map(|failure| failure.kind)
    }

    #[inline]
    pub fn first_failure(&self) -> Option<CloneFailure> {
        self.first_failure
    }

    #[inline]
    pub fn clone_map(&self) -> &CloneMap {
        &self.clone_map
    }

    #[inline]
    pub fn stats(&self) -> CloneStats {
        self.stats
    }

    pub fn into_clone_map(self) -> CloneMap {
        self.clone_map
    }
}

impl Default for GraphCloner {
    fn default() -> Self {
        Self::new(ClonerConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
