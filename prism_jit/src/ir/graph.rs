//! Instruction graph.
//!
//! The graph provides:
//! - **Arena-based storage**: nodes and environments addressed by typed ids
//! - **Use-def chains**: fast lookup of the users of a node
//! - **Shared nodes**: one node per constant value, per parameter, and for
//!   each per-graph singleton (`CurrentMethod`, `Exit`)
//! - **Environment chains**: deoptimization state linked through inlined frames

use super::arena::{Arena, SecondaryMap};
use super::environment::{EnvId, Environment};
use super::node::{InputList, Node, NodeId};
use super::operators::{ArithOp, BitwiseOp, CheckKind, CmpOp, ControlOp, InvokeKind, Operator};
use super::types::DataType;
use crate::runtime::MethodId;
use rustc_hash::FxHashMap;

// =============================================================================
// Graph Structure
// =============================================================================

/// Instruction graph of one method.
#[derive(Clone)]
pub struct Graph {
    method: MethodId,

    /// Arena for node storage.
    nodes: Arena<Node>,

    /// Use chains: for each node, which nodes consume its output.
    uses: SecondaryMap<Node, Vec<NodeId>>,

    /// Deoptimization environments.
    environments: Arena<Environment>,

    /// Canonical node of each shared operator.
    shared: FxHashMap<Operator, NodeId>,

    /// Dex pc assigned to nodes built by `add_node`.
    next_dex_pc: u32,
}

impl Graph {
    pub fn new(method: MethodId) -> Self {
        Graph {
            method,
            nodes: Arena::with_capacity(64),
            uses: SecondaryMap::new(),
            environments: Arena::new(),
            shared: FxHashMap::default(),
            next_dex_pc: 0,
        }
    }

    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of nodes ever created, dead ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        self.nodes.ids()
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node for `op` at the current dex pc.
    ///
    /// Shared operators return the graph's existing node when there is one.
    pub fn add_node(&mut self, op: Operator, inputs: &[NodeId], ty: DataType) -> NodeId {
        let node = Node::new(op, InputList::from_slice(inputs), ty).with_dex_pc(self.next_dex_pc);
        self.insert(node)
    }

    /// Add a fully built node and register its uses.
    ///
    /// For a shared operator already present, the existing node is returned
    /// and `node` is dropped.
    pub fn insert(&mut self, node: Node) -> NodeId {
        if node.op.is_shared() {
            if let Some(&existing) = self.shared.get(&node.op) {
                return existing;
            }
        }

        let op = node.op;
        let id = self.nodes.alloc(node);
        for i in 0..self.nodes[id].inputs.len() {
            if let Some(input) = self.nodes[id].inputs.get(i) {
                self.add_use(input, id);
            }
        }
        if op.is_shared() {
            self.shared.insert(op, id);
        }
        id
    }

    /// Canonical node for a shared operator, if created.
    pub fn shared_node(&self, op: &Operator) -> Option<NodeId> {
        self.shared.get(op).copied()
    }

    /// Set the dex pc for nodes created afterwards.
    pub fn set_dex_pc(&mut self, dex_pc: u32) {
        self.next_dex_pc = dex_pc;
    }

    // =========================================================================
    // Use-Def Chains
    // =========================================================================

    /// Nodes that have `id` as an input, once per operand.
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn use_count(&self, id: NodeId) -> usize {
        self.uses(id).len()
    }

    fn add_use(&mut self, def: NodeId, user: NodeId) {
        self.uses.entry(def).push(user);
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        let uses = self.uses.entry(def);
        if let Some(pos) = uses.iter().position(|&u| u == user) {
            uses.swap_remove(pos);
        }
    }

    // =========================================================================
    // Node Modification
    // =========================================================================

    /// Replace a node's input at the given index.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let Some(old) = self.nodes[node].inputs.get(index) else {
            return;
        };
        self.remove_use(old, node);
        self.nodes[node].inputs.set(index, new_input);
        self.add_use(new_input, node);
    }

    /// Replace all uses of `old` with `new`.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) {
        let users = std::mem::take(self.uses.entry(old));
        for user in users {
            let pos = self.nodes[user]
                .inputs
                .iter()
                .position(|input| input == old);
            if let Some(i) = pos {
                self.nodes[user].inputs.set(i, new);
                self.add_use(new, user);
            }
        }
    }

    /// Mark a node dead and drop it from its inputs' use lists.
    pub fn kill(&mut self, id: NodeId) {
        self.nodes[id].mark_dead();
        let inputs: Vec<NodeId> = self.nodes[id].inputs.iter().collect();
        for input in inputs {
            self.remove_use(input, id);
        }
    }

    // =========================================================================
    // Environments
    // =========================================================================

    pub fn add_environment(&mut self, env: Environment) -> EnvId {
        self.environments.alloc(env)
    }

    #[inline]
    pub fn environment(&self, id: EnvId) -> &Environment {
        &self.environments[id]
    }

    #[inline]
    pub fn environment_mut(&mut self, id: EnvId) -> &mut Environment {
        &mut self.environments[id]
    }

    pub fn environment_count(&self) -> usize {
        self.environments.len()
    }

    /// Attach `env` to `node`, replacing any previous environment.
    pub fn set_environment(&mut self, node: NodeId, env: EnvId) {
        self.nodes[node].env = Some(env);
    }

    /// Links of the chain starting at `env`, innermost first.
    pub fn environment_chain(&self, env: EnvId) -> impl Iterator<Item = EnvId> + '_ {
        std::iter::successors(Some(env), move |&id| self.environments[id].parent)
    }

    // =========================================================================
    // Constants and Parameters
    // =========================================================================

    pub fn int_constant(&mut self, value: i32) -> NodeId {
        self.add_node(Operator::IntConstant(value), &[], DataType::Int32)
    }

    pub fn long_constant(&mut self, value: i64) -> NodeId {
        self.add_node(Operator::LongConstant(value), &[], DataType::Int64)
    }

    pub fn float_constant(&mut self, value: f32) -> NodeId {
        self.add_node(Operator::float_constant(value), &[], DataType::Float32)
    }

    pub fn double_constant(&mut self, value: f64) -> NodeId {
        self.add_node(Operator::double_constant(value), &[], DataType::Float64)
    }

    pub fn null_constant(&mut self) -> NodeId {
        self.add_node(Operator::NullConstant, &[], DataType::Reference)
    }

    pub fn current_method(&mut self) -> NodeId {
        self.add_node(Operator::CurrentMethod, &[], DataType::Reference)
    }

    pub fn parameter(&mut self, index: u16, ty: DataType) -> NodeId {
        self.add_node(Operator::ParameterValue(index), &[], ty)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn arith(&mut self, op: ArithOp, ty: DataType, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Arith(op), &[lhs, rhs], ty)
    }

    pub fn bitwise(&mut self, op: BitwiseOp, ty: DataType, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Bitwise(op), &[lhs, rhs], ty)
    }

    pub fn condition(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::Condition(op), &[lhs, rhs], DataType::Bool)
    }

    pub fn phi(&mut self, values: &[NodeId], ty: DataType) -> NodeId {
        self.add_node(Operator::Phi, values, ty)
    }

    pub fn check(&mut self, kind: CheckKind, inputs: &[NodeId]) -> NodeId {
        let ty = match kind {
            CheckKind::Null => DataType::Reference,
            CheckKind::Bounds | CheckKind::DivZero => inputs
                .first()
                .map(|&id| self.nodes[id].ty)
                .unwrap_or(DataType::Int32),
            CheckKind::Clinit => DataType::Reference,
            CheckKind::DevirtGuard => DataType::Void,
        };
        self.add_node(Operator::Check(kind), inputs, ty)
    }

    pub fn invoke(
        &mut self,
        kind: InvokeKind,
        method_idx: u32,
        args: &[NodeId],
        ty: DataType,
    ) -> NodeId {
        self.add_node(Operator::Invoke(kind, method_idx), args, ty)
    }

    pub fn control(&mut self, op: ControlOp, inputs: &[NodeId]) -> NodeId {
        self.add_node(Operator::Control(op), inputs, DataType::Void)
    }

    // =========================================================================
    // Utilities
    // =========================================================================

    /// Verify graph consistency (for debugging).
    #[cfg(debug_assertions)]
    pub fn verify(&self) -> Result<(), String> {
        for (id, node) in self.iter() {
            for input in node.inputs.iter() {
                if !self.nodes.contains(input) {
                    return Err(format!("node {id:?} has invalid input {input:?}"));
                }
            }
            if let Some(env) = node.env {
                if !self.environments.contains(env) {
                    return Err(format!("node {id:?} has invalid environment {env:?}"));
                }
            }
        }

        for (id, env) in self.environments.iter() {
            if let Some(value) = env.live_values().find(|&v| !self.nodes.contains(v)) {
                return Err(format!("environment {id:?} holds invalid node {value:?}"));
            }
            match env.parent {
                Some(parent) if !self.environments.contains(parent) => {
                    return Err(format!("environment {id:?} has invalid parent {parent:?}"));
                }
                _ => {}
            }
        }

        for id in self.environments.ids() {
            if self.environment_chain(id).nth(self.environments.len()).is_some() {
                return Err(format!("environment chain from {id:?} is cyclic"));
            }
        }

        for (op, &id) in &self.shared {
            if self.nodes[id].op != *op {
                return Err(format!("shared entry {op} points at {id:?}"));
            }
        }

        Ok(())
    }

    #[cfg(not(debug_assertions))]
    pub fn verify(&self) -> Result<(), String> {
        Ok(())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph {} ({} nodes):", self.method, self.nodes.len())?;
        for (id, node) in self.iter() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        for (id, env) in self.environments.iter() {
            writeln!(f, "  env {:?}: {:?} parent={:?}", id, env.values, env.parent)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_nodes_are_deduplicated() {
        let mut g = Graph::new(MethodId(1));
        let a = g.int_constant(5);
        let b = g.int_constant(5);
        let c = g.int_constant(6);
        assert_eq!(a, b);
        assert_ne!(a, c);

        assert_eq!(g.current_method(), g.current_method());
        assert_eq!(g.parameter(0, DataType::Int32), g.parameter(0, DataType::Int32));
        assert_eq!(g.shared_node(&Operator::IntConstant(6)), Some(c));
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn test_non_shared_nodes_are_distinct() {
        let mut g = Graph::new(MethodId(1));
        let x = g.parameter(0, DataType::Int32);
        let a = g.arith(ArithOp::Add, DataType::Int32, x, x);
        let b = g.arith(ArithOp::Add, DataType::Int32, x, x);
        assert_ne!(a, b);
        assert_eq!(g.use_count(x), 4);
    }

    #[test]
    fn test_dex_pc_applies_to_new_nodes() {
        let mut g = Graph::new(MethodId(1));
        let x = g.parameter(0, DataType::Int32);
        g.set_dex_pc(7);
        let neg = g.add_node(Operator::Neg, &[x], DataType::Int32);
        assert_eq!(g.node(neg).dex_pc, 7);
        assert_eq!(g.node(x).dex_pc, 0);
    }

    #[test]
    fn test_replace_all_uses() {
        let mut g = Graph::new(MethodId(1));
        let c1 = g.int_constant(5);
        let c2 = g.int_constant(10);
        let add = g.arith(ArithOp::Add, DataType::Int32, c1, c1);

        g.replace_all_uses(c1, c2);

        assert_eq!(g.node(add).inputs.as_slice(), &[c2, c2]);
        assert_eq!(g.use_count(c1), 0);
        assert_eq!(g.use_count(c2), 2);
    }

    #[test]
    fn test_replace_input_and_kill() {
        let mut g = Graph::new(MethodId(1));
        let a = g.int_constant(1);
        let b = g.int_constant(2);
        let sub = g.arith(ArithOp::Sub, DataType::Int32, a, a);

        g.replace_input(sub, 1, b);
        assert_eq!(g.node(sub).inputs.as_slice(), &[a, b]);
        assert_eq!(g.uses(b), &[sub]);

        g.kill(sub);
        assert!(g.node(sub).is_dead());
        assert_eq!(g.use_count(a), 0);
        assert_eq!(g.use_count(b), 0);
    }

    #[test]
    fn test_environment_chain_order() {
        let mut g = Graph::new(MethodId(1));
        let x = g.parameter(0, DataType::Int32);
        let outer = g.add_environment(Environment::with_values(MethodId(1), 3, &[Some(x)]));
        let mut inner_env = Environment::new(MethodId(2), 0, 2);
        inner_env.parent = Some(outer);
        let inner = g.add_environment(inner_env);

        let call = g.invoke(InvokeKind::StaticOrDirect, 4, &[x], DataType::Void);
        g.set_environment(call, inner);

        assert_eq!(g.environment_chain(inner).collect::<Vec<_>>(), vec![inner, outer]);
        assert_eq!(g.environment(outer).get(0), Some(x));
        assert!(g.node(call).has_environment());
        assert!(g.verify().is_ok());
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_verify_rejects_cyclic_environment() {
        let mut g = Graph::new(MethodId(1));
        let a = g.add_environment(Environment::new(MethodId(1), 0, 0));
        let b = g.add_environment(Environment::new(MethodId(1), 0, 0));
        g.environment_mut(a).parent = Some(b);
        g.environment_mut(b).parent = Some(a);
        assert!(g.verify().unwrap_err().contains("cyclic"));
    }
}
