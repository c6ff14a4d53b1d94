//! Original-to-clone node mapping.

use crate::ir::NodeId;
use rustc_hash::FxHashMap;

/// Mapping from original nodes to their clones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneMap {
    map: FxHashMap<NodeId, NodeId>,
}

impl CloneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of `original`, if one was recorded.
    #[inline]
    pub fn get(&self, original: NodeId) -> Option<NodeId> {
        self.map.get(&original).copied()
    }

    #[inline]
    pub fn contains(&self, original: NodeId) -> bool {
        self.map.contains_key(&original)
    }

    /// Record `clone` for `original`, returning the previous clone.
    #[inline]
    pub fn insert(&mut self, original: NodeId, clone: NodeId) -> Option<NodeId> {
        self.map.insert(original, clone)
    }

    /// Image of `id`, or `id` itself when it has no clone.
    #[inline]
    pub fn remap(&self, id: NodeId) -> NodeId {
        self.get(id).unwrap_or(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `(original, clone)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.map.iter().map(|(&original, &clone)| (original, clone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remap_falls_back_to_original() {
        let mut map = CloneMap::new();
        assert_eq!(map.insert(NodeId::new(1), NodeId::new(10)), None);

        assert_eq!(map.remap(NodeId::new(1)), NodeId::new(10));
        assert_eq!(map.remap(NodeId::new(2)), NodeId::new(2));
        assert_eq!(map.insert(NodeId::new(1), NodeId::new(11)), Some(NodeId::new(10)));
        assert_eq!(map.len(), 1);
    }
}
