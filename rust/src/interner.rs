//! Node id interning.
//!
//! Maps external network node ids (OSM ids) to dense `u32` indices so the
//! search can use plain vectors instead of hash maps.

use rustc_hash::FxHashMap;

/// External node identifier as supplied by the network loader.
pub type NodeId = i64;

/// Dense internal node index in `[0, N)`.
pub type NodeIndex = u32;

/// Bijective mapping between external node ids and dense indices.
///
/// Indices are handed out in insertion order and never change.
#[derive(Debug, Clone)]
pub struct NodeInterner {
    to_index: FxHashMap<NodeId, NodeIndex>,
    from_index: Vec<NodeId>,
}

impl NodeInterner {
    /// Empty interner sized for a network of `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            to_index: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            from_index: Vec::with_capacity(capacity),
        }
    }

    /// Assign the next dense index to an OSM node id. A node seen before
    /// keeps the index it was first given.
    pub fn intern(&mut self, id: NodeId) -> NodeIndex {
        if let Some(&index) = self.to_index.get(&id) {
            return index;
        }
        let index = self.from_index.len() as NodeIndex;
        self.from_index.push(id);
        self.to_index.insert(id, index);
        index
    }

    /// Dense index of an OSM node id, or `None` for a node outside the
    /// network.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<NodeIndex> {
        self.to_index.get(&id).copied()
    }

    /// OSM node id stored at a dense index.
    #[inline]
    pub fn resolve(&self, index: NodeIndex) -> Option<NodeId> {
        self.from_index.get(index as usize).copied()
    }

    /// OSM node ids in index order; position `i` holds the node of index `i`.
    pub fn ids(&self) -> &[NodeId] {
        &self.from_index
    }

    pub fn len(&self) -> usize {
        self.from_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from_index.is_empty()
    }
}

impl Default for NodeInterner {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
