//! Read-only accessor trait and an in-memory scene graph.
//!
//! The scene graph is owned by the mapping front end; loop-closure
//! registration only ever reads it through [`GraphAccessor`]. [`SceneGraph`]
//! is a plain in-memory implementation used by the file loader and tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::attributes::{AgentAttributes, NodeAttributes};
use super::types::{LayerId, NodeId};

/// A node with its layer, attributes and hierarchy links.
#[derive(Debug, Clone)]
pub struct SceneGraphNode {
    pub id: NodeId,
    pub layer: LayerId,
    pub attributes: NodeAttributes,
    /// Parent in the layer above (e.g. the place an agent pose belongs to).
    pub parent: Option<NodeId>,
    /// Children in the layers below.
    pub children: BTreeSet<NodeId>,
}

impl SceneGraphNode {
    pub fn is_dynamic(&self) -> bool {
        self.layer.is_dynamic() && self.attributes.as_agent().is_some()
    }
}

/// Undirected intra-layer edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneGraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub weight: f64,
}

/// Read-only query surface over a scene graph.
pub trait GraphAccessor: Send + Sync {
    fn node(&self, id: NodeId) -> Option<&SceneGraphNode>;

    fn has_layer(&self, layer: LayerId) -> bool;

    /// Ids of all nodes in a layer, in ascending order.
    fn layer_nodes(&self, layer: LayerId) -> Vec<NodeId>;

    fn edge(&self, source: NodeId, target: NodeId) -> Option<&SceneGraphEdge>;

    fn is_dynamic(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(SceneGraphNode::is_dynamic)
    }

    /// Attributes of a dynamic (time-indexed) node.
    fn dynamic_node(&self, id: NodeId) -> Option<&AgentAttributes> {
        self.node(id)
            .filter(|node| node.is_dynamic())
            .and_then(|node| node.attributes.as_agent())
    }

    /// Children of a node, in ascending id order.
    fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|node| node.children.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// In-memory scene graph.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, SceneGraphNode>,
    layers: BTreeMap<LayerId, BTreeSet<NodeId>>,
    /// Keyed by (min id, max id).
    edges: BTreeMap<(NodeId, NodeId), SceneGraphEdge>,
}

impl SceneGraph {
    /// Create a graph with every layer present and empty.
    pub fn new() -> Self {
        let layers = LayerId::ALL
            .iter()
            .map(|layer| (*layer, BTreeSet::new()))
            .collect();
        Self {
            nodes: HashMap::new(),
            layers,
            edges: BTreeMap::new(),
        }
    }

    /// Insert a node. Returns false if a node with this id already exists.
    pub fn insert_node(
        &mut self,
        id: NodeId,
        layer: LayerId,
        attributes: impl Into<NodeAttributes>,
    ) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }

        self.nodes.insert(
            id,
            SceneGraphNode {
                id,
                layer,
                attributes: attributes.into(),
                parent: None,
                children: BTreeSet::new(),
            },
        );
        self.layers.entry(layer).or_default().insert(id);
        true
    }

    /// Replace the attributes of an existing node.
    pub fn set_attributes(&mut self, id: NodeId, attributes: impl Into<NodeAttributes>) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) => {
                node.attributes = attributes.into();
                true
            }
            None => false,
        }
    }

    /// Insert an intra-layer edge. Both nodes must exist in the same layer.
    ///
    /// Re-inserting an existing edge updates its weight.
    pub fn insert_edge(&mut self, source: NodeId, target: NodeId, weight: f64) -> bool {
        if source == target {
            return false;
        }
        let (Some(s), Some(t)) = (self.nodes.get(&source), self.nodes.get(&target)) else {
            return false;
        };
        if s.layer != t.layer {
            return false;
        }

        self.edges.insert(
            edge_key(source, target),
            SceneGraphEdge {
                source,
                target,
                weight,
            },
        );
        true
    }

    /// Link `child` under `parent`, replacing any previous parent.
    pub fn insert_parent(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child || !self.nodes.contains_key(&parent) {
            return false;
        }

        let previous = match self.nodes.get_mut(&child) {
            Some(node) => node.parent.replace(parent),
            None => return false,
        };

        if let Some(previous) = previous {
            if let Some(node) = self.nodes.get_mut(&previous) {
                node.children.remove(&child);
            }
        }
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.insert(child);
        }
        true
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self) -> impl Iterator<Item = &SceneGraphEdge> {
        self.edges.values()
    }
}

impl GraphAccessor for SceneGraph {
    fn node(&self, id: NodeId) -> Option<&SceneGraphNode> {
        self.nodes.get(&id)
    }

    fn has_layer(&self, layer: LayerId) -> bool {
        self.layers.contains_key(&layer)
    }

    fn layer_nodes(&self, layer: LayerId) -> Vec<NodeId> {
        self.layers
            .get(&layer)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn edge(&self, source: NodeId, target: NodeId) -> Option<&SceneGraphEdge> {
        self.edges.get(&edge_key(source, target))
    }
}

fn edge_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
