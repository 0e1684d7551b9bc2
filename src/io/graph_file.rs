//! YAML scene-graph and loop-closure candidate files.
//!
//! ```yaml
//! nodes:
//!   - id: 101
//!     layer: places
//!     position: [0.0, 0.0, 0.0]
//!     distance: 0.4
//!   - id: {category: a, index: 12}
//!     layer: agents
//!     position: [1.0, 0.0, 0.0]
//!     orientation: [1.0, 0.0, 0.0, 0.0]   # w, x, y, z
//!     timestamp_ns: 1200
//! edges:
//!   - [101, 102, 1.0]
//! parents:
//!   - [101, {category: a, index: 12}]    # parent, child
//! candidates:
//!   - layer: places
//!     query_agent: {category: a, index: 90}
//!     query_nodes: [101, 102, 103, 104]
//!     match_nodes: [201, 202, 203, 204]
//!     match_root: 201
//! ```
//!
//! Place nodes and the edges between them are ingested through
//! [`SceneGraph::merge_places`]; every other node is inserted directly.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use nalgebra::{UnitQuaternion, Quaternion, Vector3};
use serde::Deserialize;
use tracing::{info, warn};

use crate::loop_closing::RegistrationInput;
use crate::scene_graph::{
    AgentAttributes, LayerId, NodeAttributes, NodeId, NodeSymbol, PlaceAttributes, PlacesLayer,
    SceneGraph, SceneGraphEdge, SemanticAttributes,
};

/// A numeric id or a `(category, index)` symbol.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum NodeKeyYaml {
    Id(u64),
    Symbol { category: char, index: u64 },
}

impl NodeKeyYaml {
    fn id(self) -> NodeId {
        match self {
            NodeKeyYaml::Id(id) => NodeId::new(id),
            NodeKeyYaml::Symbol { category, index } => NodeSymbol::new(category, index).into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NodeYaml {
    id: NodeKeyYaml,
    layer: LayerId,
    position: [f64; 3],
    /// Agents only, `[w, x, y, z]`.
    orientation: Option<[f64; 4]>,
    /// Agents only. Defaults to the node's own key.
    external_key: Option<NodeKeyYaml>,
    #[serde(default)]
    timestamp_ns: u64,
    semantic_label: Option<u32>,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    num_basis_points: usize,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CandidateYaml {
    layer: LayerId,
    query_agent: NodeKeyYaml,
    query_nodes: Vec<NodeKeyYaml>,
    match_nodes: Vec<NodeKeyYaml>,
    match_root: NodeKeyYaml,
}

#[derive(Debug, Deserialize)]
struct GraphFileYaml {
    #[serde(default)]
    nodes: Vec<NodeYaml>,
    #[serde(default)]
    edges: Vec<(NodeKeyYaml, NodeKeyYaml, f64)>,
    #[serde(default)]
    parents: Vec<(NodeKeyYaml, NodeKeyYaml)>,
    #[serde(default)]
    candidates: Vec<CandidateYaml>,
}

/// A loop-closure candidate read from file.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Layer whose solver handles this candidate.
    pub layer: LayerId,
    pub query_agent_id: NodeId,
    pub input: RegistrationInput,
}

#[derive(Debug)]
pub struct GraphFile {
    pub graph: SceneGraph,
    pub candidates: Vec<Candidate>,
}

impl GraphFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let raw: GraphFileYaml =
            serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {:?}", path))?;
        let loaded = Self::from_raw(raw)?;
        info!(
            "Loaded {} nodes, {} edges, {} candidates from {:?}",
            loaded.graph.num_nodes(),
            loaded.graph.num_edges(),
            loaded.candidates.len(),
            path
        );
        Ok(loaded)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_raw(serde_yaml::from_str(yaml)?)
    }

    fn from_raw(raw: GraphFileYaml) -> Result<Self> {
        let mut graph = SceneGraph::new();
        let mut places = PlacesLayer::default();

        for node in raw.nodes {
            let id = node.id.id();
            match node_attributes(id, &node)? {
                NodeAttributes::Place(attrs) => places.nodes.push((id, attrs)),
                attrs => {
                    if !graph.insert_node(id, node.layer, attrs) {
                        bail!("duplicate node {}", id.symbol());
                    }
                }
            }
        }

        let place_ids: Vec<NodeId> = places.nodes.iter().map(|(id, _)| *id).collect();
        let mut other_edges = Vec::new();
        for (source, target, weight) in raw.edges {
            let edge = SceneGraphEdge {
                source: source.id(),
                target: target.id(),
                weight,
            };
            if place_ids.contains(&edge.source) && place_ids.contains(&edge.target) {
                places.edges.push(edge);
            } else {
                other_edges.push(edge);
            }
        }

        let stats = graph.merge_places(&places);
        if stats.nodes_skipped > 0 || stats.nodes_updated > 0 {
            bail!("place node ids collide with other nodes: {:?}", stats);
        }

        for edge in other_edges {
            if !graph.insert_edge(edge.source, edge.target, edge.weight) {
                warn!(
                    "Skipping edge {} -> {}: missing node or crosses layers",
                    edge.source.symbol(),
                    edge.target.symbol()
                );
            }
        }

        for (parent, child) in raw.parents {
            let (parent, child) = (parent.id(), child.id());
            if !graph.insert_parent(parent, child) {
                bail!("invalid parent link {} -> {}", parent.symbol(), child.symbol());
            }
        }

        let candidates = raw
            .candidates
            .into_iter()
            .map(|c| Candidate {
                layer: c.layer,
                query_agent_id: c.query_agent.id(),
                input: RegistrationInput::new(
                    c.query_nodes.into_iter().map(NodeKeyYaml::id),
                    c.match_nodes.into_iter().map(NodeKeyYaml::id),
                    c.match_root.id(),
                ),
            })
            .collect();

        Ok(Self { graph, candidates })
    }
}

fn node_attributes(id: NodeId, node: &NodeYaml) -> Result<NodeAttributes> {
    let position = Vector3::from(node.position);

    let attrs = match node.layer {
        LayerId::Places => PlaceAttributes {
            position,
            distance: node.distance,
            num_basis_points: node.num_basis_points,
            semantic_label: node.semantic_label,
        }
        .into(),
        LayerId::Agents => {
            let [w, x, y, z] = node.orientation.unwrap_or([1.0, 0.0, 0.0, 0.0]);
            let q = Quaternion::new(w, x, y, z);
            if q.norm() < 1e-12 {
                bail!("agent node {} has a zero orientation", id.symbol());
            }
            AgentAttributes {
                position,
                world_r_body: UnitQuaternion::from_quaternion(q),
                external_key: node
                    .external_key
                    .map(|key| key.id().symbol())
                    .unwrap_or_else(|| id.symbol()),
                timestamp_ns: node.timestamp_ns,
            }
            .into()
        }
        LayerId::Objects | LayerId::Rooms | LayerId::Buildings => SemanticAttributes {
            position,
            semantic_label: node.semantic_label,
            name: node.name.clone(),
        }
        .into(),
    };
    Ok(attrs)
}
