//! Ingestion of the places layer produced by the volumetric mapper.
//!
//! Distance-field computation and place extraction happen outside this
//! crate; the provider hands over a finished subgraph which is copied
//! node-by-node and edge-by-edge into the scene graph.

use tracing::{info, warn};

use super::attributes::PlaceAttributes;
use super::graph::{GraphAccessor, SceneGraph, SceneGraphEdge};
use super::types::{LayerId, NodeId};

/// A places-layer subgraph supplied by an external volumetric mapper.
pub trait PlacesSource {
    fn nodes(&self) -> Vec<(NodeId, &PlaceAttributes)>;

    fn edges(&self) -> Vec<SceneGraphEdge>;
}

/// Owned places subgraph, e.g. deserialized from a provider's output.
#[derive(Debug, Clone, Default)]
pub struct PlacesLayer {
    pub nodes: Vec<(NodeId, PlaceAttributes)>,
    pub edges: Vec<SceneGraphEdge>,
}

impl PlacesSource for PlacesLayer {
    fn nodes(&self) -> Vec<(NodeId, &PlaceAttributes)> {
        self.nodes.iter().map(|(id, attrs)| (*id, attrs)).collect()
    }

    fn edges(&self) -> Vec<SceneGraphEdge> {
        self.edges.clone()
    }
}

/// Counts of what a merge actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub nodes_inserted: usize,
    pub nodes_updated: usize,
    pub nodes_skipped: usize,
    pub edges_inserted: usize,
    pub edges_skipped: usize,
}

impl SceneGraph {
    /// Copy a places subgraph into the Places layer.
    ///
    /// Existing place nodes get their attributes replaced; ids already used
    /// by another layer are skipped. Edges are inserted only when both
    /// endpoints ended up in the Places layer.
    pub fn merge_places(&mut self, source: &impl PlacesSource) -> MergeStats {
        let mut stats = MergeStats::default();

        for (id, attrs) in source.nodes() {
            match self.node(id).map(|node| node.layer) {
                None => {
                    self.insert_node(id, LayerId::Places, attrs.clone());
                    stats.nodes_inserted += 1;
                }
                Some(LayerId::Places) => {
                    self.set_attributes(id, attrs.clone());
                    stats.nodes_updated += 1;
                }
                Some(layer) => {
                    warn!("Place {} already exists in layer {}; skipping", id, layer);
                    stats.nodes_skipped += 1;
                }
            }
        }

        for edge in source.edges() {
            let both_places = [edge.source, edge.target]
                .iter()
                .all(|id| self.node(*id).is_some_and(|n| n.layer == LayerId::Places));

            if both_places && self.insert_edge(edge.source, edge.target, edge.weight) {
                stats.edges_inserted += 1;
            } else {
                stats.edges_skipped += 1;
            }
        }

        info!(
            "Merged places: {} inserted, {} updated, {} skipped, {} edges",
            stats.nodes_inserted, stats.nodes_updated, stats.nodes_skipped, stats.edges_inserted
        );
        stats
    }
}
