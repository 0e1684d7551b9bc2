//! Scene graph access for loop-closure registration.
//!
//! The hierarchical scene graph is owned by the mapping front end. This
//! module provides:
//! - [`types`] - `NodeId`, `NodeSymbol` keys and `LayerId`
//! - [`attributes`] - typed per-node attributes (places, objects, agent poses)
//! - [`graph`] - the read-only [`GraphAccessor`] trait and an in-memory [`SceneGraph`]
//! - [`places`] - ingestion of the places layer from the volumetric mapper
//!
//! # Hierarchy
//!
//! Agent poses (time-indexed keyframes) hang as children under the place
//! node closest to them. Loop-closure candidates name place nodes; the
//! world pose of a candidate is read from its first dynamic child.

pub mod attributes;
pub mod graph;
pub mod places;
pub mod types;

pub use attributes::{AgentAttributes, NodeAttributes, PlaceAttributes, SemanticAttributes};
pub use graph::{GraphAccessor, SceneGraph, SceneGraphEdge, SceneGraphNode};
pub use places::{MergeStats, PlacesLayer, PlacesSource};
pub use types::{LayerId, NodeId, NodeSymbol};
