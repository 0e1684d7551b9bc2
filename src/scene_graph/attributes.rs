//! Typed per-node attributes.

use nalgebra::{UnitQuaternion, Vector3};

use crate::geometry::SE3;

use super::types::NodeSymbol;

/// Free-space place extracted from the distance field.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceAttributes {
    pub position: Vector3<f64>,
    /// Distance to the nearest obstacle (m).
    pub distance: f64,
    pub num_basis_points: usize,
    pub semantic_label: Option<u32>,
}

impl PlaceAttributes {
    pub fn new(position: Vector3<f64>) -> Self {
        Self {
            position,
            distance: 0.0,
            num_basis_points: 0,
            semantic_label: None,
        }
    }

    pub fn with_label(mut self, label: u32) -> Self {
        self.semantic_label = Some(label);
        self
    }
}

/// Objects, rooms and buildings: a centroid plus a category.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticAttributes {
    pub position: Vector3<f64>,
    pub semantic_label: Option<u32>,
    pub name: String,
}

/// Time-indexed robot pose (a keyframe on the trajectory).
#[derive(Debug, Clone, PartialEq)]
pub struct AgentAttributes {
    pub position: Vector3<f64>,
    pub world_r_body: UnitQuaternion<f64>,
    /// Key of the originating keyframe in the odometry front end.
    pub external_key: NodeSymbol,
    pub timestamp_ns: u64,
}

impl AgentAttributes {
    /// Stored pose of this keyframe (`world_T_body`).
    pub fn world_t_body(&self) -> SE3 {
        SE3::new(self.world_r_body, self.position)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeAttributes {
    Place(PlaceAttributes),
    Semantic(SemanticAttributes),
    Agent(AgentAttributes),
}

impl NodeAttributes {
    pub fn position(&self) -> Vector3<f64> {
        match self {
            NodeAttributes::Place(attrs) => attrs.position,
            NodeAttributes::Semantic(attrs) => attrs.position,
            NodeAttributes::Agent(attrs) => attrs.position,
        }
    }

    pub fn semantic_label(&self) -> Option<u32> {
        match self {
            NodeAttributes::Place(attrs) => attrs.semantic_label,
            NodeAttributes::Semantic(attrs) => attrs.semantic_label,
            NodeAttributes::Agent(_) => None,
        }
    }

    pub fn as_agent(&self) -> Option<&AgentAttributes> {
        match self {
            NodeAttributes::Agent(attrs) => Some(attrs),
            _ => None,
        }
    }
}

impl From<PlaceAttributes> for NodeAttributes {
    fn from(attrs: PlaceAttributes) -> Self {
        NodeAttributes::Place(attrs)
    }
}

impl From<SemanticAttributes> for NodeAttributes {
    fn from(attrs: SemanticAttributes) -> Self {
        NodeAttributes::Semantic(attrs)
    }
}

impl From<AgentAttributes> for NodeAttributes {
    fn from(attrs: AgentAttributes) -> Self {
        NodeAttributes::Agent(attrs)
    }
}
