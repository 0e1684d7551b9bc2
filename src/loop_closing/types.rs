//! Value types passed through a registration attempt.

use std::collections::BTreeSet;

use crate::geometry::SE3;
use crate::scene_graph::NodeId;

/// One loop-closure candidate proposed by the detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInput {
    /// Nodes from the recent (query) segment of the trajectory.
    pub query_nodes: BTreeSet<NodeId>,
    /// Corresponding nodes from the historical (match) segment.
    pub match_nodes: BTreeSet<NodeId>,
    /// Place whose dynamic child anchors the match segment.
    pub match_root: NodeId,
}

impl RegistrationInput {
    pub fn new(
        query_nodes: impl IntoIterator<Item = NodeId>,
        match_nodes: impl IntoIterator<Item = NodeId>,
        match_root: NodeId,
    ) -> Self {
        Self {
            query_nodes: query_nodes.into_iter().collect(),
            match_nodes: match_nodes.into_iter().collect(),
            match_root,
        }
    }
}

/// Frame-local registration problem for a single layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerRegistrationProblem {
    pub src_nodes: BTreeSet<NodeId>,
    pub dest_nodes: BTreeSet<NodeId>,
}

impl From<&RegistrationInput> for LayerRegistrationProblem {
    fn from(input: &RegistrationInput) -> Self {
        Self {
            src_nodes: input.query_nodes.clone(),
            dest_nodes: input.match_nodes.clone(),
        }
    }
}

/// Output of the layer estimator, still in the estimator's working frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRegistrationSolution {
    pub valid: bool,
    pub dest_t_src: SE3,
    /// Correspondences judged consistent with `dest_t_src`, as (src, dest).
    pub inliers: BTreeSet<(NodeId, NodeId)>,
}

impl LayerRegistrationSolution {
    pub fn invalid() -> Self {
        Self {
            valid: false,
            dest_t_src: SE3::identity(),
            inliers: BTreeSet::new(),
        }
    }
}

impl Default for LayerRegistrationSolution {
    fn default() -> Self {
        Self::invalid()
    }
}

/// World pose of a trajectory node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentNodePose {
    pub world_t_body: SE3,
    /// The dynamic node the pose was read from.
    pub id: NodeId,
}

/// Final registration result handed to the pose-graph back end.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSolution {
    pub valid: bool,
    pub from_id: NodeId,
    pub to_id: NodeId,
    pub to_t_from: SE3,
    /// `UNSCORED` unless a solver assigns a quality measure.
    pub quality: f64,
}

impl RegistrationSolution {
    pub const UNSCORED: f64 = -1.0;

    pub fn new(from_id: NodeId, to_id: NodeId, to_t_from: SE3) -> Self {
        Self {
            valid: true,
            from_id,
            to_id,
            to_t_from,
            quality: Self::UNSCORED,
        }
    }

    pub fn invalid() -> Self {
        Self {
            valid: false,
            from_id: NodeId::default(),
            to_id: NodeId::default(),
            to_t_from: SE3::identity(),
            quality: Self::UNSCORED,
        }
    }
}

impl Default for RegistrationSolution {
    fn default() -> Self {
        Self::invalid()
    }
}
