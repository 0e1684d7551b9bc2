//! Failure kinds of a registration attempt.
//!
//! None of these cross the solver boundary: [`RegistrationSolver::solve`]
//! turns every error into an invalid solution after logging it.
//!
//! [`RegistrationSolver::solve`]: super::solver::RegistrationSolver::solve

use thiserror::Error;

use crate::scene_graph::{LayerId, NodeId};

use super::registration::EstimatorError;
use super::service::ServiceError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// Not enough candidate nodes to attempt a solve.
    #[error("degenerate input: {query} query / {matched} match nodes (need more than {required} each)")]
    DegenerateInput {
        query: usize,
        matched: usize,
        required: usize,
    },

    /// The node has no time-indexed child to read a world pose from.
    #[error("no world pose for node {0}")]
    UnresolvedPose(NodeId),

    #[error("layer {0} is missing from the scene graph")]
    MissingLayer(LayerId),

    #[error("estimator rejected the problem: {0}")]
    EstimatorRejected(#[from] EstimatorError),

    #[error("frame registration service unavailable: {0}")]
    ServiceUnavailable(#[from] ServiceError),

    #[error("frame registration rejected: {query} -> {matched}")]
    ServiceRejected { query: String, matched: String },
}
