//! Conversion of a frame-local layer solution into a relative pose between
//! two trajectory keyframes.
//!
//! The layer estimator works in an arbitrary frame (`src` → `dest`). The
//! pose-graph back end wants the relative pose between the keyframes that
//! anchor the query and match segments, so the local estimate is sandwiched
//! between their world poses:
//!
//! ```text
//! to_T_from = (world_T_to)^-1 * dest_T_src * world_T_from
//! ```

use tracing::debug;

use crate::geometry::SE3;
use crate::scene_graph::{GraphAccessor, NodeId};

use super::error::RegistrationError;
use super::registration::EstimatorError;
use super::types::{AgentNodePose, LayerRegistrationSolution, RegistrationSolution};

/// World pose of the first dynamic child of `root_id`.
pub fn get_agent_pose(graph: &dyn GraphAccessor, root_id: NodeId) -> Option<AgentNodePose> {
    let child_id = graph
        .children(root_id)
        .into_iter()
        .find(|child| graph.is_dynamic(*child))?;

    let attrs = graph.dynamic_node(child_id)?;
    Some(AgentNodePose {
        world_t_body: attrs.world_t_body(),
        id: child_id,
    })
}

/// World pose of the query keyframe.
///
/// Accepts either the dynamic node itself or a static node that has one as
/// a child.
pub fn get_query_pose(graph: &dyn GraphAccessor, query_id: NodeId) -> Option<AgentNodePose> {
    match graph.dynamic_node(query_id) {
        Some(attrs) => Some(AgentNodePose {
            world_t_body: attrs.world_t_body(),
            id: query_id,
        }),
        None => get_agent_pose(graph, query_id),
    }
}

/// Relative pose between two keyframes given a local estimate in between.
///
/// Operand order matters: `dest_t_src` is first lifted into the world by
/// the query pose, then expressed in the match keyframe's frame.
pub fn compose_relative_pose(world_t_from: &SE3, world_t_to: &SE3, dest_t_src: &SE3) -> SE3 {
    world_t_to.inverse() * *dest_t_src * *world_t_from
}

/// Turn a layer solution into a keyframe-to-keyframe registration.
pub fn full_solution_from_layer(
    graph: &dyn GraphAccessor,
    solution: &LayerRegistrationSolution,
    query_agent_id: NodeId,
    match_root: NodeId,
) -> Result<RegistrationSolution, RegistrationError> {
    if !solution.valid {
        return Err(EstimatorError::NoSolution.into());
    }
    if solution.inliers.is_empty() {
        return Err(EstimatorError::EmptyInlierSet.into());
    }

    let from_pose = get_query_pose(graph, query_agent_id)
        .ok_or(RegistrationError::UnresolvedPose(query_agent_id))?;
    let to_pose =
        get_agent_pose(graph, match_root).ok_or(RegistrationError::UnresolvedPose(match_root))?;

    let to_t_from = compose_relative_pose(
        &from_pose.world_t_body,
        &to_pose.world_t_body,
        &solution.dest_t_src,
    );

    debug!("world_T_from: {}", from_pose.world_t_body);
    debug!("world_T_to: {}", to_pose.world_t_body);
    debug!("dest_T_src: {}", solution.dest_t_src);
    debug!("to_T_from: {}", to_t_from);

    Ok(RegistrationSolution::new(from_pose.id, to_pose.id, to_t_from))
}
