//! Keyframe-level registration delegated to an external frame matcher.

use std::sync::Arc;

use tracing::{error, info};

use crate::geometry::SE3;
use crate::scene_graph::{GraphAccessor, NodeId};
use crate::timing::{ScopedTimer, TimingLog};

use super::error::RegistrationError;
use super::service::{FrameRegistrationRequest, FrameRegistrationService, ServiceError};
use super::solver::RegistrationSolver;
use super::types::{RegistrationInput, RegistrationSolution};

pub const AGENT_TIMER_NAME: &str = "lcd/register_agent";

/// Registers two single keyframes through a [`FrameRegistrationService`].
///
/// The service answer is returned as-is: unlike the layer solver, no
/// composition with the keyframes' world poses is applied.
pub struct AgentSolver {
    service: Arc<dyn FrameRegistrationService>,
    timings: Option<Arc<TimingLog>>,
}

impl AgentSolver {
    pub fn new(service: Arc<dyn FrameRegistrationService>) -> Self {
        Self {
            service,
            timings: None,
        }
    }

    pub fn with_timing_log(mut self, timings: Arc<TimingLog>) -> Self {
        self.timings = Some(timings);
        self
    }

    fn try_solve(
        &self,
        graph: &dyn GraphAccessor,
        input: &RegistrationInput,
    ) -> Result<RegistrationSolution, RegistrationError> {
        // Only the first node of each set is used.
        let (Some(&query_id), Some(&match_id)) =
            (input.query_nodes.first(), input.match_nodes.first())
        else {
            return Err(RegistrationError::DegenerateInput {
                query: input.query_nodes.len(),
                matched: input.match_nodes.len(),
                required: 0,
            });
        };

        let timestamp_ns = graph
            .dynamic_node(query_id)
            .map(|attrs| attrs.timestamp_ns)
            .unwrap_or(0);
        let _timer = ScopedTimer::new(AGENT_TIMER_NAME, timestamp_ns, self.timings.as_deref());

        if !self.service.exists() {
            return Err(ServiceError::Unavailable.into());
        }

        let query = graph
            .dynamic_node(query_id)
            .ok_or(RegistrationError::UnresolvedPose(query_id))?;
        let matched = graph
            .dynamic_node(match_id)
            .ok_or(RegistrationError::UnresolvedPose(match_id))?;

        let request = FrameRegistrationRequest {
            query: query.external_key.category_id(),
            matched: matched.external_key.category_id(),
        };
        let response = self.service.register(request)?;

        if !response.valid {
            let query_label = query_id.symbol().label();
            let match_label = match_id.symbol().label();
            info!("registration failed: {} -> {}", query_label, match_label);
            return Err(RegistrationError::ServiceRejected {
                query: query_label,
                matched: match_label,
            });
        }

        let q = response.orientation;
        let match_t_query = SE3::from_quaternion(q.w, q.i, q.j, q.k, response.position);
        info!(
            "registration succeeded: {} -> {}",
            query_id.symbol(),
            match_id.symbol()
        );
        Ok(RegistrationSolution::new(query_id, match_id, match_t_query))
    }
}

impl RegistrationSolver for AgentSolver {
    fn solve(
        &self,
        graph: &dyn GraphAccessor,
        input: &RegistrationInput,
        _query_agent_id: NodeId,
    ) -> RegistrationSolution {
        match self.try_solve(graph, input) {
            Ok(solution) => solution,
            Err(RegistrationError::ServiceRejected { .. }) => RegistrationSolution::invalid(),
            Err(RegistrationError::ServiceUnavailable(ServiceError::Unavailable)) => {
                error!("Frame registration service missing!");
                RegistrationSolution::invalid()
            }
            Err(RegistrationError::ServiceUnavailable(e)) => {
                error!("Frame registration service failed: {}", e);
                RegistrationSolution::invalid()
            }
            Err(e) => {
                info!("Agent registration skipped: {}", e);
                RegistrationSolution::invalid()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene_graph::{AgentAttributes, LayerId, NodeSymbol, SceneGraph};
    use crate::loop_closing::service::FrameRegistrationResponse;
    use approx::assert_relative_eq;
    use nalgebra::{Quaternion, UnitQuaternion, Vector3};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Service stub that records every request it receives.
    struct StubService {
        reachable: AtomicBool,
        response: Result<FrameRegistrationResponse, ServiceError>,
        calls: AtomicUsize,
        last_request: Mutex<Option<FrameRegistrationRequest>>,
    }

    impl StubService {
        fn new(reachable: bool, response: FrameRegistrationResponse) -> Arc<Self> {
            Self::answering(reachable, Ok(response))
        }

        fn answering(
            reachable: bool,
            response: Result<FrameRegistrationResponse, ServiceError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                reachable: AtomicBool::new(reachable),
                response,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FrameRegistrationService for StubService {
        fn exists(&self) -> bool {
            self.reachable.load(Ordering::SeqCst)
        }

        fn register(
            &self,
            request: FrameRegistrationRequest,
        ) -> Result<FrameRegistrationResponse, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock() = Some(request);
            self.response.clone()
        }
    }

    fn keyframe(frame: u64) -> AgentAttributes {
        AgentAttributes {
            position: Vector3::new(frame as f64, 0.0, 0.0),
            world_r_body: UnitQuaternion::identity(),
            external_key: NodeSymbol::new('f', frame),
            timestamp_ns: frame * 100,
        }
    }

    /// Keyframes 55 and 77 with external frame numbers 5 and 7.
    fn graph() -> SceneGraph {
        let mut graph = SceneGraph::new();
        graph.insert_node(NodeId::new(55), LayerId::Agents, keyframe(5));
        graph.insert_node(NodeId::new(77), LayerId::Agents, keyframe(7));
        graph
    }

    fn input() -> RegistrationInput {
        RegistrationInput::new([NodeId::new(55)], [NodeId::new(77)], NodeId::new(77))
    }

    fn accepted() -> FrameRegistrationResponse {
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.5);
        FrameRegistrationResponse {
            valid: true,
            orientation: *q.quaternion(),
            position: Vector3::new(0.2, -0.1, 0.0),
        }
    }

    #[test]
    fn test_missing_service_sends_no_request() {
        let service = StubService::new(false, accepted());
        let solver = AgentSolver::new(service.clone());

        let solution = solver.solve(&graph(), &input(), NodeId::new(55));

        assert!(!solution.valid);
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn test_rejected_registration_is_invalid() {
        let service = StubService::new(true, FrameRegistrationResponse::rejected());
        let solver = AgentSolver::new(service.clone());

        let solution = solver.solve(&graph(), &input(), NodeId::new(55));

        assert!(!solution.valid);
        assert_eq!(solution, RegistrationSolution::invalid());
        assert_eq!(service.calls(), 1);
    }

    #[test]
    fn test_service_failure_after_reachability_check_is_invalid() {
        for failure in [
            ServiceError::Timeout(std::time::Duration::from_millis(10)),
            ServiceError::Disconnected,
        ] {
            let service = StubService::answering(true, Err(failure));
            let solver = AgentSolver::new(service.clone());

            let solution = solver.solve(&graph(), &input(), NodeId::new(55));

            assert_eq!(solution, RegistrationSolution::invalid());
            assert_eq!(service.calls(), 1);
        }
    }

    #[test]
    fn test_request_uses_external_frame_numbers() {
        let service = StubService::new(true, accepted());
        let solver = AgentSolver::new(service.clone());

        solver.solve(&graph(), &input(), NodeId::new(55));

        let request = *service.last_request.lock();
        assert_eq!(request, Some(FrameRegistrationRequest { query: 5, matched: 7 }));
    }

    #[test]
    fn test_accepted_pose_is_returned_uncomposed() {
        let service = StubService::new(true, accepted());
        let solver = AgentSolver::new(service);

        let solution = solver.solve(&graph(), &input(), NodeId::new(55));

        assert!(solution.valid);
        assert_eq!(solution.from_id, NodeId::new(55));
        assert_eq!(solution.to_id, NodeId::new(77));
        assert_eq!(solution.quality, RegistrationSolution::UNSCORED);
        // keyframe world poses differ, but the service pose passes through unchanged
        assert_relative_eq!(solution.to_t_from.translation, Vector3::new(0.2, -0.1, 0.0));
        assert_relative_eq!(solution.to_t_from.rotation_angle(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_unnormalized_orientation_is_normalized() {
        let response = FrameRegistrationResponse {
            valid: true,
            orientation: Quaternion::new(2.0, 0.0, 0.0, 0.0),
            position: Vector3::zeros(),
        };
        let solver = AgentSolver::new(StubService::new(true, response));

        let solution = solver.solve(&graph(), &input(), NodeId::new(55));
        assert_relative_eq!(solution.to_t_from.rotation.quaternion().norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_input_is_invalid() {
        let service = StubService::new(true, accepted());
        let solver = AgentSolver::new(service.clone());
        let empty = RegistrationInput::new([], [NodeId::new(77)], NodeId::new(77));

        assert!(!solver.solve(&graph(), &empty, NodeId::new(55)).valid);
        assert_eq!(service.calls(), 0);
    }

    #[test]
    fn test_timer_is_recorded() {
        let timings = Arc::new(TimingLog::new());
        let solver =
            AgentSolver::new(StubService::new(true, accepted())).with_timing_log(timings.clone());

        solver.solve(&graph(), &input(), NodeId::new(55));

        let records = timings.records_named(AGENT_TIMER_NAME);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp_ns, 500);
    }
}
