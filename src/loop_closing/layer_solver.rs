//! Correspondence-free registration of a scene-graph layer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::LayerRegistrationConfig;
use crate::scene_graph::{GraphAccessor, LayerId, NodeId};
use crate::timing::{ScopedTimer, TimingLog};

use super::composition::full_solution_from_layer;
use super::diagnostics::{RecordCounter, RegistrationLogger};
use super::error::RegistrationError;
use super::registration::{RobustSolver, register_dsg_layer_pairwise, register_dsg_layer_semantic};
use super::solver::RegistrationSolver;
use super::types::{LayerRegistrationProblem, RegistrationInput, RegistrationSolution};

/// Candidate sets of this size or smaller are rejected without solving.
pub const MIN_LAYER_NODES: usize = 3;

/// Registers the query and match node sets of one layer, then lifts the
/// frame-local estimate to a keyframe-to-keyframe pose.
pub struct LayerSolver {
    layer_id: LayerId,
    config: LayerRegistrationConfig,
    solver: RobustSolver,
    timer_prefix: String,
    logger: Option<RegistrationLogger>,
    timings: Option<Arc<TimingLog>>,
}

impl LayerSolver {
    /// `records` numbers diagnostic records; share one counter between
    /// solvers that may write to the same directory.
    pub fn new(layer_id: LayerId, config: LayerRegistrationConfig, records: RecordCounter) -> Self {
        let name = format!("{}_registration", layer_id);
        let logger = config.log_registration_problem.then(|| {
            RegistrationLogger::in_directory(&config.registration_output_path, &name, records)
        });

        Self {
            layer_id,
            solver: RobustSolver::new(config.estimator.clone()),
            timer_prefix: format!("lcd/{}", name),
            logger,
            timings: None,
            config,
        }
    }

    pub fn with_timing_log(mut self, timings: Arc<TimingLog>) -> Self {
        self.timings = Some(timings);
        self
    }

    pub fn timer_name(&self) -> &str {
        &self.timer_prefix
    }

    pub fn logger(&self) -> Option<&RegistrationLogger> {
        self.logger.as_ref()
    }

    fn try_solve(
        &self,
        graph: &dyn GraphAccessor,
        input: &RegistrationInput,
        query_agent_id: NodeId,
    ) -> Result<RegistrationSolution, RegistrationError> {
        let timestamp_ns = graph
            .dynamic_node(query_agent_id)
            .map(|attrs| attrs.timestamp_ns)
            .unwrap_or(0);
        let _timer = ScopedTimer::new(&self.timer_prefix, timestamp_ns, self.timings.as_deref());

        if input.query_nodes.len() <= MIN_LAYER_NODES || input.match_nodes.len() <= MIN_LAYER_NODES
        {
            return Err(RegistrationError::DegenerateInput {
                query: input.query_nodes.len(),
                matched: input.match_nodes.len(),
                required: MIN_LAYER_NODES,
            });
        }

        if !graph.has_layer(self.layer_id) {
            return Err(RegistrationError::MissingLayer(self.layer_id));
        }

        let problem = LayerRegistrationProblem::from(input);
        let solution = if self.config.use_pairwise_registration {
            register_dsg_layer_pairwise(&self.config, &self.solver, &problem, graph, self.layer_id)
        } else {
            register_dsg_layer_semantic(&self.config, &self.solver, &problem, graph, self.layer_id)
        };

        if let Some(logger) = &self.logger {
            match logger.log(graph, &solution, input, query_agent_id) {
                Ok(path) => debug!("Wrote registration record {}", path.display()),
                Err(e) => warn!("Registration record not written: {}", e),
            }
        }

        full_solution_from_layer(graph, &solution, query_agent_id, input.match_root)
    }
}

impl RegistrationSolver for LayerSolver {
    fn solve(
        &self,
        graph: &dyn GraphAccessor,
        input: &RegistrationInput,
        query_agent_id: NodeId,
    ) -> RegistrationSolution {
        match self.try_solve(graph, input, query_agent_id) {
            Ok(solution) => solution,
            Err(e) => {
                debug!("{} registration invalid: {}", self.layer_id, e);
                RegistrationSolution::invalid()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene_graph::{
        AgentAttributes, PlaceAttributes, SceneGraph, SceneGraphEdge, SceneGraphNode,
    };
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};
    use std::fs;

    const QUERY_AGENT: u64 = 900;
    const MATCH_AGENT: u64 = 901;

    fn tetrahedron() -> [Vector3<f64>; 4] {
        [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ]
    }

    fn agent(timestamp_ns: u64) -> AgentAttributes {
        AgentAttributes {
            position: Vector3::zeros(),
            world_r_body: UnitQuaternion::identity(),
            external_key: crate::scene_graph::NodeSymbol::new('a', timestamp_ns),
            timestamp_ns,
        }
    }

    /// Query places 101..=104, match places 201..=204 shifted by (1, 0, 0).
    /// Both keyframes sit at the world origin, and the match keyframe hangs
    /// under place 201.
    fn graph() -> SceneGraph {
        let mut graph = SceneGraph::new();
        for (i, p) in tetrahedron().iter().enumerate() {
            let i = i as u64;
            graph.insert_node(NodeId::new(101 + i), LayerId::Places, PlaceAttributes::new(*p));
            graph.insert_node(
                NodeId::new(201 + i),
                LayerId::Places,
                PlaceAttributes::new(p + Vector3::new(1.0, 0.0, 0.0)),
            );
        }
        graph.insert_node(NodeId::new(QUERY_AGENT), LayerId::Agents, agent(42));
        graph.insert_node(NodeId::new(MATCH_AGENT), LayerId::Agents, agent(7));
        graph.insert_parent(NodeId::new(201), NodeId::new(MATCH_AGENT));
        graph
    }

    fn input() -> RegistrationInput {
        RegistrationInput::new(
            (101..=104).map(NodeId::new),
            (201..=204).map(NodeId::new),
            NodeId::new(201),
        )
    }

    fn config() -> LayerRegistrationConfig {
        let mut config = LayerRegistrationConfig::default();
        config.estimator.noise_bound = 0.05;
        config
    }

    #[test]
    fn test_pure_translation_scenario() {
        let solver = LayerSolver::new(LayerId::Places, config(), RecordCounter::new());

        let solution = solver.solve(&graph(), &input(), NodeId::new(QUERY_AGENT));

        assert!(solution.valid);
        assert_eq!(solution.from_id, NodeId::new(QUERY_AGENT));
        assert_eq!(solution.to_id, NodeId::new(MATCH_AGENT));
        assert_relative_eq!(
            solution.to_t_from.translation,
            Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-6
        );
        assert_relative_eq!(solution.to_t_from.rotation_angle(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_small_sets_rejected_before_estimation() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.log_registration_problem = true;
        config.registration_output_path = dir.path().to_path_buf();
        let solver = LayerSolver::new(LayerId::Places, config, RecordCounter::new());

        let input = RegistrationInput::new(
            (101..=103).map(NodeId::new),
            (201..=204).map(NodeId::new),
            NodeId::new(201),
        );
        let solution = solver.solve(&graph(), &input, NodeId::new(QUERY_AGENT));

        assert!(!solution.valid);
        // the early return precedes both the estimator and the record
        assert_eq!(solver.logger().unwrap().counter().issued(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unresolved_match_pose_invalidates_solution() {
        let mut graph = graph();
        // move the match keyframe away from the match root
        graph.insert_parent(NodeId::new(104), NodeId::new(MATCH_AGENT));

        let solver = LayerSolver::new(LayerId::Places, config(), RecordCounter::new());
        let solution = solver.solve(&graph, &input(), NodeId::new(QUERY_AGENT));

        assert!(!solution.valid);
    }

    #[test]
    fn test_repeated_solves_agree() {
        let solver = LayerSolver::new(LayerId::Places, config(), RecordCounter::new());
        let graph = graph();

        let first = solver.solve(&graph, &input(), NodeId::new(QUERY_AGENT));
        let second = solver.solve(&graph, &input(), NodeId::new(QUERY_AGENT));

        assert!(first.valid);
        assert_eq!(first, second);
    }

    #[test]
    fn test_semantic_mode_with_shared_labels() {
        let mut graph = SceneGraph::new();
        for (i, p) in tetrahedron().iter().enumerate() {
            let i = i as u64;
            let label = i as u32;
            graph.insert_node(
                NodeId::new(101 + i),
                LayerId::Places,
                PlaceAttributes::new(*p).with_label(label),
            );
            graph.insert_node(
                NodeId::new(201 + i),
                LayerId::Places,
                PlaceAttributes::new(p + Vector3::new(1.0, 0.0, 0.0)).with_label(label),
            );
        }
        graph.insert_node(NodeId::new(QUERY_AGENT), LayerId::Agents, agent(42));
        graph.insert_node(NodeId::new(MATCH_AGENT), LayerId::Agents, agent(7));
        graph.insert_parent(NodeId::new(201), NodeId::new(MATCH_AGENT));

        let mut config = config();
        config.use_pairwise_registration = false;
        let solver = LayerSolver::new(LayerId::Places, config, RecordCounter::new());

        let solution = solver.solve(&graph, &input(), NodeId::new(QUERY_AGENT));
        assert!(solution.valid);
        assert_relative_eq!(
            solution.to_t_from.translation,
            Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_records_written_when_enabled() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.log_registration_problem = true;
        config.registration_output_path = dir.path().to_path_buf();
        let solver = LayerSolver::new(LayerId::Places, config, RecordCounter::new());

        let solution = solver.solve(&graph(), &input(), NodeId::new(QUERY_AGENT));

        assert!(solution.valid);
        let record = dir.path().join("places_registration_0.txt");
        let text = fs::read_to_string(record).unwrap();
        assert!(text.contains("solution_valid: true"));
        assert!(text.contains("num_inliers: 4"));
    }

    #[test]
    fn test_failed_record_keeps_valid_solution() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.log_registration_problem = true;
        config.registration_output_path = dir.path().join("missing");
        let solver = LayerSolver::new(LayerId::Places, config, RecordCounter::new());

        let solution = solver.solve(&graph(), &input(), NodeId::new(QUERY_AGENT));

        assert!(solution.valid);
        assert_eq!(solver.logger().unwrap().counter().issued(), 1);
    }

    #[test]
    fn test_mirror_symmetric_layout() {
        // origin plus unit axes: every axis permutation preserves distances
        let axes = [
            Vector3::zeros(),
            Vector3::x(),
            Vector3::y(),
            Vector3::z(),
        ];
        let mut graph = SceneGraph::new();
        for (i, p) in axes.iter().enumerate() {
            let i = i as u64;
            graph.insert_node(NodeId::new(101 + i), LayerId::Places, PlaceAttributes::new(*p));
            graph.insert_node(
                NodeId::new(201 + i),
                LayerId::Places,
                PlaceAttributes::new(p + Vector3::new(1.0, 0.0, 0.0)),
            );
        }
        graph.insert_node(NodeId::new(QUERY_AGENT), LayerId::Agents, agent(42));
        graph.insert_node(NodeId::new(MATCH_AGENT), LayerId::Agents, agent(7));
        graph.insert_parent(NodeId::new(201), NodeId::new(MATCH_AGENT));

        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.log_registration_problem = true;
        config.registration_output_path = dir.path().to_path_buf();
        let solver = LayerSolver::new(LayerId::Places, config, RecordCounter::new());

        let solution = solver.solve(&graph, &input(), NodeId::new(QUERY_AGENT));

        assert!(solution.valid);
        assert_relative_eq!(
            solution.to_t_from.translation,
            Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-6
        );
        assert_relative_eq!(solution.to_t_from.rotation_angle(), 0.0, epsilon = 1e-6);
        let text = fs::read_to_string(dir.path().join("places_registration_0.txt")).unwrap();
        assert!(text.contains("num_inliers: 4"));
    }

    #[test]
    fn test_solvers_sharing_a_counter_never_clobber_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.log_registration_problem = true;
        config.registration_output_path = dir.path().to_path_buf();
        let records = RecordCounter::new();
        let first = LayerSolver::new(LayerId::Places, config.clone(), records.clone());
        let second = LayerSolver::new(LayerId::Places, config, records.clone());

        assert!(first.solve(&graph(), &input(), NodeId::new(QUERY_AGENT)).valid);
        assert!(second.solve(&graph(), &input(), NodeId::new(QUERY_AGENT)).valid);

        assert_eq!(records.issued(), 2);
        assert!(dir.path().join("places_registration_0.txt").exists());
        assert!(dir.path().join("places_registration_1.txt").exists());
    }

    #[test]
    fn test_solvers_with_separate_counters_skip_existing_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = config();
        config.log_registration_problem = true;
        config.registration_output_path = dir.path().to_path_buf();
        let first = LayerSolver::new(LayerId::Places, config.clone(), RecordCounter::new());
        let second = LayerSolver::new(LayerId::Places, config, RecordCounter::new());

        first.solve(&graph(), &input(), NodeId::new(QUERY_AGENT));
        second.solve(&graph(), &input(), NodeId::new(QUERY_AGENT));

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
        assert_eq!(second.logger().unwrap().counter().issued(), 2);
    }

    #[test]
    fn test_timer_named_after_layer() {
        let timings = Arc::new(TimingLog::new());
        let solver = LayerSolver::new(LayerId::Places, config(), RecordCounter::new())
            .with_timing_log(timings.clone());
        assert_eq!(solver.timer_name(), "lcd/places_registration");

        solver.solve(&graph(), &input(), NodeId::new(QUERY_AGENT));

        let records = timings.records_named("lcd/places_registration");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp_ns, 42);
    }

    /// Accessor that hides every layer.
    struct LayerlessGraph(SceneGraph);

    impl GraphAccessor for LayerlessGraph {
        fn node(&self, id: NodeId) -> Option<&SceneGraphNode> {
            self.0.node(id)
        }

        fn has_layer(&self, _layer: LayerId) -> bool {
            false
        }

        fn layer_nodes(&self, _layer: LayerId) -> Vec<NodeId> {
            Vec::new()
        }

        fn edge(&self, source: NodeId, target: NodeId) -> Option<&SceneGraphEdge> {
            self.0.edge(source, target)
        }
    }

    #[test]
    fn test_missing_layer_is_invalid() {
        let solver = LayerSolver::new(LayerId::Places, config(), RecordCounter::new());
        let solution = solver.solve(&LayerlessGraph(graph()), &input(), NodeId::new(QUERY_AGENT));
        assert!(!solution.valid);
    }
}
