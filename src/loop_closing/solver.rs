//! Registration strategy seam and per-layer dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LcdConfig;
use crate::scene_graph::{GraphAccessor, LayerId, NodeId};
use crate::timing::TimingLog;

use super::agent_solver::AgentSolver;
use super::diagnostics::RecordCounter;
use super::layer_solver::LayerSolver;
use super::service::FrameRegistrationService;
use super::types::{RegistrationInput, RegistrationSolution};

/// A registration strategy.
///
/// Implementations never fail: every error is logged and reported as an
/// invalid solution.
pub trait RegistrationSolver: Send + Sync {
    fn solve(
        &self,
        graph: &dyn GraphAccessor,
        input: &RegistrationInput,
        query_agent_id: NodeId,
    ) -> RegistrationSolution;
}

/// Configured solvers keyed by the layer their candidates come from.
///
/// The registry owns the diagnostic record counter, so records from every
/// layer solver it builds share one index sequence.
#[derive(Default)]
pub struct SolverRegistry {
    solvers: BTreeMap<LayerId, Box<dyn RegistrationSolver>>,
    records: RecordCounter,
}

impl SolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a layer solver per configured layer, plus the agent solver when
    /// enabled and a service is provided.
    pub fn from_config(
        config: &LcdConfig,
        service: Option<Arc<dyn FrameRegistrationService>>,
        timings: Option<Arc<TimingLog>>,
    ) -> Self {
        let mut registry = Self::new();

        for (layer, layer_config) in &config.layers {
            let mut solver =
                LayerSolver::new(*layer, layer_config.clone(), registry.records.clone());
            if let Some(timings) = &timings {
                solver = solver.with_timing_log(timings.clone());
            }
            registry.insert(*layer, Box::new(solver));
        }

        match (config.agent.enabled, service) {
            (true, Some(service)) => {
                let mut solver = AgentSolver::new(service);
                if let Some(timings) = &timings {
                    solver = solver.with_timing_log(timings.clone());
                }
                registry.insert(LayerId::Agents, Box::new(solver));
            }
            (true, None) => warn!("Agent registration enabled but no frame registration service given"),
            (false, _) => {}
        }

        info!("Registration solvers: {:?}", registry.layers());
        registry
    }

    /// Register a solver, replacing any previous one for the layer.
    pub fn insert(&mut self, layer: LayerId, solver: Box<dyn RegistrationSolver>) {
        self.solvers.insert(layer, solver);
    }

    pub fn record_counter(&self) -> &RecordCounter {
        &self.records
    }

    pub fn get(&self, layer: LayerId) -> Option<&dyn RegistrationSolver> {
        self.solvers.get(&layer).map(|solver| solver.as_ref())
    }

    pub fn layers(&self) -> Vec<LayerId> {
        self.solvers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.solvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.solvers.is_empty()
    }

    /// Solve with the layer's solver. Invalid when no solver is configured.
    pub fn solve(
        &self,
        layer: LayerId,
        graph: &dyn GraphAccessor,
        input: &RegistrationInput,
        query_agent_id: NodeId,
    ) -> RegistrationSolution {
        match self.get(layer) {
            Some(solver) => solver.solve(graph, input, query_agent_id),
            None => {
                warn!("No registration solver for layer {}", layer);
                RegistrationSolution::invalid()
            }
        }
    }
}
