//! Loop-closure registration over the scene graph.
//!
//! Given a loop-closure candidate (a recent query segment and a historical
//! match segment of the trajectory), estimate the rigid transform between
//! the two keyframes that anchor them.
//!
//! # Architecture
//!
//! 1. **Layer solver** (`layer_solver.rs`): correspondence-free robust
//!    registration of two node sets from one layer (`registration.rs`),
//!    lifted to a keyframe pose by `composition.rs`
//! 2. **Agent solver** (`agent_solver.rs`): delegates keyframe-to-keyframe
//!    registration to an external service (`service.rs`)
//! 3. **Diagnostics** (`diagnostics.rs`): optional numbered record per attempt
//! 4. **Dispatch** (`solver.rs`): one [`RegistrationSolver`] per layer
//!
//! Solvers are stateless between attempts apart from the diagnostic counter,
//! so one registry can serve concurrent callers.

pub mod agent_solver;
pub mod composition;
pub mod diagnostics;
pub mod error;
pub mod layer_solver;
pub mod registration;
pub mod service;
pub mod solver;
pub mod types;

pub use agent_solver::AgentSolver;
pub use composition::{compose_relative_pose, full_solution_from_layer, get_agent_pose, get_query_pose};
pub use diagnostics::{DiagnosticsError, RecordCounter, RegistrationLogger};
pub use error::RegistrationError;
pub use layer_solver::LayerSolver;
pub use registration::{
    Correspondence, EstimatorError, RobustEstimate, RobustSolver, register_dsg_layer_pairwise,
    register_dsg_layer_semantic,
};
pub use service::{
    ChannelRegistrationService, FrameRegistrationRequest, FrameRegistrationResponse,
    FrameRegistrationService, RegistrationHandler, ServiceError,
};
pub use solver::{RegistrationSolver, SolverRegistry};
pub use types::{
    AgentNodePose, LayerRegistrationProblem, LayerRegistrationSolution, RegistrationInput,
    RegistrationSolution,
};
