//! Correspondence-free robust registration of two node sets.
//!
//! Node positions carry no index correspondence, so every plausible
//! (source, destination) pairing is put forward as a candidate and the
//! estimator decides which of them are real:
//!
//! 1. **Candidates**: all-to-all pairs (pairwise mode) or pairs sharing a
//!    semantic label (semantic mode)
//! 2. **Consistency graph**: two candidates are consistent when they map
//!    distinct nodes and preserve pairwise distance within `2 * noise_bound`
//! 3. **Maximum cliques**: the largest mutually consistent candidate sets.
//!    Distances are mirror invariant, so several may tie
//! 4. **Alignment**: closed-form rigid fit on each tied clique, then inlier
//!    classification and bound checks. Most inliers wins, then smallest
//!    rotation, then smallest translation
//!
//! Every step is deterministic: candidates are generated in sorted node
//! order and exact ties keep the first clique found.

use nalgebra::Vector3;
use thiserror::Error;
use tracing::debug;

use crate::config::{LayerRegistrationConfig, RobustSolverParams};
use crate::geometry::{SE3, align_rigid, alignment_rmse};
use crate::scene_graph::{GraphAccessor, LayerId, NodeId};

use super::types::{LayerRegistrationProblem, LayerRegistrationSolution};

/// Fewest correspondences that pin down a rotation.
const MIN_ALIGNMENT_POINTS: usize = 3;

/// Upper bound on equally sized cliques kept for fitting.
const MAX_TIED_CLIQUES: usize = 64;

/// Angles (rad) and translations (m) closer than this count as equal.
const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    #[error("{found} candidate correspondences, need at least {required}")]
    TooFewCorrespondences { found: usize, required: usize },

    #[error("{found} consistent correspondences, need at least {required}")]
    TooFewInliers { found: usize, required: usize },

    #[error("closed-form alignment failed")]
    AlignmentFailed,

    #[error("rotation of {angle:.3} rad exceeds bound {max:.3}")]
    RotationOutOfBounds { angle: f64, max: f64 },

    #[error("translation of {norm:.3} m exceeds bound {max:.3}")]
    TranslationOutOfBounds { norm: f64, max: f64 },

    #[error("estimator produced no solution")]
    NoSolution,

    #[error("solution has an empty inlier set")]
    EmptyInlierSet,
}

/// A candidate pairing of a source node with a destination node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub src: NodeId,
    pub dest: NodeId,
    pub src_point: Vector3<f64>,
    pub dest_point: Vector3<f64>,
}

/// Result of a successful robust solve.
#[derive(Debug, Clone)]
pub struct RobustEstimate {
    pub dest_t_src: SE3,
    /// Indices of inlier correspondences.
    pub inliers: Vec<usize>,
    /// Root-mean-square residual over the inliers (m).
    pub rmse: f64,
}

/// Outlier-tolerant rigid registration over candidate correspondences.
#[derive(Debug, Clone)]
pub struct RobustSolver {
    params: RobustSolverParams,
}

impl RobustSolver {
    pub fn new(params: RobustSolverParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RobustSolverParams {
        &self.params
    }

    /// Estimate `dest_T_src` from candidate correspondences, most of which
    /// may be wrong.
    ///
    /// Symmetric layouts produce several maximum cliques, some of them
    /// mirror images that no proper rotation fits. Every tied clique is
    /// fitted and the preferred fit wins: most inliers, then smallest
    /// rotation angle, then smallest translation.
    pub fn solve(&self, correspondences: &[Correspondence]) -> Result<RobustEstimate, EstimatorError> {
        let required = self.params.min_inliers.max(MIN_ALIGNMENT_POINTS);
        if correspondences.len() < required {
            return Err(EstimatorError::TooFewCorrespondences {
                found: correspondences.len(),
                required,
            });
        }

        let adjacency = consistency_graph(correspondences, 2.0 * self.params.noise_bound);
        let cliques = max_cliques(&adjacency, MAX_TIED_CLIQUES);
        let clique_size = cliques.first().map_or(0, Vec::len);
        debug!(
            "Max clique: {} of {} candidate correspondences ({} tied)",
            clique_size,
            correspondences.len(),
            cliques.len()
        );

        if clique_size < required {
            return Err(EstimatorError::TooFewInliers {
                found: clique_size,
                required,
            });
        }

        let mut best: Option<RobustEstimate> = None;
        let mut first_error = None;
        for clique in &cliques {
            match self.fit_clique(correspondences, clique, required) {
                Ok(estimate) => {
                    if best.as_ref().map_or(true, |b| preferred(&estimate, b)) {
                        best = Some(estimate);
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        best.ok_or_else(|| first_error.unwrap_or(EstimatorError::NoSolution))
    }

    /// Fit one clique, classify inliers and apply the search bounds.
    fn fit_clique(
        &self,
        correspondences: &[Correspondence],
        clique: &[usize],
        required: usize,
    ) -> Result<RobustEstimate, EstimatorError> {
        let dest_t_src = fit(correspondences, clique).ok_or(EstimatorError::AlignmentFailed)?;

        let threshold = self.params.inlier_factor * self.params.noise_bound;
        let inliers: Vec<usize> = clique
            .iter()
            .copied()
            .filter(|&i| {
                let c = &correspondences[i];
                (dest_t_src.transform_point(&c.src_point) - c.dest_point).norm() <= threshold
            })
            .collect();

        if inliers.is_empty() {
            return Err(EstimatorError::EmptyInlierSet);
        }
        if inliers.len() < required {
            return Err(EstimatorError::TooFewInliers {
                found: inliers.len(),
                required,
            });
        }

        // Refit without the clique members that failed the residual test
        let dest_t_src = if inliers.len() < clique.len() {
            fit(correspondences, &inliers).ok_or(EstimatorError::AlignmentFailed)?
        } else {
            dest_t_src
        };

        let angle = dest_t_src.rotation_angle();
        if angle > self.params.max_rotation_rad {
            return Err(EstimatorError::RotationOutOfBounds {
                angle,
                max: self.params.max_rotation_rad,
            });
        }

        let norm = dest_t_src.translation.norm();
        if norm > self.params.max_translation {
            return Err(EstimatorError::TranslationOutOfBounds {
                norm,
                max: self.params.max_translation,
            });
        }

        let (src, dst) = split_points(correspondences, &inliers);
        let rmse = alignment_rmse(&dest_t_src, &src, &dst);

        Ok(RobustEstimate {
            dest_t_src,
            inliers,
            rmse,
        })
    }
}

/// Whether `a` beats `b`. Exact ties keep the earlier estimate.
fn preferred(a: &RobustEstimate, b: &RobustEstimate) -> bool {
    if a.inliers.len() != b.inliers.len() {
        return a.inliers.len() > b.inliers.len();
    }

    let (angle_a, angle_b) = (a.dest_t_src.rotation_angle(), b.dest_t_src.rotation_angle());
    if (angle_a - angle_b).abs() > TIE_TOLERANCE {
        return angle_a < angle_b;
    }

    a.dest_t_src.translation.norm() < b.dest_t_src.translation.norm() - TIE_TOLERANCE
}

/// Register two node sets by pairing every source with every destination.
pub fn register_dsg_layer_pairwise(
    config: &LayerRegistrationConfig,
    solver: &RobustSolver,
    problem: &LayerRegistrationProblem,
    graph: &dyn GraphAccessor,
    layer: LayerId,
) -> LayerRegistrationSolution {
    let correspondences =
        pairwise_correspondences(graph, layer, problem, config.max_correspondences);
    solve_correspondences(solver, &correspondences)
}

/// Register two node sets, pairing only nodes with the same semantic label.
pub fn register_dsg_layer_semantic(
    config: &LayerRegistrationConfig,
    solver: &RobustSolver,
    problem: &LayerRegistrationProblem,
    graph: &dyn GraphAccessor,
    layer: LayerId,
) -> LayerRegistrationSolution {
    let correspondences =
        semantic_correspondences(graph, layer, problem, config.max_correspondences);
    solve_correspondences(solver, &correspondences)
}

/// All-to-all candidates, capped at `max_correspondences`.
pub fn pairwise_correspondences(
    graph: &dyn GraphAccessor,
    layer: LayerId,
    problem: &LayerRegistrationProblem,
    max_correspondences: usize,
) -> Vec<Correspondence> {
    build_correspondences(graph, layer, problem, max_correspondences, |_, _| true)
}

/// Candidates between nodes sharing a semantic label. Unlabeled nodes never pair.
pub fn semantic_correspondences(
    graph: &dyn GraphAccessor,
    layer: LayerId,
    problem: &LayerRegistrationProblem,
    max_correspondences: usize,
) -> Vec<Correspondence> {
    build_correspondences(graph, layer, problem, max_correspondences, |src, dest| {
        src.is_some() && src == dest
    })
}

fn build_correspondences(
    graph: &dyn GraphAccessor,
    layer: LayerId,
    problem: &LayerRegistrationProblem,
    max_correspondences: usize,
    compatible: impl Fn(Option<u32>, Option<u32>) -> bool,
) -> Vec<Correspondence> {
    let src_nodes = layer_points(graph, layer, problem.src_nodes.iter().copied());
    let dest_nodes = layer_points(graph, layer, problem.dest_nodes.iter().copied());

    // Spread the budget over source nodes so late sources are not starved:
    // each gets `max / n`, and the first `max % n` get one extra.
    let n = src_nodes.len();
    let mut capped = false;
    let mut correspondences = Vec::new();
    for (i, (src, src_point, src_label)) in src_nodes.iter().enumerate() {
        let limit = max_correspondences / n + usize::from(i < max_correspondences % n);
        let mut taken = 0;
        for (dest, dest_point, dest_label) in &dest_nodes {
            if !compatible(*src_label, *dest_label) {
                continue;
            }
            if taken == limit {
                capped = true;
                break;
            }
            correspondences.push(Correspondence {
                src: *src,
                dest: *dest,
                src_point: *src_point,
                dest_point: *dest_point,
            });
            taken += 1;
        }
    }

    if capped {
        debug!(
            "Capped correspondences at {} ({} x {} nodes)",
            max_correspondences,
            src_nodes.len(),
            dest_nodes.len()
        );
    }
    correspondences
}

/// Position and label of every requested node that lives in `layer`.
fn layer_points(
    graph: &dyn GraphAccessor,
    layer: LayerId,
    ids: impl Iterator<Item = NodeId>,
) -> Vec<(NodeId, Vector3<f64>, Option<u32>)> {
    ids.filter_map(|id| match graph.node(id) {
        Some(node) if node.layer == layer => Some((
            id,
            node.attributes.position(),
            node.attributes.semantic_label(),
        )),
        _ => {
            debug!("Node {} not found in layer {}", id.symbol(), layer);
            None
        }
    })
    .collect()
}

fn solve_correspondences(
    solver: &RobustSolver,
    correspondences: &[Correspondence],
) -> LayerRegistrationSolution {
    match solver.solve(correspondences) {
        Ok(estimate) => {
            debug!(
                "Layer registration: {} inliers, rmse {:.4} m",
                estimate.inliers.len(),
                estimate.rmse
            );
            LayerRegistrationSolution {
                valid: true,
                dest_t_src: estimate.dest_t_src,
                inliers: estimate
                    .inliers
                    .iter()
                    .map(|&i| (correspondences[i].src, correspondences[i].dest))
                    .collect(),
            }
        }
        Err(e) => {
            debug!("Layer registration rejected: {}", e);
            LayerRegistrationSolution::invalid()
        }
    }
}

fn split_points(
    correspondences: &[Correspondence],
    indices: &[usize],
) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
    indices
        .iter()
        .map(|&i| (correspondences[i].src_point, correspondences[i].dest_point))
        .unzip()
}

fn fit(correspondences: &[Correspondence], indices: &[usize]) -> Option<SE3> {
    let (src, dst) = split_points(correspondences, indices);
    align_rigid(&src, &dst)
}

/// Dense adjacency: `adjacency[i][j]` when candidates i and j can both be true.
fn consistency_graph(correspondences: &[Correspondence], tolerance: f64) -> Vec<Vec<bool>> {
    let n = correspondences.len();
    let mut adjacency = vec![vec![false; n]; n];

    for i in 0..n {
        let a = &correspondences[i];
        for j in (i + 1)..n {
            let b = &correspondences[j];
            if a.src == b.src || a.dest == b.dest {
                continue;
            }
            let src_dist = (a.src_point - b.src_point).norm();
            let dest_dist = (a.dest_point - b.dest_point).norm();
            if (src_dist - dest_dist).abs() <= tolerance {
                adjacency[i][j] = true;
                adjacency[j][i] = true;
            }
        }
    }
    adjacency
}

/// Every maximum clique, up to `limit` of them (Bron–Kerbosch with
/// pivoting and size pruning).
///
/// Each clique is sorted, and cliques are returned in discovery order.
fn max_cliques(adjacency: &[Vec<bool>], limit: usize) -> Vec<Vec<usize>> {
    let mut search = CliqueSearch {
        adjacency,
        limit,
        size: 0,
        found: Vec::new(),
    };
    let candidates: Vec<usize> = (0..adjacency.len()).collect();
    search.expand(&mut Vec::new(), candidates, Vec::new());
    search.found
}

struct CliqueSearch<'a> {
    adjacency: &'a [Vec<bool>],
    limit: usize,
    /// Size of the largest clique seen so far.
    size: usize,
    found: Vec<Vec<usize>>,
}

impl CliqueSearch<'_> {
    fn record(&mut self, clique: &[usize]) {
        if clique.len() > self.size {
            self.size = clique.len();
            self.found.clear();
        }
        if self.found.len() < self.limit {
            let mut clique = clique.to_vec();
            clique.sort_unstable();
            self.found.push(clique);
        }
    }

    fn expand(&mut self, current: &mut Vec<usize>, mut candidates: Vec<usize>, mut excluded: Vec<usize>) {
        let adjacency = self.adjacency;
        if candidates.is_empty() {
            if excluded.is_empty() && !current.is_empty() && current.len() >= self.size {
                self.record(current);
            }
            return;
        }
        // Ties are kept, so only strictly smaller branches are cut
        if current.len() + candidates.len() < self.size {
            return;
        }

        // Pivot on the vertex covering the most candidates
        let pivot = candidates
            .iter()
            .chain(excluded.iter())
            .copied()
            .max_by_key(|&u| candidates.iter().filter(|&&v| adjacency[u][v]).count())
            .unwrap_or(candidates[0]);

        let branches: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&v| !adjacency[pivot][v])
            .collect();

        for v in branches {
            current.push(v);
            let next_candidates = candidates.iter().copied().filter(|&u| adjacency[v][u]).collect();
            let next_excluded = excluded.iter().copied().filter(|&u| adjacency[v][u]).collect();
            self.expand(current, next_candidates, next_excluded);
            current.pop();

            candidates.retain(|&u| u != v);
            excluded.push(v);
            if current.len() + candidates.len() < self.size {
                return;
            }
        }
    }
}
