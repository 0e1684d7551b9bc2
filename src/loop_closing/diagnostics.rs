//! Per-attempt diagnostic records for offline inspection.
//!
//! Each registration attempt can be dumped to `<prefix><index>.txt` as flat
//! `key: value` lines. Records are for operators, not for re-parsing.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::Vector3;
use thiserror::Error;

use crate::geometry::SE3;
use crate::scene_graph::{GraphAccessor, NodeId};

use super::composition::get_agent_pose;
use super::types::{LayerRegistrationSolution, RegistrationInput};

const RECORD_EXTENSION: &str = "txt";

/// Indices skipped over because a record already exists, before giving up.
const MAX_EXISTING_SKIPS: usize = 10_000;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("failed to write registration record {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Record index source shared by every logger of a registry.
///
/// Indices start at zero when the counter is created and are never handed
/// out twice.
#[derive(Debug, Clone, Default)]
pub struct RecordCounter(Arc<AtomicUsize>);

impl RecordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next index.
    pub fn reserve(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// Number of indices handed out so far (including failed writes).
    pub fn issued(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Writes numbered registration records.
///
/// The record index is reserved before the file is opened, so concurrent
/// attempts never collide and a failed write never frees its number for
/// reuse. Files are created exclusively: an index whose record already
/// exists on disk is skipped, never overwritten.
#[derive(Debug)]
pub struct RegistrationLogger {
    path_prefix: String,
    counter: RecordCounter,
}

impl RegistrationLogger {
    pub fn new(path_prefix: impl Into<String>, counter: RecordCounter) -> Self {
        Self {
            path_prefix: path_prefix.into(),
            counter,
        }
    }

    /// Logger writing `<dir>/<name>_<index>.txt`.
    pub fn in_directory(dir: &Path, name: &str, counter: RecordCounter) -> Self {
        Self::new(format!("{}/{}_", dir.display(), name), counter)
    }

    pub fn counter(&self) -> &RecordCounter {
        &self.counter
    }

    pub fn record_path(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}{}.{}", self.path_prefix, index, RECORD_EXTENSION))
    }

    /// Write one record. Returns the path written.
    pub fn log(
        &self,
        graph: &dyn GraphAccessor,
        solution: &LayerRegistrationSolution,
        input: &RegistrationInput,
        query_agent_id: NodeId,
    ) -> Result<PathBuf, DiagnosticsError> {
        let mut skipped = 0;
        loop {
            let path = self.record_path(self.counter.reserve());
            let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && skipped < MAX_EXISTING_SKIPS => {
                    skipped += 1;
                    continue;
                }
                Err(source) => return Err(DiagnosticsError::Io { path, source }),
            };

            return match write_record(file, graph, solution, input, query_agent_id) {
                Ok(()) => Ok(path),
                Err(source) => Err(DiagnosticsError::Io { path, source }),
            };
        }
    }
}

fn write_record(
    file: File,
    graph: &dyn GraphAccessor,
    solution: &LayerRegistrationSolution,
    input: &RegistrationInput,
    query_agent_id: NodeId,
) -> io::Result<()> {
    let mut out = BufWriter::new(file);

    writeln!(out, "query_id: {}", query_agent_id.symbol())?;
    writeln!(out, "query_set: {}", display_node_set(&input.query_nodes))?;
    writeln!(out, "match_set: {}", display_node_set(&input.match_nodes))?;

    let match_pose = get_agent_pose(graph, input.match_root);
    let (match_id, world_t_match) = match &match_pose {
        Some(pose) => (pose.id.symbol().label(), pose.world_t_body),
        None => ("none".to_string(), SE3::identity()),
    };
    writeln!(out, "match_id: {}", match_id)?;
    writeln!(out, "world_q_match: {}", display_quaternion(&world_t_match))?;
    writeln!(out, "world_t_match: {}", display_vector(&world_t_match.translation))?;
    writeln!(out, "match_valid: {}", match_pose.is_some())?;

    writeln!(out, "solution_valid: {}", solution.valid)?;
    writeln!(out, "dest_q_src: {}", display_quaternion(&solution.dest_t_src))?;
    writeln!(out, "dest_t_src: {}", display_vector(&solution.dest_t_src.translation))?;
    writeln!(out, "num_inliers: {}", solution.inliers.len())?;
    for (src, dest) in &solution.inliers {
        writeln!(out, "inlier: {} -> {}", src.symbol(), dest.symbol())?;
    }

    for (key, nodes) in [("query_pos", &input.query_nodes), ("match_pos", &input.match_nodes)] {
        for id in nodes {
            if let Some(node) = graph.node(*id) {
                writeln!(
                    out,
                    "{}: {} {}",
                    key,
                    id.symbol(),
                    display_vector(&node.attributes.position())
                )?;
            }
        }
    }

    out.flush()
}

fn display_node_set(nodes: &BTreeSet<NodeId>) -> String {
    let labels: Vec<String> = nodes.iter().map(|id| id.symbol().label()).collect();
    format!("[{}]", labels.join(", "))
}

/// Quaternion as `[w, x, y, z]`.
fn display_quaternion(pose: &SE3) -> String {
    let q = pose.rotation.quaternion();
    format!("[{}, {}, {}, {}]", q.w, q.i, q.j, q.k)
}

fn display_vector(v: &Vector3<f64>) -> String {
    format!("[{}, {}, {}]", v.x, v.y, v.z)
}
