//! File input: scene graphs and loop-closure candidates.

pub mod graph_file;

pub use graph_file::{Candidate, GraphFile};
