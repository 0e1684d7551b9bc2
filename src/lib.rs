pub mod config;
pub mod geometry;
pub mod io;
pub mod loop_closing;
pub mod scene_graph;
pub mod timing;
