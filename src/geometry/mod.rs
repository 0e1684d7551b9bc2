//! Geometry utilities: SE3 transforms, closed-form rigid alignment.

pub mod alignment;
pub mod se3;

pub use alignment::{align_rigid, alignment_rmse, centroid};
pub use se3::SE3;
