//! Closed-form rigid alignment of corresponding point sets.
//!
//! Finds the rigid transform T minimizing sum ||T * src_i - dst_i||².

use nalgebra::{Matrix3, Vector3};

use super::SE3;

/// Below this cross-covariance magnitude the rotation is unobservable.
const DEGENERATE_COVARIANCE: f64 = 1e-12;

/// Compute the rigid transform mapping `src` onto `dst` (Horn/Arun via SVD).
///
/// Algorithm:
/// 1. Compute centroids of both point sets
/// 2. Center the points
/// 3. Compute rotation via SVD of cross-covariance matrix
/// 4. Compute translation: t = c_dst - R * c_src
///
/// Returns `None` if fewer than 3 points are given, the slices differ in
/// length, or the configuration is degenerate (e.g. all points coincident).
pub fn align_rigid(src: &[Vector3<f64>], dst: &[Vector3<f64>]) -> Option<SE3> {
    let n = src.len();
    if n < 3 || n != dst.len() {
        return None;
    }

    let centroid_src = centroid(src);
    let centroid_dst = centroid(dst);

    // Cross-covariance matrix: H = sum(src_i * dst_i^T)
    let mut h = Matrix3::zeros();
    for (p, q) in src.iter().zip(dst.iter()) {
        h += (p - centroid_src) * (q - centroid_dst).transpose();
    }

    if h.norm() < DEGENERATE_COVARIANCE {
        return None;
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    // R = V * U^T
    let mut rotation = v_t.transpose() * u.transpose();

    // Handle reflection case (det(R) = -1)
    if rotation.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation = v * u.transpose();
    }

    let pose = SE3::from_rt(rotation, Vector3::zeros());
    let translation = centroid_dst - pose.rotation * centroid_src;

    Some(SE3::new(pose.rotation, translation))
}

/// Centroid of a set of 3D points.
pub fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}

/// Root-mean-square residual of `transform` applied to `src` against `dst`.
pub fn alignment_rmse(transform: &SE3, src: &[Vector3<f64>], dst: &[Vector3<f64>]) -> f64 {
    if src.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = src
        .iter()
        .zip(dst.iter())
        .map(|(p, q)| (transform.transform_point(p) - q).norm_squared())
        .sum();
    (sum_sq / src.len() as f64).sqrt()
}
