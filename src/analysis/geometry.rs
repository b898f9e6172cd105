//! Joint angle geometry.

use crate::landmarks::Landmark;

/// Vectors shorter than this are treated as zero-length.
const MIN_VECTOR_LENGTH: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("degenerate geometry: zero-length vector at the vertex")]
    DegenerateGeometry,
}

/// Angle at `vertex` between the rays to `a` and `c`, in degrees within [0, 180].
/// Uses the x and y components only.
pub fn joint_angle(a: &Landmark, vertex: &Landmark, c: &Landmark) -> Result<f64, GeometryError> {
    angle_between(
        &[a.x - vertex.x, a.y - vertex.y],
        &[c.x - vertex.x, c.y - vertex.y],
    )
}

/// Same as [`joint_angle`] but including depth.
pub fn joint_angle_3d(a: &Landmark, vertex: &Landmark, c: &Landmark) -> Result<f64, GeometryError> {
    angle_between(
        &[a.x - vertex.x, a.y - vertex.y, a.z - vertex.z],
        &[c.x - vertex.x, c.y - vertex.y, c.z - vertex.z],
    )
}

fn angle_between(v1: &[f64], v2: &[f64]) -> Result<f64, GeometryError> {
    let dot: f64 = v1.iter().zip(v2).map(|(a, b)| a * b).sum();
    let norm1 = v1.iter().map(|a| a * a).sum::<f64>().sqrt();
    let norm2 = v2.iter().map(|a| a * a).sum::<f64>().sqrt();

    let usable = |norm: f64| norm.is_finite() && norm >= MIN_VECTOR_LENGTH;
    if !usable(norm1) || !usable(norm2) {
        return Err(GeometryError::DegenerateGeometry);
    }

    let cosine = (dot / (norm1 * norm2)).clamp(-1.0, 1.0);
    Ok(cosine.acos().to_degrees())
}
