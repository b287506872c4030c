//! Directional cone filter.
//!
//! Tactile depth sensors return unreliable points near grazing viewing
//! angles.  [`ConeFilter`] keeps only points inside a cone around the
//! sensor's optical (+Z) axis, bounded by four half-spaces through the
//! sensor origin.
//!
//! Each half-space normal is derived from an angular offset about a
//! reference axis: the +Z view vector is rotated by the offset, then by a
//! further 90° about the same axis (towards the cone interior).  A point
//! survives iff its position has a non-negative dot product with every
//! normal.

use imprint_types::PointCloud;
use nalgebra::{Point3, Rotation3, Unit, Vector3};

/// Default angular offsets in degrees, applied about `[y, y, x, x]`.
pub const DEFAULT_ANGLES_DEG: [f64; 4] = [10.0, -25.0, 20.0, -20.0];

/// Reference axes for the four offsets.
fn offset_axes() -> [Unit<Vector3<f64>>; 4] {
    [
        Vector3::y_axis(),
        Vector3::y_axis(),
        Vector3::x_axis(),
        Vector3::x_axis(),
    ]
}

/// Sign with `sign(0) = 0`, unlike [`f64::signum`].
fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// A deterministic, order-preserving half-space filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConeFilter {
    normals: [Vector3<f64>; 4],
}

impl Default for ConeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_ANGLES_DEG)
    }
}

impl ConeFilter {
    /// Build the filter from four offsets in degrees (about y, y, x, x).
    pub fn new(angles_deg: [f64; 4]) -> Self {
        let view = Vector3::z();
        let axes = offset_axes();
        let normals = std::array::from_fn(|i| {
            let angle = angles_deg[i].to_radians();
            let tilted = Rotation3::from_axis_angle(&axes[i], angle) * view;
            let quarter = -std::f64::consts::FRAC_PI_2 * sign(angle);
            Rotation3::from_axis_angle(&axes[i], quarter) * tilted
        });
        Self { normals }
    }

    pub fn normals(&self) -> &[Vector3<f64>; 4] {
        &self.normals
    }

    /// True when `p` lies on the inner side of every half-space.
    pub fn accepts(&self, p: &Point3<f64>) -> bool {
        self.normals.iter().all(|n| p.coords.dot(n) >= 0.0)
    }

    /// Keep the accepted points, in their original order.
    pub fn apply(&self, cloud: &PointCloud) -> PointCloud {
        cloud
            .iter()
            .filter(|p| self.accepts(&p.position))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imprint_types::Point;

    #[test]
    fn default_cone_bounds() {
        let f = ConeFilter::default();
        // x ∈ [-z·tan25°, z·tan10°], y ∈ [-z·tan20°, z·tan20°]
        assert!(f.accepts(&Point3::new(0.0, 0.0, 1.0)));
        assert!(f.accepts(&Point3::new(0.17, 0.0, 1.0)));
        assert!(!f.accepts(&Point3::new(0.18, 0.0, 1.0)));
        assert!(f.accepts(&Point3::new(-0.46, 0.0, 1.0)));
        assert!(!f.accepts(&Point3::new(-0.47, 0.0, 1.0)));
        assert!(f.accepts(&Point3::new(0.0, 0.36, 1.0)));
        assert!(!f.accepts(&Point3::new(0.0, 0.37, 1.0)));
        assert!(!f.accepts(&Point3::new(0.0, -0.37, 1.0)));
    }

    #[test]
    fn points_behind_the_sensor_are_rejected() {
        let f = ConeFilter::default();
        assert!(!f.accepts(&Point3::new(0.0, 0.0, -1.0)));
        assert!(f.accepts(&Point3::origin()));
    }

    #[test]
    fn zero_offset_keeps_the_view_vector_as_normal() {
        let f = ConeFilter::new([0.0, -25.0, 20.0, -20.0]);
        assert!((f.normals()[0] - Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn apply_preserves_order_and_is_idempotent() {
        let cloud = PointCloud::new(vec![
            Point::new(0.0, 0.0, 0.1).with_payload([1.0, 0.0, 0.0]),
            Point::new(0.5, 0.0, 0.1),
            Point::new(-0.01, 0.01, 0.1).with_payload([2.0, 0.0, 0.0]),
            Point::new(0.0, 0.0, -0.1),
            Point::new(0.01, -0.02, 0.1).with_payload([3.0, 0.0, 0.0]),
        ]);
        let f = ConeFilter::default();
        let once = f.apply(&cloud);
        let payloads: Vec<f64> = once.iter().map(|p| p.payload[0]).collect();
        assert_eq!(payloads, vec![1.0, 2.0, 3.0]);
        assert_eq!(f.apply(&once), once);
    }
}
