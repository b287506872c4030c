//! Transform Frame (TF) resolution.
//!
//! Resolves the rigid transform between two named reference frames and
//! applies it to point clouds.  Two providers share the [`TransformService`]
//! contract:
//!
//! - a live transform server (an external collaborator implementing the
//!   trait), and
//! - [`TransformBuffer`], an in-process graph of static transforms loaded
//!   from a table of `(parent, child, translation, quaternion)` rows.
//!
//! The buffer composes chains via BFS, walking stored edges in either
//! direction, so a lookup does not require the pair to be stored directly.
//!
//! # Example
//!
//! ```rust
//! use imprint_perception::transform::{TransformBuffer, TransformRow, TransformService};
//! use nalgebra::Point3;
//!
//! let buffer = TransformBuffer::from_rows(&[
//!     // robot_base is 1 m forward of world origin, same orientation.
//!     TransformRow::translation("world", "robot_base", [1.0, 0.0, 0.0]),
//!     // camera is 0.5 m forward of robot_base, same orientation.
//!     TransformRow::translation("robot_base", "camera", [0.5, 0.0, 0.0]),
//! ])
//! .unwrap();
//!
//! // A point at the camera origin sits 1.5 m forward in the world frame.
//! let t = buffer.lookup("camera", "world", None).unwrap();
//! let p = t * Point3::origin();
//! assert!((p.x - 1.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use imprint_types::{ImprintError, PointCloud, RigidTransform};
use nalgebra::{Quaternion, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// TransformService
// ────────────────────────────────────────────────────────────────────────────

/// Anything that can answer "how do I express points of `origin` in
/// `target`?".
///
/// `time` is a timestamp in seconds; `None` asks for the latest available
/// transform.  Implementations fail with [`ImprintError::TransformLookup`]
/// when the frames are unrelated.
pub trait TransformService: Send {
    fn lookup(
        &self,
        origin: &str,
        target: &str,
        time: Option<f64>,
    ) -> Result<RigidTransform, ImprintError>;
}

// ────────────────────────────────────────────────────────────────────────────
// TransformRow
// ────────────────────────────────────────────────────────────────────────────

/// One row of an offline transform table: the pose of `child_frame`
/// expressed in `parent_frame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformRow {
    pub parent_frame: String,
    pub child_frame: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
}

impl TransformRow {
    /// A pure translation row.
    pub fn translation(parent: &str, child: &str, t: [f64; 3]) -> Self {
        Self::new(parent, child, t, [0.0, 0.0, 0.0, 1.0])
    }

    /// A row from a translation and an `(x, y, z, w)` quaternion.
    pub fn new(parent: &str, child: &str, t: [f64; 3], q: [f64; 4]) -> Self {
        Self {
            parent_frame: parent.to_string(),
            child_frame: child.to_string(),
            x: t[0],
            y: t[1],
            z: t[2],
            qx: q[0],
            qy: q[1],
            qz: q[2],
            qw: q[3],
        }
    }

    /// The rigid transform mapping child-frame points into the parent frame.
    ///
    /// The quaternion is normalised; a (near) zero quaternion is rejected.
    pub fn to_isometry(&self) -> Result<RigidTransform, ImprintError> {
        let q = Quaternion::new(self.qw, self.qx, self.qy, self.qz);
        if q.norm() < 1e-9 {
            return Err(ImprintError::InvalidInput(format!(
                "zero rotation quaternion for {} -> {}",
                self.parent_frame, self.child_frame
            )));
        }
        Ok(RigidTransform::from_parts(
            Translation3::new(self.x, self.y, self.z),
            UnitQuaternion::from_quaternion(q),
        ))
    }
}

/// Read a JSON list of [`TransformRow`]s from disk.
pub fn load_rows_json(path: &Path) -> Result<Vec<TransformRow>, ImprintError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ImprintError::Io(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| {
        ImprintError::InvalidInput(format!("malformed transform table {}: {e}", path.display()))
    })
}

// ────────────────────────────────────────────────────────────────────────────
// TransformBuffer
// ────────────────────────────────────────────────────────────────────────────

/// An in-memory graph of static frame transforms.
///
/// Every inserted `parent → child` pose creates two edges: child-to-parent
/// (the pose itself) and parent-to-child (its inverse).  Time arguments are
/// accepted but ignored, as all stored transforms are static.
#[derive(Debug, Default, Clone)]
pub struct TransformBuffer {
    /// `edges[from][to]` maps points expressed in `from` into `to`.
    edges: HashMap<String, HashMap<String, RigidTransform>>,
}

impl TransformBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a buffer from an offline transform table.
    pub fn from_rows(rows: &[TransformRow]) -> Result<Self, ImprintError> {
        let mut buffer = Self::new();
        buffer.add_rows(rows)?;
        Ok(buffer)
    }

    /// Insert every row of a transform table.  Later rows override earlier
    /// ones for the same frame pair.
    pub fn add_rows(&mut self, rows: &[TransformRow]) -> Result<(), ImprintError> {
        for row in rows {
            let pose = row.to_isometry()?;
            self.set_transform(&row.parent_frame, &row.child_frame, pose);
        }
        Ok(())
    }

    /// Register or update the pose of `child_frame` in `parent_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, pose: RigidTransform) {
        self.edges
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), pose);
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), pose.inverse());
    }

    /// Number of distinct frames known to the buffer.
    pub fn frame_count(&self) -> usize {
        self.edges.len()
    }

    /// Compose the transform that maps `origin` points into `target`, or
    /// `None` when no chain of stored edges connects them.
    pub fn resolve(&self, origin: &str, target: &str) -> Option<RigidTransform> {
        if origin == target {
            return Some(RigidTransform::identity());
        }

        // Each queue item carries the transform accumulated from `origin`
        // to the current node.
        let mut queue: VecDeque<(&str, RigidTransform)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();

        queue.push_back((origin, RigidTransform::identity()));
        visited.insert(origin);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge_tf) in neighbours {
                if visited.contains(next.as_str()) {
                    continue;
                }
                let composed = edge_tf * accumulated;
                if next == target {
                    return Some(composed);
                }
                visited.insert(next.as_str());
                queue.push_back((next.as_str(), composed));
            }
        }

        None
    }
}

impl TransformService for TransformBuffer {
    fn lookup(
        &self,
        origin: &str,
        target: &str,
        _time: Option<f64>,
    ) -> Result<RigidTransform, ImprintError> {
        self.resolve(origin, target)
            .ok_or_else(|| ImprintError::TransformLookup {
                origin: origin.to_string(),
                target: target.to_string(),
            })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CoordinateTransformer
// ────────────────────────────────────────────────────────────────────────────

/// Moves point clouds between frames using a [`TransformService`].
pub struct CoordinateTransformer {
    service: Box<dyn TransformService>,
}

impl CoordinateTransformer {
    pub fn new(service: Box<dyn TransformService>) -> Self {
        Self { service }
    }

    /// Express `cloud` (given in `origin`) in `target`.
    ///
    /// Positions are rotated then translated; payloads pass through.
    pub fn transform(
        &self,
        cloud: &PointCloud,
        origin: &str,
        target: &str,
        time: Option<f64>,
    ) -> Result<PointCloud, ImprintError> {
        if origin == target {
            return Ok(cloud.clone());
        }
        let tf = self.service.lookup(origin, target, time)?;
        debug!(origin, target, points = cloud.len(), "transforming cloud");
        Ok(cloud.transformed(&tf))
    }
}

impl std::fmt::Debug for CoordinateTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinateTransformer").finish_non_exhaustive()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use imprint_types::Point;
    use nalgebra::{Point3, Vector3};
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2};

    fn yaw_90() -> [f64; 4] {
        [0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2]
    }

    // ── TransformRow ────────────────────────────────────────────────────────

    #[test]
    fn row_to_isometry_normalises_quaternion() {
        let row = TransformRow::new("a", "b", [0.0; 3], [0.0, 0.0, 2.0, 2.0]);
        let tf = row.to_isometry().unwrap();
        let p = tf * Point3::new(1.0, 0.0, 0.0);
        assert!(p.x.abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn row_with_zero_quaternion_is_rejected() {
        let row = TransformRow::new("a", "b", [0.0; 3], [0.0; 4]);
        assert!(matches!(row.to_isometry(), Err(ImprintError::InvalidInput(_))));
    }

    // ── TransformBuffer ─────────────────────────────────────────────────────

    #[test]
    fn lookup_same_frame_returns_identity() {
        let buffer = TransformBuffer::new();
        let t = buffer.lookup("world", "world", None).unwrap();
        assert_eq!(t, RigidTransform::identity());
    }

    #[test]
    fn lookup_direct_edge_maps_child_into_parent() {
        let buffer =
            TransformBuffer::from_rows(&[TransformRow::translation("world", "sensor", [1.0, 0.0, 0.0])])
                .unwrap();
        let p = buffer.lookup("sensor", "world", None).unwrap() * Point3::origin();
        assert!((p.x - 1.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_inverse_direction() {
        let buffer =
            TransformBuffer::from_rows(&[TransformRow::translation("world", "sensor", [1.0, 0.0, 0.0])])
                .unwrap();
        let p = buffer.lookup("world", "sensor", None).unwrap() * Point3::origin();
        assert!((p.x + 1.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_composed_chain_respects_rotation() {
        // robot_base sits at the world origin, rotated 90° around Z.
        // camera is 1 m forward in robot_base frame (local +X), so its
        // origin lands on world (0, 1, 0).
        let buffer = TransformBuffer::from_rows(&[
            TransformRow::new("world", "robot_base", [0.0; 3], yaw_90()),
            TransformRow::translation("robot_base", "camera", [1.0, 0.0, 0.0]),
        ])
        .unwrap();

        let p = buffer.lookup("camera", "world", None).unwrap() * Point3::origin();
        assert!(p.x.abs() < 1e-9, "x={}", p.x);
        assert!((p.y - 1.0).abs() < 1e-9, "y={}", p.y);
        assert!(p.z.abs() < 1e-9);
    }

    #[test]
    fn lookup_between_siblings_goes_through_parent() {
        let buffer = TransformBuffer::from_rows(&[
            TransformRow::translation("grasp_frame", "bubble_right", [0.0, 0.0, 0.02]),
            TransformRow::translation("grasp_frame", "bubble_left", [0.0, 0.0, -0.02]),
        ])
        .unwrap();
        let p = buffer.lookup("bubble_right", "bubble_left", None).unwrap() * Point3::origin();
        assert!((p.z - 0.04).abs() < 1e-9);
    }

    #[test]
    fn lookup_no_path_is_a_lookup_error() {
        let buffer =
            TransformBuffer::from_rows(&[TransformRow::translation("world", "robot_base", [1.0, 0.0, 0.0])])
                .unwrap();
        let err = buffer.lookup("world", "ghost_frame", None).unwrap_err();
        assert_eq!(
            err,
            ImprintError::TransformLookup {
                origin: "world".to_string(),
                target: "ghost_frame".to_string()
            }
        );
    }

    #[test]
    fn later_rows_override_earlier_ones() {
        let buffer = TransformBuffer::from_rows(&[
            TransformRow::translation("world", "sensor", [1.0, 0.0, 0.0]),
            TransformRow::translation("world", "sensor", [5.0, 0.0, 0.0]),
        ])
        .unwrap();
        assert_eq!(buffer.frame_count(), 2);
        let p = buffer.lookup("sensor", "world", None).unwrap() * Point3::origin();
        assert!((p.x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn load_rows_json_reads_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tfs.json");
        let rows = vec![TransformRow::new("world", "cam", [0.1, 0.2, 0.3], yaw_90())];
        std::fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();

        let loaded = load_rows_json(&path).unwrap();
        assert_eq!(loaded, rows);
    }

    #[test]
    fn load_rows_json_missing_file_is_io_error() {
        let err = load_rows_json(Path::new("/nonexistent/tfs.json")).unwrap_err();
        assert!(matches!(err, ImprintError::Io(_)));
    }

    // ── CoordinateTransformer ───────────────────────────────────────────────

    #[test]
    fn transform_moves_positions_and_keeps_payload() {
        let mut buffer = TransformBuffer::new();
        buffer.set_transform(
            "grasp_frame",
            "sensor",
            RigidTransform::new(Vector3::new(0.0, 0.0, 1.0), Vector3::z() * FRAC_PI_2),
        );
        let transformer = CoordinateTransformer::new(Box::new(buffer));
        let cloud = PointCloud::new(vec![Point::new(1.0, 0.0, 0.0).with_payload([1.0, 2.0, 3.0])]);

        let out = transformer
            .transform(&cloud, "sensor", "grasp_frame", Some(12.5))
            .unwrap();
        let p = out.points[0];
        assert!(p.position.x.abs() < 1e-9);
        assert!((p.position.y - 1.0).abs() < 1e-9);
        assert!((p.position.z - 1.0).abs() < 1e-9);
        assert_eq!(p.payload, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn transform_unknown_pair_propagates_error() {
        let transformer = CoordinateTransformer::new(Box::new(TransformBuffer::new()));
        let cloud = PointCloud::new(vec![Point::new(0.0, 0.0, 0.0)]);
        let err = transformer.transform(&cloud, "a", "b", None).unwrap_err();
        assert!(matches!(err, ImprintError::TransformLookup { .. }));
    }
}
