//! `imprint-types` – shared vocabulary of the imprint pipeline.
//!
//! Point sets, depth images, camera intrinsics, the left/right sensor pairing
//! and the single error type used across every crate in the workspace.

use std::fmt;

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rigid transform between two named frames.
pub type RigidTransform = Isometry3<f64>;

// ────────────────────────────────────────────────────────────────────────────
// Points
// ────────────────────────────────────────────────────────────────────────────

/// A single sensor or template point: a 3-D position plus a 3-scalar
/// auxiliary payload (colour / label channels).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub position: Point3<f64>,
    pub payload: [f64; 3],
}

impl Point {
    /// A point with a zero payload.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self::from_position(Point3::new(x, y, z))
    }

    pub fn from_position(position: Point3<f64>) -> Self {
        Self {
            position,
            payload: [0.0; 3],
        }
    }

    pub fn with_payload(mut self, payload: [f64; 3]) -> Self {
        self.payload = payload;
        self
    }
}

/// An ordered sequence of [`Point`]s.
///
/// Order is preserved by every operation in the pipeline; it only matters
/// for the final right-before-left concatenation of an [`Imprint`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Build a cloud with zero payloads from bare positions.
    pub fn from_positions<I>(positions: I) -> Self
    where
        I: IntoIterator<Item = Point3<f64>>,
    {
        positions.into_iter().map(Point::from_position).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Spatial coordinates only, in order.
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.points.iter().map(|p| p.position).collect()
    }

    /// Append all points of `other` after the points of `self`.
    pub fn extend_from(&mut self, other: &PointCloud) {
        self.points.extend_from_slice(&other.points);
    }

    /// Apply a rigid transform to every position; payloads pass through.
    pub fn transformed(&self, transform: &RigidTransform) -> Self {
        self.points
            .iter()
            .map(|p| Point {
                position: transform * p.position,
                payload: p.payload,
            })
            .collect()
    }
}

impl FromIterator<Point> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for PointCloud {
    type Item = Point;
    type IntoIter = std::vec::IntoIter<Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl<'a> IntoIterator for &'a PointCloud {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Depth images & intrinsics
// ────────────────────────────────────────────────────────────────────────────

/// A row-major depth image in metres.  Non-finite or non-positive values
/// mark invalid pixels.
///
/// The pixel buffer always holds exactly `width * height` values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DepthImage {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthImage {
    /// Create an image, checking that `data` holds `width * height` pixels.
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, ImprintError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(ImprintError::InvalidInput(format!(
                "depth image {width}x{height} needs {expected} pixels, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// An image where every pixel has the same depth.
    pub fn filled(width: u32, height: u32, depth: f32) -> Self {
        Self {
            width,
            height,
            data: vec![depth; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major pixels.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn index(&self, u: u32, v: u32) -> Option<usize> {
        (u < self.width && v < self.height).then(|| v as usize * self.width as usize + u as usize)
    }

    /// Depth at column `u`, row `v`.
    pub fn get(&self, u: u32, v: u32) -> Option<f32> {
        self.index(u, v).and_then(|i| self.data.get(i)).copied()
    }

    /// Overwrite one pixel; out-of-range coordinates are ignored.
    pub fn set(&mut self, u: u32, v: u32, depth: f32) {
        if let Some(px) = self.index(u, v).and_then(|i| self.data.get_mut(i)) {
            *px = depth;
        }
    }

    pub fn same_shape(&self, other: &DepthImage) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.data.len() == other.data.len()
    }
}

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Read the intrinsics out of a row-major 3x3 `K` matrix.
    pub fn from_k(k: [f64; 9]) -> Self {
        Self::new(k[0], k[4], k[2], k[5])
    }

    /// Back-project pixel `(u, v)` at `depth` into the camera frame.
    pub fn back_project(&self, u: f64, v: f64, depth: f64) -> Point3<f64> {
        Point3::new(
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor sides
// ────────────────────────────────────────────────────────────────────────────

/// One of the two tactile sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSide {
    Left,
    Right,
}

impl SensorSide {
    /// Every side in output order: right first, then left.
    pub const ALL: [SensorSide; 2] = [SensorSide::Right, SensorSide::Left];
}

impl fmt::Display for SensorSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorSide::Left => write!(f, "left"),
            SensorSide::Right => write!(f, "right"),
        }
    }
}

/// A value held once per sensor side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sided<T> {
    pub right: T,
    pub left: T,
}

impl<T> Sided<T> {
    pub fn new(right: T, left: T) -> Self {
        Self { right, left }
    }

    pub fn get(&self, side: SensorSide) -> &T {
        match side {
            SensorSide::Right => &self.right,
            SensorSide::Left => &self.left,
        }
    }

    pub fn get_mut(&mut self, side: SensorSide) -> &mut T {
        match side {
            SensorSide::Right => &mut self.right,
            SensorSide::Left => &mut self.left,
        }
    }

    /// Map both sides, right first.
    pub fn map<U>(self, mut f: impl FnMut(SensorSide, T) -> U) -> Sided<U> {
        let right = f(SensorSide::Right, self.right);
        let left = f(SensorSide::Left, self.left);
        Sided { right, left }
    }

    /// Map both sides, right first, stopping at the first error.
    pub fn try_map<U, E>(
        self,
        mut f: impl FnMut(SensorSide, T) -> Result<U, E>,
    ) -> Result<Sided<U>, E> {
        let right = f(SensorSide::Right, self.right)?;
        let left = f(SensorSide::Left, self.left)?;
        Ok(Sided { right, left })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Readings
// ────────────────────────────────────────────────────────────────────────────

/// A point cloud together with the frame it is expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloudReading {
    pub cloud: PointCloud,
    pub frame: String,
}

/// A depth image with the intrinsics needed to back-project it.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthReading {
    pub image: DepthImage,
    pub intrinsics: CameraIntrinsics,
    pub frame: String,
}

/// One capture from a tactile sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    PointCloud(PointCloudReading),
    Depth(DepthReading),
}

impl SensorReading {
    pub fn frame(&self) -> &str {
        match self {
            SensorReading::PointCloud(r) => &r.frame,
            SensorReading::Depth(r) => &r.frame,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Imprint
// ────────────────────────────────────────────────────────────────────────────

/// The contact imprint of both sensors in the reconstruction frame.
///
/// Right-side points always precede left-side points.
#[derive(Debug, Clone, PartialEq)]
pub struct Imprint {
    pub frame: String,
    cloud: PointCloud,
    right_len: usize,
}

impl Imprint {
    /// Concatenate the per-side point sets, right first.
    pub fn from_sides(frame: impl Into<String>, sides: Sided<PointCloud>) -> Self {
        let right_len = sides.right.len();
        let mut cloud = sides.right;
        cloud.extend_from(&sides.left);
        Self {
            frame: frame.into(),
            cloud,
            right_len,
        }
    }

    /// Every contact point, right side first.
    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    pub fn right_points(&self) -> &[Point] {
        &self.cloud.points[..self.right_len]
    }

    pub fn left_points(&self) -> &[Point] {
        &self.cloud.points[self.right_len..]
    }

    pub fn side_points(&self, side: SensorSide) -> &[Point] {
        match side {
            SensorSide::Right => self.right_points(),
            SensorSide::Left => self.left_points(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Every failure the imprint pipeline can surface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImprintError {
    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("No reference captured: call reference() before extracting an imprint")]
    NotReferenced,

    #[error("No transform from '{origin}' to '{target}'")]
    TransformLookup { origin: String, target: String },

    #[error("Spatial index for the {side} sensor is unavailable")]
    IndexUnavailable { side: SensorSide },

    #[error("Sensor read failed on {sensor}: {details}")]
    SensorRead { sensor: String, details: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("ICP found {found} correspondences, at least {required} required")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("IO Error: {0}")]
    Io(String),
}
