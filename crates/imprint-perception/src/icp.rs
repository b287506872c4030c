//! Pose estimation by Iterative Closest Point.
//!
//! Aligns an [`ObjectModel`] template to an extracted imprint and reports
//! the template's pose in the imprint frame.
//!
//! ```text
//! Input: model M, imprint Q, threshold d, prior T₀ (or identity)
//! Output: T such that T·M ≈ Q
//!
//! 1. For each q ∈ Q find the nearest m ∈ M to T⁻¹·q, dropping pairs
//!    farther apart than d
//! 2. Solve the rigid T' minimising Σ|T'·m − q|² in closed form
//! 3. ΔT = T'·T⁻¹; T ← T'
//! 4. Stop when ΔT is below tolerance or the iteration cap is hit
//! ```
//!
//! Two variants implement [`PoseEstimator`]:
//!
//! - [`Icp3dEstimator`] – full 6-DoF alignment (SVD of the cross-covariance).
//! - [`Icp2dEstimator`] – both sets are projected onto the plane orthogonal
//!   to a configured axis, aligned in 2-D, and the result is lifted back to a
//!   3-D transform with no rotation off the axis and no translation along it.
//!
//! A converged run returns its final iterate.  Stopping early is not an
//! error: on the iteration cap ([`ConvergenceStatus::MaxIterReached`]) or
//! when too few pairs survive the threshold mid-run
//! ([`ConvergenceStatus::LostCorrespondences`]) the best iterate is returned
//! instead, ranked by the truncated error over the whole imprint (every
//! unpaired point counts as `d²`).

use std::fmt;
use std::str::FromStr;

use imprint_types::{ImprintError, PointCloud, RigidTransform};
use nalgebra::{Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::object_model::ObjectModel;
use crate::octree::Octree;

const MIN_CORRESPONDENCES_3D: usize = 3;
const MIN_CORRESPONDENCES_2D: usize = 2;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// ICP variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EstimationKind {
    Icp3d,
    Icp2d,
}

impl EstimationKind {
    pub const ALL: [EstimationKind; 2] = [EstimationKind::Icp3d, EstimationKind::Icp2d];

    pub fn name(self) -> &'static str {
        match self {
            EstimationKind::Icp3d => "icp3d",
            EstimationKind::Icp2d => "icp2d",
        }
    }
}

impl fmt::Display for EstimationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EstimationKind {
    type Err = ImprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|k| k.name() == s).ok_or_else(|| {
            ImprintError::Configuration(format!(
                "pose estimation algorithm '{s}' not implemented. Available options: icp3d, icp2d"
            ))
        })
    }
}

/// Iteration limits and convergence tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcpConfig {
    #[serde(default = "default_max_iterations_3d")]
    pub max_iterations_3d: usize,
    #[serde(default = "default_max_iterations_2d")]
    pub max_iterations_2d: usize,
    /// Incremental translation (m) below which the loop stops.
    #[serde(default = "default_translation_tolerance")]
    pub translation_tolerance: f64,
    /// Incremental rotation (rad) below which the loop stops.
    #[serde(default = "default_rotation_tolerance")]
    pub rotation_tolerance: f64,
    /// Normal of the 2-D variant's projection plane.
    #[serde(default = "default_projection_axis")]
    pub projection_axis: [f64; 3],
}

fn default_max_iterations_3d() -> usize {
    30
}

fn default_max_iterations_2d() -> usize {
    20
}

fn default_translation_tolerance() -> f64 {
    1e-7
}

fn default_rotation_tolerance() -> f64 {
    1e-6
}

fn default_projection_axis() -> [f64; 3] {
    [1.0, 0.0, 0.0]
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_iterations_3d: default_max_iterations_3d(),
            max_iterations_2d: default_max_iterations_2d(),
            translation_tolerance: default_translation_tolerance(),
            rotation_tolerance: default_rotation_tolerance(),
            projection_axis: default_projection_axis(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseEstimate
// ────────────────────────────────────────────────────────────────────────────

/// How an ICP run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    MaxIterReached,
    /// Fewer than the minimum pairs were left within the threshold.
    LostCorrespondences,
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceStatus::Converged => write!(f, "converged"),
            ConvergenceStatus::MaxIterReached => write!(f, "max_iter_reached"),
            ConvergenceStatus::LostCorrespondences => write!(f, "lost_correspondences"),
        }
    }
}

/// The template pose in the imprint frame plus run diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    pub pose: RigidTransform,
    pub status: ConvergenceStatus,
    pub iterations: usize,
    /// Root-mean-square correspondence distance of the returned pose.
    pub rmse: f64,
    pub correspondences: usize,
}

impl PoseEstimate {
    pub fn is_converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }

    /// `[tx, ty, tz, rx, ry, rz]` with the rotation as a scaled axis.
    pub fn to_vector6(&self) -> [f64; 6] {
        let t = self.pose.translation.vector;
        let r = self.pose.rotation.scaled_axis();
        [t.x, t.y, t.z, r.x, r.y, r.z]
    }
}

/// Aligns the configured template to an imprint.
pub trait PoseEstimator: Send {
    fn kind(&self) -> EstimationKind;

    /// Estimate the template pose.  `threshold` is the outlier-rejection
    /// distance for this call; `prior` seeds the iteration.
    fn estimate(
        &self,
        imprint: &PointCloud,
        threshold: f64,
        prior: Option<&RigidTransform>,
    ) -> Result<PoseEstimate, ImprintError>;
}

/// Build the estimator selected by `kind` for `model`.
pub fn estimator_for(
    kind: EstimationKind,
    model: &ObjectModel,
    config: &IcpConfig,
) -> Result<Box<dyn PoseEstimator>, ImprintError> {
    let estimator: Box<dyn PoseEstimator> = match kind {
        EstimationKind::Icp3d => Box::new(Icp3dEstimator::new(model.cloud(), config)),
        EstimationKind::Icp2d => Box::new(Icp2dEstimator::new(model.cloud(), config)?),
    };
    Ok(estimator)
}

// ────────────────────────────────────────────────────────────────────────────
// Shared iteration
// ────────────────────────────────────────────────────────────────────────────

/// Model points with their spatial index.
#[derive(Debug, Clone)]
struct IndexedModel {
    points: Vec<Point3<f64>>,
    index: Octree,
}

impl IndexedModel {
    fn new(points: Vec<Point3<f64>>) -> Self {
        let index = Octree::from_points(&points);
        Self { points, index }
    }
}

struct Correspondences {
    model: Vec<Point3<f64>>,
    imprint: Vec<Point3<f64>>,
    sse: f64,
    /// Squared error over the whole imprint, unpaired points counting as
    /// `threshold²`.
    truncated_sse: f64,
    imprint_len: usize,
}

impl Correspondences {
    fn len(&self) -> usize {
        self.model.len()
    }

    fn rmse(&self) -> f64 {
        if self.model.is_empty() {
            0.0
        } else {
            (self.sse / self.model.len() as f64).sqrt()
        }
    }

    /// Mean truncated squared error; comparable across poses because the
    /// point set is always the full imprint.
    fn score(&self) -> f64 {
        if self.imprint_len == 0 {
            f64::INFINITY
        } else {
            self.truncated_sse / self.imprint_len as f64
        }
    }
}

/// A pose with the pairs it produced.
struct Candidate {
    pose: RigidTransform,
    rmse: f64,
    correspondences: usize,
    score: f64,
}

impl Candidate {
    fn new(pose: RigidTransform, pairs: &Correspondences) -> Self {
        Self {
            pose,
            rmse: pairs.rmse(),
            correspondences: pairs.len(),
            score: pairs.score(),
        }
    }

    fn into_estimate(self, status: ConvergenceStatus, iterations: usize) -> PoseEstimate {
        PoseEstimate {
            pose: self.pose,
            status,
            iterations,
            rmse: self.rmse,
            correspondences: self.correspondences,
        }
    }
}

/// Keep the lower truncated error; later poses win ties.
fn keep_better(best: &mut Option<Candidate>, candidate: Candidate) {
    if best.as_ref().is_none_or(|b| candidate.score <= b.score) {
        *best = Some(candidate);
    }
}

struct Run<'a> {
    model: &'a IndexedModel,
    imprint: &'a [Point3<f64>],
    threshold: f64,
    max_iterations: usize,
    translation_tolerance: f64,
    rotation_tolerance: f64,
    min_correspondences: usize,
}

impl Run<'_> {
    fn correspond(&self, pose: &RigidTransform) -> Correspondences {
        let mut out = Correspondences {
            model: Vec::new(),
            imprint: Vec::new(),
            sse: 0.0,
            truncated_sse: 0.0,
            imprint_len: self.imprint.len(),
        };
        let cap = self.threshold * self.threshold;
        for q in self.imprint {
            let local = pose.inverse_transform_point(q);
            match self.model.index.nearest_within(&local, self.threshold) {
                Some((i, d)) => {
                    out.model.push(self.model.points[i]);
                    out.imprint.push(*q);
                    out.sse += d * d;
                    out.truncated_sse += d * d;
                }
                None => out.truncated_sse += cap,
            }
        }
        out
    }

    fn execute(
        &self,
        initial: RigidTransform,
        solve: impl Fn(&[Point3<f64>], &[Point3<f64>]) -> Result<RigidTransform, ImprintError>,
    ) -> Result<PoseEstimate, ImprintError> {
        if self.threshold.is_nan() || self.threshold <= 0.0 {
            return Err(ImprintError::InvalidInput(format!(
                "ICP threshold must be positive, got {}",
                self.threshold
            )));
        }

        let mut current = initial;
        let mut best: Option<Candidate> = None;
        let mut status = ConvergenceStatus::MaxIterReached;
        let mut iterations = 0;

        for iter in 1..=self.max_iterations {
            let pairs = self.correspond(&current);
            if pairs.len() < self.min_correspondences {
                if best.is_none() {
                    return Err(ImprintError::InsufficientCorrespondences {
                        found: pairs.len(),
                        required: self.min_correspondences,
                    });
                }
                status = ConvergenceStatus::LostCorrespondences;
                break;
            }
            iterations = iter;
            keep_better(&mut best, Candidate::new(current, &pairs));

            let next = solve(&pairs.model, &pairs.imprint)?;
            let delta = next * current.inverse();
            current = next;

            let dt = delta.translation.vector.norm();
            let dr = delta.rotation.angle();
            debug!(iter, correspondences = pairs.len(), rmse = pairs.rmse(), dt, dr, "icp step");
            if dt < self.translation_tolerance && dr < self.rotation_tolerance {
                status = ConvergenceStatus::Converged;
                break;
            }
        }

        if status != ConvergenceStatus::LostCorrespondences {
            let last = self.correspond(&current);
            if last.len() >= self.min_correspondences {
                let last = Candidate::new(current, &last);
                if status == ConvergenceStatus::Converged {
                    return Ok(last.into_estimate(status, iterations));
                }
                keep_better(&mut best, last);
            } else {
                status = ConvergenceStatus::LostCorrespondences;
            }
        }

        let Some(best) = best else {
            return Err(ImprintError::InsufficientCorrespondences {
                found: 0,
                required: self.min_correspondences,
            });
        };
        let estimate = best.into_estimate(status, iterations);
        warn!(
            %status,
            iterations,
            rmse = estimate.rmse,
            correspondences = estimate.correspondences,
            "ICP stopped without converging; returning the best iterate"
        );
        Ok(estimate)
    }
}

fn centroid(points: &[Point3<f64>]) -> Point3<f64> {
    let sum: Vector3<f64> = points.iter().map(|p| p.coords).sum();
    Point3::from(sum / points.len() as f64)
}

/// Closed-form rigid alignment `R·src + t ≈ dst` (Kabsch).
fn solve_rigid_3d(
    src: &[Point3<f64>],
    dst: &[Point3<f64>],
) -> Result<RigidTransform, ImprintError> {
    let cs = centroid(src);
    let cd = centroid(dst);
    let h: Matrix3<f64> = src
        .iter()
        .zip(dst)
        .map(|(s, d)| (s - cs) * (d - cd).transpose())
        .sum();

    let svd = h.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(ImprintError::InvalidInput(
            "cross-covariance SVD did not converge".to_string(),
        ));
    };
    let v = v_t.transpose();
    // Reflection guard.
    let d = (v * u.transpose()).determinant().signum();
    let r = v * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d)) * u.transpose();

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let t = cd.coords - rotation * cs.coords;
    Ok(RigidTransform::from_parts(Translation3::from(t), rotation))
}

/// Closed-form alignment restricted to the XY plane (rotation about Z,
/// no Z translation).
fn solve_rigid_2d(
    src: &[Point3<f64>],
    dst: &[Point3<f64>],
) -> Result<RigidTransform, ImprintError> {
    let cs = centroid(src);
    let cd = centroid(dst);
    let (mut cross, mut dot) = (0.0, 0.0);
    for (s, d) in src.iter().zip(dst) {
        let (a, b) = (s - cs, d - cd);
        cross += a.x * b.y - a.y * b.x;
        dot += a.x * b.x + a.y * b.y;
    }
    let theta = cross.atan2(dot);
    let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta);
    let mut t = cd.coords - rotation * cs.coords;
    t.z = 0.0;
    Ok(RigidTransform::from_parts(Translation3::from(t), rotation))
}

// ────────────────────────────────────────────────────────────────────────────
// 3-D ICP
// ────────────────────────────────────────────────────────────────────────────

/// Full 6-DoF point-to-point ICP.
#[derive(Debug, Clone)]
pub struct Icp3dEstimator {
    model: IndexedModel,
    config: IcpConfig,
}

impl Icp3dEstimator {
    pub fn new(model: &PointCloud, config: &IcpConfig) -> Self {
        Self {
            model: IndexedModel::new(model.positions()),
            config: config.clone(),
        }
    }
}

impl PoseEstimator for Icp3dEstimator {
    fn kind(&self) -> EstimationKind {
        EstimationKind::Icp3d
    }

    fn estimate(
        &self,
        imprint: &PointCloud,
        threshold: f64,
        prior: Option<&RigidTransform>,
    ) -> Result<PoseEstimate, ImprintError> {
        let points = imprint.positions();
        let run = Run {
            model: &self.model,
            imprint: &points,
            threshold,
            max_iterations: self.config.max_iterations_3d,
            translation_tolerance: self.config.translation_tolerance,
            rotation_tolerance: self.config.rotation_tolerance,
            min_correspondences: MIN_CORRESPONDENCES_3D,
        };
        run.execute(prior.copied().unwrap_or_else(RigidTransform::identity), solve_rigid_3d)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// 2-D projected ICP
// ────────────────────────────────────────────────────────────────────────────

/// ICP in the plane orthogonal to `projection_axis`.
#[derive(Debug, Clone)]
pub struct Icp2dEstimator {
    /// Columns `(e1, e2, axis)`: maps plane coordinates back to 3-D.
    basis: Rotation3<f64>,
    model: IndexedModel,
    config: IcpConfig,
}

impl Icp2dEstimator {
    pub fn new(model: &PointCloud, config: &IcpConfig) -> Result<Self, ImprintError> {
        let basis = plane_basis(Vector3::from(config.projection_axis))?;
        let points = model
            .iter()
            .map(|p| project(&basis, &p.position))
            .collect();
        Ok(Self {
            basis,
            model: IndexedModel::new(points),
            config: config.clone(),
        })
    }

    pub fn axis(&self) -> Vector3<f64> {
        self.basis.matrix().column(2).into_owned()
    }

    /// In-plane part of a 3-D pose, expressed in plane coordinates.
    fn flatten(&self, pose: &RigidTransform) -> RigidTransform {
        let local = self.basis.inverse() * pose.rotation.to_rotation_matrix() * self.basis;
        let m = local.matrix();
        let theta = m[(1, 0)].atan2(m[(0, 0)]);
        let mut t = self.basis.inverse() * pose.translation.vector;
        t.z = 0.0;
        RigidTransform::from_parts(
            Translation3::from(t),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), theta),
        )
    }

    /// Plane-coordinate pose back to 3-D.
    fn lift(&self, planar: &RigidTransform) -> RigidTransform {
        let b = UnitQuaternion::from_rotation_matrix(&self.basis);
        let frame = RigidTransform::from_parts(Translation3::identity(), b);
        frame * planar * frame.inverse()
    }
}

/// Orthonormal `(e1, e2, axis)` with `e1 × e2 = axis`.
fn plane_basis(axis: Vector3<f64>) -> Result<Rotation3<f64>, ImprintError> {
    let Some(axis) = axis.try_normalize(1e-12) else {
        return Err(ImprintError::Configuration(
            "ICP projection axis must be non-zero".to_string(),
        ));
    };
    // Cross with the coordinate axis least aligned with `axis`.
    let helper = Vector3::ith(axis.iamin(), 1.0);
    let e1 = axis.cross(&helper).normalize();
    let e2 = axis.cross(&e1);
    Ok(Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[e1, e2, axis])))
}

fn project(basis: &Rotation3<f64>, p: &Point3<f64>) -> Point3<f64> {
    let mut local = basis.inverse() * p;
    local.z = 0.0;
    local
}

impl PoseEstimator for Icp2dEstimator {
    fn kind(&self) -> EstimationKind {
        EstimationKind::Icp2d
    }

    fn estimate(
        &self,
        imprint: &PointCloud,
        threshold: f64,
        prior: Option<&RigidTransform>,
    ) -> Result<PoseEstimate, ImprintError> {
        let points: Vec<Point3<f64>> = imprint
            .iter()
            .map(|p| project(&self.basis, &p.position))
            .collect();
        let run = Run {
            model: &self.model,
            imprint: &points,
            threshold,
            max_iterations: self.config.max_iterations_2d,
            translation_tolerance: self.config.translation_tolerance,
            rotation_tolerance: self.config.rotation_tolerance,
            min_correspondences: MIN_CORRESPONDENCES_2D,
        };
        let initial = prior.map_or_else(RigidTransform::identity, |p| self.flatten(p));
        let mut estimate = run.execute(initial, solve_rigid_2d)?;
        estimate.pose = self.lift(&estimate.pose);
        Ok(estimate)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
