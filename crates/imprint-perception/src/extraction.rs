//! Imprint extraction strategies.
//!
//! An [`ImprintExtractor`] turns a live sensor reading plus the stored
//! baseline into the points that represent new contact.  Two strategies are
//! provided, selected by the sensor modality:
//!
//! | Strategy | Input | Contact predicate |
//! |----------|-------|-------------------|
//! | [`TreeSearchExtractor`]      | point clouds  | no reference point within `threshold` (ball query) |
//! | [`DepthDifferenceExtractor`] | depth images  | `reference_depth - live_depth > threshold` per pixel |
//!
//! Both pass their output through the shared [`ConeFilter`].
//! [`extract_imprint`] runs a strategy on both sides, maps each side into
//! the reconstruction frame and concatenates right before left.

use std::fmt;

use imprint_types::{
    DepthReading, Imprint, ImprintError, Point, PointCloud, PointCloudReading, SensorReading,
    SensorSide, Sided,
};
use tracing::debug;

use crate::filter::ConeFilter;
use crate::reference::{ReferenceData, ReferenceManager, SideReference};
use crate::transform::CoordinateTransformer;

/// Which extraction strategy is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    TreeSearch,
    DepthDifference,
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionKind::TreeSearch => write!(f, "tree_search"),
            ExtractionKind::DepthDifference => write!(f, "depth_difference"),
        }
    }
}

/// A contact-extraction strategy.
pub trait ImprintExtractor: Send {
    fn kind(&self) -> ExtractionKind;

    /// Contact distance threshold in metres.
    fn threshold(&self) -> f64;

    /// Turn a baseline reading into the stored reference for one side.
    fn prepare_reference(&self, reading: SensorReading) -> Result<SideReference, ImprintError>;

    /// Contact points of `live` against `reference`, in the live reading's
    /// frame.
    fn extract(
        &self,
        side: SensorSide,
        live: SensorReading,
        reference: &mut SideReference,
    ) -> Result<PointCloudReading, ImprintError>;
}

fn modality_error(expected: &str, got: &SensorReading) -> ImprintError {
    let found = match got {
        SensorReading::PointCloud(_) => "point cloud",
        SensorReading::Depth(_) => "depth image",
    };
    ImprintError::InvalidInput(format!("expected a {expected} reading, got a {found}"))
}

// ────────────────────────────────────────────────────────────────────────────
// Tree-search differencing
// ────────────────────────────────────────────────────────────────────────────

/// Ball-query differencing of filtered point clouds.
#[derive(Debug, Clone)]
pub struct TreeSearchExtractor {
    threshold: f64,
    filter: ConeFilter,
}

impl TreeSearchExtractor {
    pub fn new(threshold: f64, filter: ConeFilter) -> Self {
        Self { threshold, filter }
    }
}

impl ImprintExtractor for TreeSearchExtractor {
    fn kind(&self) -> ExtractionKind {
        ExtractionKind::TreeSearch
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn prepare_reference(&self, reading: SensorReading) -> Result<SideReference, ImprintError> {
        let reading = match reading {
            SensorReading::PointCloud(reading) => reading,
            other => return Err(modality_error("point cloud", &other)),
        };
        Ok(SideReference::indexed_cloud(PointCloudReading {
            cloud: self.filter.apply(&reading.cloud),
            frame: reading.frame,
        }))
    }

    fn extract(
        &self,
        side: SensorSide,
        live: SensorReading,
        reference: &mut SideReference,
    ) -> Result<PointCloudReading, ImprintError> {
        let live = match live {
            SensorReading::PointCloud(live) => live,
            other => return Err(modality_error("point cloud", &other)),
        };
        let candidates = self.filter.apply(&live.cloud);
        let index = reference.index(side)?;
        let contact: PointCloud = candidates
            .iter()
            .filter(|p| !index.any_within(&p.position, self.threshold))
            .copied()
            .collect();
        debug!(
            %side,
            candidates = candidates.len(),
            contact = contact.len(),
            "tree-search extraction"
        );
        Ok(PointCloudReading {
            cloud: contact,
            frame: live.frame,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Depth differencing
// ────────────────────────────────────────────────────────────────────────────

/// Per-pixel depth differencing with back-projection of the live image.
#[derive(Debug, Clone)]
pub struct DepthDifferenceExtractor {
    threshold: f64,
    filter: ConeFilter,
}

impl DepthDifferenceExtractor {
    pub fn new(threshold: f64, filter: ConeFilter) -> Self {
        Self { threshold, filter }
    }

    /// Back-project every pixel that moved towards the camera by more than
    /// the threshold.  Pixels invalid in either image are skipped.
    fn contact_points(&self, reference: &DepthReading, live: &DepthReading) -> PointCloud {
        let k = &live.intrinsics;
        let width = live.image.width() as usize;
        let valid = |d: f32| d.is_finite() && d > 0.0;

        reference
            .image
            .data()
            .iter()
            .zip(live.image.data())
            .enumerate()
            .filter(|&(_, (&r, &l))| valid(r) && valid(l) && f64::from(r - l) > self.threshold)
            .map(|(i, (_, &l))| {
                let (u, v) = ((i % width) as f64, (i / width) as f64);
                Point::from_position(k.back_project(u, v, f64::from(l)))
            })
            .collect()
    }
}

impl ImprintExtractor for DepthDifferenceExtractor {
    fn kind(&self) -> ExtractionKind {
        ExtractionKind::DepthDifference
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn prepare_reference(&self, reading: SensorReading) -> Result<SideReference, ImprintError> {
        match reading {
            SensorReading::Depth(reading) => Ok(SideReference::depth(reading)),
            other => Err(modality_error("depth image", &other)),
        }
    }

    fn extract(
        &self,
        side: SensorSide,
        live: SensorReading,
        reference: &mut SideReference,
    ) -> Result<PointCloudReading, ImprintError> {
        let live = match live {
            SensorReading::Depth(live) => live,
            other => return Err(modality_error("depth image", &other)),
        };
        let ReferenceData::Depth(baseline) = reference.data() else {
            return Err(ImprintError::InvalidInput(format!(
                "{side} reference is not a depth image"
            )));
        };
        if !baseline.image.same_shape(&live.image) {
            return Err(ImprintError::InvalidInput(format!(
                "{side} depth image is {}x{}, reference is {}x{}",
                live.image.width(),
                live.image.height(),
                baseline.image.width(),
                baseline.image.height()
            )));
        }

        let raw = self.contact_points(baseline, &live);
        let contact = self.filter.apply(&raw);
        debug!(%side, raw = raw.len(), contact = contact.len(), "depth extraction");
        Ok(PointCloudReading {
            cloud: contact,
            frame: live.frame,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Both sides
// ────────────────────────────────────────────────────────────────────────────

/// Extract both sides, express them in `target_frame` and concatenate.
///
/// Fails without a partial result if either side fails.
pub fn extract_imprint(
    extractor: &dyn ImprintExtractor,
    references: &mut ReferenceManager,
    live: Sided<SensorReading>,
    transformer: &CoordinateTransformer,
    target_frame: &str,
) -> Result<Imprint, ImprintError> {
    let sides = live.try_map(|side, reading| {
        let reference = references.get_mut(side)?;
        let contact = extractor.extract(side, reading, reference)?;
        transformer.transform(&contact.cloud, &contact.frame, target_frame, None)
    })?;
    Ok(Imprint::from_sides(target_frame, sides))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{TransformBuffer, TransformRow};
    use imprint_types::{CameraIntrinsics, DepthImage, Point};
    use nalgebra::Point3;

    fn surface(z: f64) -> PointCloud {
        let mut pts = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                pts.push(Point::new(
                    -0.01 + 0.002 * i as f64,
                    -0.01 + 0.002 * j as f64,
                    z,
                ));
            }
        }
        PointCloud::new(pts)
    }

    fn cloud(frame: &str, cloud: PointCloud) -> SensorReading {
        SensorReading::PointCloud(PointCloudReading {
            cloud,
            frame: frame.to_string(),
        })
    }

    fn depth(frame: &str, image: DepthImage) -> SensorReading {
        SensorReading::Depth(DepthReading {
            image,
            intrinsics: CameraIntrinsics::new(100.0, 100.0, 2.0, 1.5),
            frame: frame.to_string(),
        })
    }

    // ── Tree search ─────────────────────────────────────────────────────────

    #[test]
    fn identical_cloud_yields_no_contact() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let mut reference = ex.prepare_reference(cloud("cam", surface(0.1))).unwrap();
        let out = ex.extract(SensorSide::Right, cloud("cam", surface(0.1)), &mut reference).unwrap();
        assert!(out.cloud.is_empty());
        assert_eq!(out.frame, "cam");
    }

    #[test]
    fn displaced_point_beyond_threshold_is_contact() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let mut reference = ex.prepare_reference(cloud("cam", surface(0.1))).unwrap();

        let mut live = surface(0.1);
        live.points[55].position.z = 0.09; // 10 mm in front of the membrane
        live.points[22].position.z = 0.098; // 2 mm, within noise
        let out = ex.extract(SensorSide::Left, cloud("cam", live), &mut reference).unwrap();

        assert_eq!(out.cloud.len(), 1);
        assert!((out.cloud.points[0].position.z - 0.09).abs() < 1e-12);
    }

    #[test]
    fn live_points_outside_the_cone_are_never_contact() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let mut reference = ex.prepare_reference(cloud("cam", surface(0.1))).unwrap();
        let live = PointCloud::new(vec![Point::new(0.5, 0.0, 0.1)]);
        let out = ex.extract(SensorSide::Left, cloud("cam", live), &mut reference).unwrap();
        assert!(out.cloud.is_empty());
    }

    #[test]
    fn tree_search_rebuilds_a_missing_index() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let mut reference = ex.prepare_reference(cloud("cam", surface(0.1))).unwrap();
        reference.invalidate_index();
        let out = ex.extract(SensorSide::Right, cloud("cam", surface(0.1)), &mut reference).unwrap();
        assert!(out.cloud.is_empty());
        assert!(reference.has_index());
    }

    #[test]
    fn tree_search_rejects_depth_readings() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let err = ex.prepare_reference(depth("cam", DepthImage::filled(4, 3, 0.1))).unwrap_err();
        assert!(matches!(err, ImprintError::InvalidInput(_)));
    }

    // ── Depth differencing ──────────────────────────────────────────────────

    #[test]
    fn identical_depth_yields_no_contact() {
        let ex = DepthDifferenceExtractor::new(0.005, ConeFilter::default());
        let image = DepthImage::filled(4, 3, 0.1);
        let mut reference = ex.prepare_reference(depth("optical", image.clone())).unwrap();
        let out = ex.extract(SensorSide::Right, depth("optical", image), &mut reference).unwrap();
        assert!(out.cloud.is_empty());
    }

    #[test]
    fn pressed_pixel_is_back_projected() {
        let ex = DepthDifferenceExtractor::new(0.005, ConeFilter::default());
        let mut reference = ex
            .prepare_reference(depth("optical", DepthImage::filled(4, 3, 0.1)))
            .unwrap();

        let mut live = DepthImage::filled(4, 3, 0.1);
        live.set(3, 1, 0.09); // pressed 10 mm
        live.set(0, 0, 0.098); // 2 mm, below threshold
        live.set(1, 2, f32::NAN);
        let out = ex.extract(SensorSide::Left, depth("optical", live), &mut reference).unwrap();

        assert_eq!(out.cloud.len(), 1);
        let p = out.cloud.points[0].position;
        // x = (u - cx)·z/fx, y = (v - cy)·z/fy
        assert!((p.x - (3.0 - 2.0) * 0.09 / 100.0).abs() < 1e-6);
        assert!((p.y - (1.0 - 1.5) * 0.09 / 100.0).abs() < 1e-6);
        assert!((p.z - 0.09).abs() < 1e-6);
        assert_eq!(out.frame, "optical");
    }

    #[test]
    fn depth_size_mismatch_is_invalid_input() {
        let ex = DepthDifferenceExtractor::new(0.005, ConeFilter::default());
        let mut reference = ex
            .prepare_reference(depth("optical", DepthImage::filled(4, 3, 0.1)))
            .unwrap();
        let err = ex
            .extract(SensorSide::Right, depth("optical", DepthImage::filled(3, 3, 0.1)), &mut reference)
            .unwrap_err();
        assert!(matches!(err, ImprintError::InvalidInput(_)));
    }

    // ── Both sides ──────────────────────────────────────────────────────────

    fn pressed(x: f64) -> PointCloud {
        PointCloud::from_positions([Point3::new(x, 0.0, 0.08)])
    }

    #[test]
    fn extract_imprint_transforms_and_orders_right_first() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let mut references = ReferenceManager::new();
        references.replace(Sided::new(
            ex.prepare_reference(cloud("right_cam", surface(0.1))).unwrap(),
            ex.prepare_reference(cloud("left_cam", surface(0.1))).unwrap(),
        ));
        let buffer = TransformBuffer::from_rows(&[
            TransformRow::translation("grasp_frame", "right_cam", [1.0, 0.0, 0.0]),
            TransformRow::translation("grasp_frame", "left_cam", [-1.0, 0.0, 0.0]),
        ])
        .unwrap();
        let transformer = CoordinateTransformer::new(Box::new(buffer));

        let live = Sided::new(cloud("right_cam", pressed(0.001)), cloud("left_cam", pressed(0.002)));
        let imprint = extract_imprint(&ex, &mut references, live, &transformer, "grasp_frame").unwrap();

        assert_eq!(imprint.frame, "grasp_frame");
        assert_eq!(imprint.len(), 2);
        assert!((imprint.cloud().points[0].position.x - 1.001).abs() < 1e-9);
        assert!((imprint.cloud().points[1].position.x + 0.998).abs() < 1e-9);
    }

    #[test]
    fn extract_imprint_before_reference_fails() {
        let ex = TreeSearchExtractor::new(0.005, ConeFilter::default());
        let transformer = CoordinateTransformer::new(Box::new(TransformBuffer::new()));
        let live = Sided::new(cloud("r", pressed(0.0)), cloud("l", pressed(0.0)));
        let err = extract_imprint(&ex, &mut ReferenceManager::new(), live, &transformer, "grasp_frame")
            .unwrap_err();
        assert_eq!(err, ImprintError::NotReferenced);
    }
}
