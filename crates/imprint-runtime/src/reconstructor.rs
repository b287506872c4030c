//! [`Reconstructor`] – reference capture, imprint extraction and tool pose
//! estimation for a two-sensor tactile gripper.
//!
//! The reconstructor owns a [`SensorRig`] and drives the perception core:
//!
//! 1. **Reference** – [`Reconstructor::reference`] reads both sensors while
//!    nothing is grasped and stores the baseline (plus its spatial index for
//!    point-cloud rigs).  Both sides are replaced together or not at all.
//! 2. **Imprint** – [`Reconstructor::get_imprint`] reads both sensors again,
//!    keeps the contact points of each side and expresses them in the
//!    reconstruction frame, right side first.
//! 3. **Pose** – [`Reconstructor::estimate_pose`] aligns the configured tool
//!    template to the imprint, seeded with the previous estimate.
//!
//! The extraction strategy follows the rig: point-cloud rigs use tree search,
//! depth rigs use depth differencing.
//!
//! # Example
//!
//! ```rust
//! use imprint_hal::rig::SensorRig;
//! use imprint_hal::sim::SimPointCloudSensor;
//! use imprint_perception::transform::{TransformBuffer, TransformRow};
//! use imprint_runtime::config::ReconstructorConfig;
//! use imprint_runtime::reconstructor::Reconstructor;
//!
//! let rig = SensorRig::point_cloud(
//!     Box::new(SimPointCloudSensor::new("right", "right_cam")),
//!     Box::new(SimPointCloudSensor::new("left", "left_cam")),
//! );
//! let transforms = TransformBuffer::from_rows(&[
//!     TransformRow::translation("grasp_frame", "right_cam", [0.0, 0.0, -0.1]),
//!     TransformRow::translation("grasp_frame", "left_cam", [0.0, 0.0, -0.1]),
//! ])
//! .unwrap();
//!
//! let mut reconstructor =
//!     Reconstructor::new(ReconstructorConfig::default(), rig, Box::new(transforms)).unwrap();
//! reconstructor.reference().unwrap();
//! assert!(reconstructor.get_imprint(false).unwrap().is_empty());
//! ```

use imprint_hal::rig::{SensorModality, SensorRig};
use imprint_middleware::Broadcaster;
use imprint_perception::extraction::{
    DepthDifferenceExtractor, ImprintExtractor, TreeSearchExtractor, extract_imprint,
};
use imprint_perception::filter::ConeFilter;
use imprint_perception::icp::{PoseEstimate, PoseEstimator, estimator_for};
use imprint_perception::object_model::ObjectModel;
use imprint_perception::reference::{ReferenceData, ReferenceManager, SideReference};
use imprint_perception::transform::{CoordinateTransformer, TransformService};
use imprint_types::{
    Imprint, ImprintError, PointCloud, RigidTransform, SensorSide, Sided,
};
use tracing::{debug, info};

use crate::config::ReconstructorConfig;

/// Payload written into per-side imprints published in view mode (green).
const VIEW_COLOUR: [f64; 3] = [0.0, 1.0, 0.0];

/// Label of the imprint handed to the estimator.
pub const IMPRINT_LABEL: &str = "imprint";

fn side_label(side: SensorSide) -> &'static str {
    match side {
        SensorSide::Right => "imprint/right",
        SensorSide::Left => "imprint/left",
    }
}

fn reference_len(reference: &SideReference) -> usize {
    match reference.data() {
        ReferenceData::Cloud(r) => r.cloud.len(),
        ReferenceData::Depth(r) => r.image.data().len(),
    }
}

/// Tactile imprint reconstruction and tool pose estimation.
pub struct Reconstructor {
    config: ReconstructorConfig,
    rig: SensorRig,
    extractor: Box<dyn ImprintExtractor>,
    references: ReferenceManager,
    transformer: CoordinateTransformer,
    model: ObjectModel,
    estimator: Box<dyn PoseEstimator>,
    broadcaster: Option<Box<dyn Broadcaster>>,
    last_pose: Option<RigidTransform>,
}

impl Reconstructor {
    /// Validate `config` and assemble the pipeline.
    ///
    /// # Errors
    ///
    /// [`ImprintError::Configuration`] for an invalid config, including an
    /// unknown object model or estimation type.
    pub fn new(
        config: ReconstructorConfig,
        rig: SensorRig,
        transforms: Box<dyn TransformService>,
    ) -> Result<Self, ImprintError> {
        config.validate()?;
        let filter = ConeFilter::new(config.filter.angles_deg);
        let extractor: Box<dyn ImprintExtractor> = match rig.modality() {
            SensorModality::PointCloud => {
                Box::new(TreeSearchExtractor::new(config.threshold, filter))
            }
            SensorModality::Depth => {
                Box::new(DepthDifferenceExtractor::new(config.threshold, filter))
            }
        };
        let model = ObjectModel::from_name(&config.object_name)?;
        let estimator = estimator_for(config.estimation_kind()?, &model, &config.icp)?;

        info!(
            extraction = %extractor.kind(),
            estimation = %estimator.kind(),
            object = %model.kind(),
            frame = %config.reconstruction_frame,
            "reconstructor ready"
        );

        Ok(Self {
            config,
            rig,
            extractor,
            references: ReferenceManager::new(),
            transformer: CoordinateTransformer::new(transforms),
            model,
            estimator,
            broadcaster: None,
            last_pose: None,
        })
    }

    /// Attach a broadcaster for view mode and imprint publishing.
    pub fn with_broadcaster(mut self, broadcaster: Box<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn config(&self) -> &ReconstructorConfig {
        &self.config
    }

    pub fn model(&self) -> &ObjectModel {
        &self.model
    }

    pub fn is_referenced(&self) -> bool {
        self.references.is_referenced()
    }

    pub fn references(&self) -> &ReferenceManager {
        &self.references
    }

    /// Pose used to seed the next estimate, if any.
    pub fn last_pose(&self) -> Option<&RigidTransform> {
        self.last_pose.as_ref()
    }

    /// Capture the undeformed baseline of both sensors.
    ///
    /// On failure the previous reference (if any) is left untouched.
    /// On success the warm-start pose is cleared.
    pub fn reference(&mut self) -> Result<(), ImprintError> {
        let readings = self.rig.read_both(Sided::new(None, None))?;
        let sides = readings.try_map(|_, reading| self.extractor.prepare_reference(reading))?;

        for side in SensorSide::ALL {
            let reference = sides.get(side);
            info!(
                %side,
                frame = reference.frame(),
                points = reference_len(reference),
                "reference captured"
            );
        }
        self.references.replace(sides);
        self.last_pose = None;
        Ok(())
    }

    /// Read both sensors and return the contact imprint in the
    /// reconstruction frame.
    ///
    /// With `view` set, each side's imprint is also published (coloured
    /// green) under `imprint/right` and `imprint/left`.
    pub fn get_imprint(&mut self, view: bool) -> Result<Imprint, ImprintError> {
        if !self.references.is_referenced() {
            return Err(ImprintError::NotReferenced);
        }

        // Point-cloud sensors are asked for clouds in their reference frame.
        let hints = match self.rig.modality() {
            SensorModality::PointCloud => Sided::new(
                Some(self.references.get(SensorSide::Right)?.frame()),
                Some(self.references.get(SensorSide::Left)?.frame()),
            ),
            SensorModality::Depth => Sided::new(None, None),
        };
        let live = self.rig.read_both(hints)?;

        let imprint = extract_imprint(
            self.extractor.as_ref(),
            &mut self.references,
            live,
            &self.transformer,
            &self.config.reconstruction_frame,
        )?;
        debug!(
            right = imprint.right_points().len(),
            left = imprint.left_points().len(),
            frame = %imprint.frame,
            "imprint extracted"
        );

        if view {
            for side in SensorSide::ALL {
                let coloured: PointCloud = imprint
                    .side_points(side)
                    .iter()
                    .map(|p| p.with_payload(VIEW_COLOUR))
                    .collect();
                self.publish(&coloured, side_label(side));
            }
        }
        Ok(imprint)
    }

    /// Extract the imprint and align the tool template to it.
    ///
    /// `threshold` is the ICP outlier-rejection distance for this call.  The
    /// previous estimate seeds the alignment and is replaced by the result.
    pub fn estimate_pose(&mut self, threshold: f64, view: bool) -> Result<PoseEstimate, ImprintError> {
        let imprint = self.get_imprint(view)?;
        if self.config.broadcast_imprint {
            self.publish(imprint.cloud(), IMPRINT_LABEL);
        }

        let estimate = self
            .estimator
            .estimate(imprint.cloud(), threshold, self.last_pose.as_ref())?;
        self.last_pose = Some(estimate.pose);

        info!(
            status = %estimate.status,
            iterations = estimate.iterations,
            rmse = estimate.rmse,
            correspondences = estimate.correspondences,
            "pose estimated"
        );
        Ok(estimate)
    }

    fn publish(&self, cloud: &PointCloud, label: &str) {
        let Some(broadcaster) = &self.broadcaster else {
            return;
        };
        match broadcaster.broadcast(cloud, &self.config.reconstruction_frame, label) {
            Ok(listeners) => debug!(label, points = cloud.len(), listeners, "cloud published"),
            Err(e) => debug!(label, error = %e, "broadcast failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imprint_hal::sim::{SimDepthSensor, SimPointCloudSensor};
    use imprint_middleware::ImprintBus;
    use imprint_perception::icp::ConvergenceStatus;
    use imprint_perception::transform::{TransformBuffer, TransformRow};
    use imprint_types::{CameraIntrinsics, DepthImage};
    use nalgebra::{Point3, Vector3};

    /// Both cameras sit 10 cm behind the grasp frame, looking along +z.
    fn transforms(right: &str, left: &str) -> Box<TransformBuffer> {
        Box::new(
            TransformBuffer::from_rows(&[
                TransformRow::translation("grasp_frame", right, [0.0, 0.0, -0.1]),
                TransformRow::translation("grasp_frame", left, [0.0, 0.0, -0.1]),
            ])
            .unwrap(),
        )
    }

    /// Undeformed membrane: a flat grid 13 cm in front of the camera.
    fn membrane() -> PointCloud {
        let mut positions = Vec::new();
        for i in 0..21 {
            for j in 0..21 {
                let x = -0.01 + 0.001 * f64::from(i);
                let y = -0.01 + 0.001 * f64::from(j);
                positions.push(Point3::new(x, y, 0.13));
            }
        }
        PointCloud::from_positions(positions)
    }

    /// The membrane plus the tool template at `pose` (grasp frame), seen
    /// from a camera.
    fn pressed(model: &ObjectModel, pose: &RigidTransform) -> PointCloud {
        let to_camera = RigidTransform::translation(0.0, 0.0, 0.1);
        let mut cloud = membrane();
        cloud.extend_from(&model.cloud().transformed(&(to_camera * pose)));
        cloud
    }

    struct CloudRig {
        right: SimPointCloudSensor,
        left: SimPointCloudSensor,
        reconstructor: Reconstructor,
    }

    fn cloud_rig(config: ReconstructorConfig) -> CloudRig {
        let right = SimPointCloudSensor::new("pico_right", "right_cam");
        let left = SimPointCloudSensor::new("pico_left", "left_cam");
        right.set_cloud(membrane());
        left.set_cloud(membrane());
        let rig = SensorRig::point_cloud(Box::new(right.clone()), Box::new(left.clone()));
        let reconstructor =
            Reconstructor::new(config, rig, transforms("right_cam", "left_cam")).unwrap();
        CloudRig {
            right,
            left,
            reconstructor,
        }
    }

    fn press(rig: &CloudRig, pose: &RigidTransform) {
        let model = rig.reconstructor.model().clone();
        rig.right.set_cloud(pressed(&model, pose));
        rig.left.set_cloud(pressed(&model, pose));
    }

    // ── Construction ─────────────────────────────────────────────────────────

    #[test]
    fn unknown_object_is_rejected_at_construction() {
        let mut config = ReconstructorConfig::default();
        config.object_name = "wrench".to_string();
        let rig = SensorRig::point_cloud(
            Box::new(SimPointCloudSensor::new("r", "right_cam")),
            Box::new(SimPointCloudSensor::new("l", "left_cam")),
        );
        let err = Reconstructor::new(config, rig, transforms("right_cam", "left_cam"))
            .err()
            .unwrap();
        assert!(matches!(err, ImprintError::Configuration(_)));
    }

    // ── Reference ────────────────────────────────────────────────────────────

    #[test]
    fn imprint_before_reference_fails() {
        let mut rig = cloud_rig(ReconstructorConfig::default());
        assert_eq!(rig.reconstructor.get_imprint(false), Err(ImprintError::NotReferenced));
        assert!(matches!(
            rig.reconstructor.estimate_pose(0.005, false),
            Err(ImprintError::NotReferenced)
        ));
    }

    #[test]
    fn untouched_membrane_has_no_imprint() {
        let mut rig = cloud_rig(ReconstructorConfig::default());
        rig.reconstructor.reference().unwrap();
        assert!(rig.reconstructor.is_referenced());
        let imprint = rig.reconstructor.get_imprint(false).unwrap();
        assert!(imprint.is_empty());
        assert_eq!(imprint.frame, "grasp_frame");
    }

    #[test]
    fn failed_reference_keeps_the_previous_one() {
        let mut rig = cloud_rig(ReconstructorConfig::default());
        rig.reconstructor.reference().unwrap();

        rig.left.fail_next_read();
        assert!(matches!(
            rig.reconstructor.reference(),
            Err(ImprintError::SensorRead { .. })
        ));
        assert!(rig.reconstructor.is_referenced());
        assert_eq!(
            rig.reconstructor.references().get(SensorSide::Left).unwrap().frame(),
            "left_cam"
        );
    }

    // ── Imprint ──────────────────────────────────────────────────────────────

    #[test]
    fn imprint_contains_only_the_tool_right_side_first() {
        let mut rig = cloud_rig(ReconstructorConfig::default());
        rig.reconstructor.reference().unwrap();
        let model_len = rig.reconstructor.model().cloud().len();

        press(&rig, &RigidTransform::identity());
        let imprint = rig.reconstructor.get_imprint(false).unwrap();

        assert_eq!(imprint.right_points().len(), model_len);
        assert_eq!(imprint.left_points().len(), model_len);
        // Expressed in the grasp frame, the imprint is the template itself.
        let first = imprint.right_points()[0].position;
        let expected = rig.reconstructor.model().cloud().points[0].position;
        assert!((first - expected).norm() < 1e-9);
    }

    #[test]
    fn view_mode_publishes_green_side_imprints() {
        let bus = ImprintBus::default();
        let mut rx = bus.subscribe();
        let mut rig = cloud_rig(ReconstructorConfig::default());
        rig.reconstructor = rig.reconstructor.with_broadcaster(Box::new(bus.clone()));
        rig.reconstructor.reference().unwrap();
        press(&rig, &RigidTransform::identity());

        let imprint = rig.reconstructor.get_imprint(true).unwrap();

        let right = rx.try_recv().unwrap();
        let left = rx.try_recv().unwrap();
        assert_eq!(right.label, "imprint/right");
        assert_eq!(left.label, "imprint/left");
        assert_eq!(right.frame_id, "grasp_frame");
        assert_eq!(right.len(), imprint.right_points().len());
        assert!(rx.try_recv().is_err());
        // The returned imprint itself is not recoloured.
        assert_eq!(imprint.cloud().points[0].payload, [0.0; 3]);
    }

    #[test]
    fn depth_rig_extracts_pressed_pixels() {
        let k = CameraIntrinsics::new(100.0, 100.0, 1.5, 1.5);
        let right = SimDepthSensor::new("r", "right_depth", DepthImage::filled(4, 4, 0.1), k);
        let left = SimDepthSensor::new("l", "left_depth", DepthImage::filled(4, 4, 0.1), k);
        let rig = SensorRig::depth(Box::new(right.clone()), Box::new(left.clone())).unwrap();
        let mut reconstructor = Reconstructor::new(
            ReconstructorConfig::default(),
            rig,
            transforms("right_depth", "left_depth"),
        )
        .unwrap();
        reconstructor.reference().unwrap();

        let mut image = DepthImage::filled(4, 4, 0.1);
        image.set(2, 1, 0.09);
        right.set_image(image);

        let imprint = reconstructor.get_imprint(false).unwrap();
        assert_eq!(imprint.right_points().len(), 1);
        assert!(imprint.left_points().is_empty());
        let p = imprint.right_points()[0].position;
        // Back-projected at 9 cm, then shifted into the grasp frame.
        assert!((p.z - (0.09 - 0.1)).abs() < 1e-6);
        assert!((p.x - 0.5 * 0.09 / 100.0).abs() < 1e-6);
    }

    // ── Pose ─────────────────────────────────────────────────────────────────

    #[test]
    fn estimate_pose_recovers_tool_offset_and_warm_starts() {
        let mut rig = cloud_rig(ReconstructorConfig::default());
        rig.reconstructor.reference().unwrap();
        let truth = RigidTransform::translation(0.0002, 0.0, 0.0);
        press(&rig, &truth);

        let first = rig.reconstructor.estimate_pose(0.005, false).unwrap();
        assert_eq!(first.status, ConvergenceStatus::Converged);
        assert!((first.pose.translation.vector - Vector3::new(0.0002, 0.0, 0.0)).norm() < 1e-6);
        assert_eq!(rig.reconstructor.last_pose(), Some(&first.pose));

        let second = rig.reconstructor.estimate_pose(0.005, false).unwrap();
        assert!(second.iterations <= first.iterations);

        rig.reconstructor.reference().unwrap();
        assert!(rig.reconstructor.last_pose().is_none());
    }

    #[test]
    fn estimate_pose_broadcasts_the_imprint_when_configured() {
        let bus = ImprintBus::default();
        let mut rx = bus.subscribe();
        let mut config = ReconstructorConfig::default();
        config.broadcast_imprint = true;
        let mut rig = cloud_rig(config);
        rig.reconstructor = rig.reconstructor.with_broadcaster(Box::new(bus.clone()));
        rig.reconstructor.reference().unwrap();
        press(&rig, &RigidTransform::identity());

        rig.reconstructor.estimate_pose(0.005, false).unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.label, IMPRINT_LABEL);
        assert_eq!(msg.frame_id, "grasp_frame");
        assert_eq!(msg.len(), 2 * rig.reconstructor.model().cloud().len());
    }

    #[test]
    fn empty_imprint_cannot_be_estimated() {
        let mut rig = cloud_rig(ReconstructorConfig::default());
        rig.reconstructor.reference().unwrap();
        let err = rig.reconstructor.estimate_pose(0.005, false).unwrap_err();
        assert!(matches!(err, ImprintError::InsufficientCorrespondences { found: 0, .. }));
        assert!(rig.reconstructor.last_pose().is_none());
    }
}
