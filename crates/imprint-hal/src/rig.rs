//! [`SensorRig`] – the left/right sensor pair of a tactile gripper.
//!
//! Both sensors of a rig share one modality.  Depth rigs read the camera
//! intrinsics once, when the rig is built, and attach them to every reading.

use imprint_types::{
    CameraIntrinsics, DepthReading, ImprintError, SensorReading, SensorSide, Sided,
};
use tracing::debug;

use crate::sensor::{DepthSensor, PointCloudSensor};

/// What a rig's sensors produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorModality {
    PointCloud,
    Depth,
}

/// A depth sensor with its cached intrinsics.
pub struct DepthChannel {
    sensor: Box<dyn DepthSensor>,
    intrinsics: CameraIntrinsics,
}

impl DepthChannel {
    pub fn new(mut sensor: Box<dyn DepthSensor>) -> Result<Self, ImprintError> {
        let intrinsics = sensor.get_camera_info()?;
        Ok(Self { sensor, intrinsics })
    }

    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    fn read(&mut self) -> Result<DepthReading, ImprintError> {
        Ok(DepthReading {
            image: self.sensor.get_depth_image()?,
            intrinsics: self.intrinsics,
            frame: self.sensor.optical_frame().to_string(),
        })
    }
}

/// Paired tactile sensors.
pub enum SensorRig {
    PointCloud(Sided<Box<dyn PointCloudSensor>>),
    Depth(Sided<DepthChannel>),
}

impl SensorRig {
    /// A rig of two point-cloud sensors.
    pub fn point_cloud(right: Box<dyn PointCloudSensor>, left: Box<dyn PointCloudSensor>) -> Self {
        SensorRig::PointCloud(Sided::new(right, left))
    }

    /// A rig of two depth sensors; reads both cameras' intrinsics.
    ///
    /// # Errors
    ///
    /// Propagates the failure of either `get_camera_info` call.
    pub fn depth(
        right: Box<dyn DepthSensor>,
        left: Box<dyn DepthSensor>,
    ) -> Result<Self, ImprintError> {
        Ok(SensorRig::Depth(Sided::new(
            DepthChannel::new(right)?,
            DepthChannel::new(left)?,
        )))
    }

    pub fn modality(&self) -> SensorModality {
        match self {
            SensorRig::PointCloud(_) => SensorModality::PointCloud,
            SensorRig::Depth(_) => SensorModality::Depth,
        }
    }

    /// Identifier of the sensor on `side`.
    pub fn sensor_id(&self, side: SensorSide) -> &str {
        match self {
            SensorRig::PointCloud(s) => s.get(side).id(),
            SensorRig::Depth(s) => s.get(side).sensor.id(),
        }
    }

    /// Capture one reading from the sensor on `side`.
    ///
    /// `frame_hint` is forwarded to point-cloud sensors and ignored by depth
    /// sensors, which always report their optical frame.
    pub fn read(
        &mut self,
        side: SensorSide,
        frame_hint: Option<&str>,
    ) -> Result<SensorReading, ImprintError> {
        let reading = match self {
            SensorRig::PointCloud(s) => {
                SensorReading::PointCloud(s.get_mut(side).get_point_cloud(frame_hint)?)
            }
            SensorRig::Depth(s) => SensorReading::Depth(s.get_mut(side).read()?),
        };
        debug!(%side, frame = reading.frame(), "sensor read");
        Ok(reading)
    }

    /// Capture one reading per side, right first.  Fails as a whole if
    /// either read fails.
    pub fn read_both(
        &mut self,
        frame_hints: Sided<Option<&str>>,
    ) -> Result<Sided<SensorReading>, ImprintError> {
        frame_hints.try_map(|side, hint| self.read(side, hint))
    }
}

impl std::fmt::Debug for SensorRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorRig")
            .field("modality", &self.modality())
            .field("right", &self.sensor_id(SensorSide::Right))
            .field("left", &self.sensor_id(SensorSide::Left))
            .finish()
    }
}
