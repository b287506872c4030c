//! Driver traits for tactile sensors.
//!
//! A tactile sensor exposes either a point cloud or a depth image (plus the
//! intrinsics needed to back-project it).  Drivers implement one of the two
//! traits and are paired left/right in a [`SensorRig`][crate::rig::SensorRig].

use imprint_types::{CameraIntrinsics, DepthImage, ImprintError, PointCloudReading};

/// A sensor that yields 3-D point clouds.
pub trait PointCloudSensor: Send {
    /// Stable identifier for this sensor, e.g. `"pico_flexx_right"`.
    fn id(&self) -> &str;

    /// Capture the next point cloud together with the frame it is expressed
    /// in.
    ///
    /// `ref_frame` asks the driver to express the cloud in that frame when it
    /// can; drivers that cannot honour the hint return their native frame.
    ///
    /// # Errors
    ///
    /// Returns [`ImprintError::SensorRead`] if no cloud can be captured.
    fn get_point_cloud(
        &mut self,
        ref_frame: Option<&str>,
    ) -> Result<PointCloudReading, ImprintError>;
}

/// A sensor that yields depth images.
pub trait DepthSensor: Send {
    /// Stable identifier for this sensor.
    fn id(&self) -> &str;

    /// Frame of the depth camera's optical centre.
    fn optical_frame(&self) -> &str;

    /// Capture the next depth image (metres, row-major).
    ///
    /// # Errors
    ///
    /// Returns [`ImprintError::SensorRead`] if no image can be captured.
    fn get_depth_image(&mut self) -> Result<DepthImage, ImprintError>;

    /// Pinhole intrinsics of the depth camera.
    fn get_camera_info(&mut self) -> Result<CameraIntrinsics, ImprintError>;
}
