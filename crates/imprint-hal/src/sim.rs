//! In-process simulated sensors for headless tests and offline replay.
//!
//! Each simulated sensor is a cheap handle around shared state: clone it
//! before boxing it into a [`SensorRig`][crate::rig::SensorRig] and keep the
//! clone to feed new readings in (e.g. press a tool into the membrane, or
//! replay a recorded depth image).
//!
//! # Example
//!
//! ```rust
//! use imprint_hal::sensor::PointCloudSensor;
//! use imprint_hal::sim::SimPointCloudSensor;
//! use imprint_types::{Point, PointCloud};
//!
//! let sensor = SimPointCloudSensor::new("pico_flexx_right", "right_optical");
//! let mut driver = sensor.clone();
//!
//! sensor.set_cloud(PointCloud::new(vec![Point::new(0.0, 0.0, 0.1)]));
//! let reading = driver.get_point_cloud(None).unwrap();
//! assert_eq!(reading.cloud.len(), 1);
//! assert_eq!(reading.frame, "right_optical");
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use imprint_types::{CameraIntrinsics, DepthImage, ImprintError, PointCloud, PointCloudReading};

use crate::sensor::{DepthSensor, PointCloudSensor};

fn lock<'a, T>(id: &str, state: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, ImprintError> {
    state.lock().map_err(|_| ImprintError::SensorRead {
        sensor: id.to_string(),
        details: "simulated sensor state poisoned".to_string(),
    })
}

fn injected_fault(id: &str) -> ImprintError {
    ImprintError::SensorRead {
        sensor: id.to_string(),
        details: "simulated read failure".to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Point-cloud sensor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CloudState {
    cloud: PointCloud,
    fail_next: bool,
}

/// A simulated point-cloud sensor that returns whatever cloud was last set.
#[derive(Debug, Clone)]
pub struct SimPointCloudSensor {
    id: String,
    frame: String,
    state: Arc<Mutex<CloudState>>,
}

impl SimPointCloudSensor {
    /// Create a sensor reporting clouds in `frame`.  Starts with an empty
    /// cloud.
    pub fn new(id: impl Into<String>, frame: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frame: frame.into(),
            state: Arc::default(),
        }
    }

    /// Replace the cloud returned by subsequent reads.
    pub fn set_cloud(&self, cloud: PointCloud) {
        if let Ok(mut state) = self.state.lock() {
            state.cloud = cloud;
        }
    }

    /// Make the next read fail with [`ImprintError::SensorRead`].
    pub fn fail_next_read(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = true;
        }
    }
}

impl PointCloudSensor for SimPointCloudSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_point_cloud(
        &mut self,
        _ref_frame: Option<&str>,
    ) -> Result<PointCloudReading, ImprintError> {
        let mut state = lock(&self.id, &self.state)?;
        if std::mem::take(&mut state.fail_next) {
            return Err(injected_fault(&self.id));
        }
        Ok(PointCloudReading {
            cloud: state.cloud.clone(),
            frame: self.frame.clone(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Depth sensor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DepthState {
    image: DepthImage,
    fail_next: bool,
}

/// A simulated (or replayed) depth camera.
#[derive(Debug, Clone)]
pub struct SimDepthSensor {
    id: String,
    optical_frame: String,
    intrinsics: CameraIntrinsics,
    state: Arc<Mutex<DepthState>>,
}

impl SimDepthSensor {
    pub fn new(
        id: impl Into<String>,
        optical_frame: impl Into<String>,
        image: DepthImage,
        intrinsics: CameraIntrinsics,
    ) -> Self {
        Self {
            id: id.into(),
            optical_frame: optical_frame.into(),
            intrinsics,
            state: Arc::new(Mutex::new(DepthState {
                image,
                fail_next: false,
            })),
        }
    }

    /// Replace the image returned by subsequent reads.
    pub fn set_image(&self, image: DepthImage) {
        if let Ok(mut state) = self.state.lock() {
            state.image = image;
        }
    }

    /// Make the next image read fail with [`ImprintError::SensorRead`].
    pub fn fail_next_read(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next = true;
        }
    }
}

impl DepthSensor for SimDepthSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn optical_frame(&self) -> &str {
        &self.optical_frame
    }

    fn get_depth_image(&mut self) -> Result<DepthImage, ImprintError> {
        let mut state = lock(&self.id, &self.state)?;
        if std::mem::take(&mut state.fail_next) {
            return Err(injected_fault(&self.id));
        }
        Ok(state.image.clone())
    }

    fn get_camera_info(&mut self) -> Result<CameraIntrinsics, ImprintError> {
        Ok(self.intrinsics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imprint_types::Point;

    #[test]
    fn sim_cloud_sensor_shares_state_between_clones() {
        let handle = SimPointCloudSensor::new("s", "frame");
        let mut driver = handle.clone();
        assert!(driver.get_point_cloud(None).unwrap().cloud.is_empty());

        handle.set_cloud(PointCloud::new(vec![Point::new(0.0, 0.0, 0.1); 3]));
        assert_eq!(driver.get_point_cloud(None).unwrap().cloud.len(), 3);
    }

    #[test]
    fn sim_cloud_sensor_fails_exactly_once() {
        let handle = SimPointCloudSensor::new("s", "frame");
        let mut driver = handle.clone();
        handle.fail_next_read();
        assert!(matches!(
            driver.get_point_cloud(None),
            Err(ImprintError::SensorRead { .. })
        ));
        assert!(driver.get_point_cloud(None).is_ok());
    }

    #[test]
    fn sim_depth_sensor_replays_images() {
        let k = CameraIntrinsics::new(100.0, 100.0, 0.5, 0.5);
        let handle = SimDepthSensor::new("d", "d_optical", DepthImage::filled(2, 2, 0.1), k);
        let mut driver = handle.clone();

        assert_eq!(driver.optical_frame(), "d_optical");
        assert_eq!(driver.get_camera_info().unwrap(), k);
        assert_eq!(driver.get_depth_image().unwrap().get(1, 1), Some(0.1));

        handle.set_image(DepthImage::filled(2, 2, 0.08));
        assert_eq!(driver.get_depth_image().unwrap().get(1, 1), Some(0.08));

        handle.fail_next_read();
        assert!(driver.get_depth_image().is_err());
    }
}
