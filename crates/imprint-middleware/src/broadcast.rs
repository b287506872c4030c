//! The [`Broadcaster`] seam and its wire message.

use chrono::{DateTime, Utc};
use imprint_types::{ImprintError, PointCloud};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Publishes point clouds for external visualization.
///
/// Implementations must not block.  Callers treat every error as
/// non-fatal: a failed broadcast never changes a pipeline result.
pub trait Broadcaster: Send {
    /// Publish `cloud`, expressed in `frame`, under `label`.
    ///
    /// Returns the number of listeners the cloud was handed to.
    fn broadcast(&self, cloud: &PointCloud, frame: &str, label: &str)
    -> Result<usize, ImprintError>;
}

/// A point cloud as it travels over the bus: single-precision xyz only,
/// the payload channels stay in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudMessage {
    pub id: Uuid,
    pub stamp: DateTime<Utc>,
    pub frame_id: String,
    pub label: String,
    pub points: Vec<[f32; 3]>,
}

impl CloudMessage {
    /// Stamp a new message with a fresh id and the current time.
    pub fn new(cloud: &PointCloud, frame: &str, label: &str) -> Self {
        let points = cloud
            .iter()
            .map(|p| {
                [
                    p.position.x as f32,
                    p.position.y as f32,
                    p.position.z as f32,
                ]
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            stamp: Utc::now(),
            frame_id: frame.to_string(),
            label: label.to_string(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Serialise to JSON for bridges that forward messages off-process.
    pub fn to_json(&self) -> Result<String, ImprintError> {
        serde_json::to_string(self).map_err(|e| ImprintError::InvalidInput(e.to_string()))
    }
}
