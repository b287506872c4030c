//! Baseline sensor state.
//!
//! A [`SideReference`] holds the undeformed reading of one sensor and, for
//! point-cloud references, an [`Octree`] over it.  The index is a cache:
//! if it is missing when an extraction needs it, it is rebuilt from the
//! stored cloud once and kept.
//!
//! [`ReferenceManager`] owns exactly one reference per side.  Replacing it
//! swaps both sides at once and drops any cached index.

use imprint_types::{DepthReading, ImprintError, PointCloudReading, SensorSide, Sided};
use tracing::warn;

use crate::octree::Octree;

/// The captured baseline reading.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceData {
    Cloud(PointCloudReading),
    Depth(DepthReading),
}

/// Reference state of a single sensor.
#[derive(Debug, Clone)]
pub struct SideReference {
    data: ReferenceData,
    index: Option<Octree>,
}

impl SideReference {
    /// A point-cloud reference with its index built eagerly.
    pub fn indexed_cloud(reading: PointCloudReading) -> Self {
        let index = Octree::from_points(&reading.cloud.positions());
        Self {
            data: ReferenceData::Cloud(reading),
            index: Some(index),
        }
    }

    /// A point-cloud reference whose index will be built on first use.
    pub fn lazy_cloud(reading: PointCloudReading) -> Self {
        Self {
            data: ReferenceData::Cloud(reading),
            index: None,
        }
    }

    pub fn depth(reading: DepthReading) -> Self {
        Self {
            data: ReferenceData::Depth(reading),
            index: None,
        }
    }

    pub fn data(&self) -> &ReferenceData {
        &self.data
    }

    /// Frame the reference was captured in.
    pub fn frame(&self) -> &str {
        match &self.data {
            ReferenceData::Cloud(r) => &r.frame,
            ReferenceData::Depth(r) => &r.frame,
        }
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Drop the cached index; the next [`index`][Self::index] call rebuilds it.
    pub fn invalidate_index(&mut self) {
        self.index = None;
    }

    /// The spatial index over this reference, rebuilt from the stored cloud
    /// if it is missing.  Depth references have no index.
    pub fn index(&mut self, side: SensorSide) -> Result<&Octree, ImprintError> {
        let ReferenceData::Cloud(reading) = &self.data else {
            return Err(ImprintError::IndexUnavailable { side });
        };
        if self.index.is_none() {
            warn!(%side, points = reading.cloud.len(), "spatial index missing, rebuilding");
        }
        let tree: &Octree = self
            .index
            .get_or_insert_with(|| Octree::from_points(&reading.cloud.positions()));
        Ok(tree)
    }
}

/// Holds the current baseline of both sensors.
#[derive(Debug, Default)]
pub struct ReferenceManager {
    sides: Option<Sided<SideReference>>,
}

impl ReferenceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_referenced(&self) -> bool {
        self.sides.is_some()
    }

    /// Install a new baseline for both sides, discarding the previous one
    /// and its indices.
    pub fn replace(&mut self, sides: Sided<SideReference>) {
        self.sides = Some(sides);
    }

    pub fn clear(&mut self) {
        self.sides = None;
    }

    pub fn get(&self, side: SensorSide) -> Result<&SideReference, ImprintError> {
        self.sides
            .as_ref()
            .map(|s| s.get(side))
            .ok_or(ImprintError::NotReferenced)
    }

    pub fn get_mut(&mut self, side: SensorSide) -> Result<&mut SideReference, ImprintError> {
        self.sides
            .as_mut()
            .map(|s| s.get_mut(side))
            .ok_or(ImprintError::NotReferenced)
    }
}
