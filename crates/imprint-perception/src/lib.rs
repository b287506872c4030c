//! `imprint-perception` – contact imprint extraction and pose estimation.
//!
//! Turns paired tactile sensor readings into the contact imprint of a
//! grasped tool and aligns a synthetic template to it.
//!
//! # Modules
//!
//! - [`transform`] – [`TransformService`][transform::TransformService] and
//!   [`TransformBuffer`][transform::TransformBuffer]: resolve rigid
//!   transforms between named frames; [`CoordinateTransformer`][transform::CoordinateTransformer]
//!   applies them to point clouds.
//! - [`octree`] – [`Octree`][octree::Octree]: spatial index for ball and
//!   nearest-neighbour queries.
//! - [`filter`] – [`ConeFilter`][filter::ConeFilter]: drops points seen at
//!   grazing angles.
//! - [`reference`] – [`ReferenceManager`][reference::ReferenceManager]:
//!   baseline readings per sensor with a rebuildable index cache.
//! - [`extraction`] – [`ImprintExtractor`][extraction::ImprintExtractor]:
//!   tree-search and depth-difference contact extraction.
//! - [`object_model`] – [`ObjectModel`][object_model::ObjectModel]: the
//!   closed registry of tool templates.
//! - [`icp`] – [`PoseEstimator`][icp::PoseEstimator]: 3-D and 2-D projected
//!   ICP.

pub mod extraction;
pub mod filter;
pub mod icp;
pub mod object_model;
pub mod octree;
pub mod reference;
pub mod transform;
