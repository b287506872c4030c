//! `imprint-hal` – tactile sensor abstraction.
//!
//! - [`sensor`] – driver traits for point-cloud and depth sensors.
//! - [`rig`] – [`SensorRig`][rig::SensorRig]: the left/right pair read by
//!   the reconstructor.
//! - [`sim`] – simulated sensors for tests and offline replay.

pub mod rig;
pub mod sensor;
pub mod sim;
