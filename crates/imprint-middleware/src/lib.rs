//! `imprint-middleware` – visualization plumbing.
//!
//! Carries intermediate point clouds (per-side imprints, the imprint handed
//! to the estimator) out of the pipeline without the pipeline caring who
//! listens.
//!
//! # Modules
//!
//! - [`broadcast`] – the fire-and-forget [`Broadcaster`] seam and the
//!   [`CloudMessage`] wire type.
//! - [`bus`] – [`ImprintBus`], a label-routed publish/subscribe bus built on
//!   Tokio broadcast channels.

pub mod broadcast;
pub mod bus;

pub use broadcast::{Broadcaster, CloudMessage};
pub use bus::{ImprintBus, LabelSubscriber};
