//! `imprint-runtime` – the reconstruction pipeline.
//!
//! # Modules
//!
//! - [`reconstructor`] – [`Reconstructor`][reconstructor::Reconstructor]:
//!   captures the sensor reference, extracts contact imprints in the
//!   reconstruction frame and estimates the tool pose with warm starts.
//! - [`config`] – [`ReconstructorConfig`][config::ReconstructorConfig]:
//!   TOML-backed settings with `IMPRINT_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   installs the global `tracing` subscriber (compact or JSON).

pub mod config;
pub mod reconstructor;
pub mod telemetry;

pub use config::ReconstructorConfig;
pub use reconstructor::Reconstructor;
pub use telemetry::init_tracing;
