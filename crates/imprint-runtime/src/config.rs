//! Reconstructor configuration – read from / written to a TOML file, with
//! `IMPRINT_*` environment overrides.
//!
//! ```toml
//! reconstruction_frame = "grasp_frame"
//! threshold = 0.005
//! object_name = "allen"
//! estimation_type = "icp3d"
//! broadcast_imprint = false
//!
//! [filter]
//! angles_deg = [10.0, -25.0, 20.0, -20.0]
//!
//! [icp]
//! max_iterations_3d = 30
//! ```

use std::fs;
use std::path::Path;

use imprint_perception::filter::DEFAULT_ANGLES_DEG;
use imprint_perception::icp::{EstimationKind, IcpConfig};
use imprint_perception::object_model::ObjectModelKind;
use imprint_types::ImprintError;
use serde::{Deserialize, Serialize};

/// Cone filter offsets, in degrees, about the y, y, x and x axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_angles")]
    pub angles_deg: [f64; 4],
}

fn default_angles() -> [f64; 4] {
    DEFAULT_ANGLES_DEG
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            angles_deg: default_angles(),
        }
    }
}

/// Everything a [`Reconstructor`][crate::reconstructor::Reconstructor] needs
/// besides its sensors and transform source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructorConfig {
    /// Common frame the imprint is expressed in.
    #[serde(default = "default_reconstruction_frame")]
    pub reconstruction_frame: String,

    /// Contact distance threshold (m), shared by both extraction strategies.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Tool template to align, e.g. `"allen"` or `"marker"`.
    #[serde(default = "default_object_name")]
    pub object_name: String,

    /// `"icp3d"` or `"icp2d"`.
    #[serde(default = "default_estimation_type")]
    pub estimation_type: String,

    /// Publish every imprint handed to the estimator.
    #[serde(default)]
    pub broadcast_imprint: bool,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub icp: IcpConfig,
}

fn default_reconstruction_frame() -> String {
    "grasp_frame".to_string()
}
fn default_threshold() -> f64 {
    0.005
}
fn default_object_name() -> String {
    "allen".to_string()
}
fn default_estimation_type() -> String {
    "icp3d".to_string()
}

impl Default for ReconstructorConfig {
    fn default() -> Self {
        Self {
            reconstruction_frame: default_reconstruction_frame(),
            threshold: default_threshold(),
            object_name: default_object_name(),
            estimation_type: default_estimation_type(),
            broadcast_imprint: false,
            filter: FilterConfig::default(),
            icp: IcpConfig::default(),
        }
    }
}

impl ReconstructorConfig {
    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// [`ImprintError::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ImprintError> {
        if self.reconstruction_frame.is_empty() {
            return Err(ImprintError::Configuration(
                "reconstruction_frame must not be empty".to_string(),
            ));
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ImprintError::Configuration(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if self.icp.max_iterations_3d == 0 || self.icp.max_iterations_2d == 0 {
            return Err(ImprintError::Configuration(
                "icp iteration caps must be at least 1".to_string(),
            ));
        }
        if self.filter.angles_deg.iter().any(|a| !a.is_finite()) {
            return Err(ImprintError::Configuration(
                "filter angles must be finite".to_string(),
            ));
        }
        self.object_kind()?;
        self.estimation_kind()?;
        Ok(())
    }

    pub fn object_kind(&self) -> Result<ObjectModelKind, ImprintError> {
        self.object_name.parse()
    }

    pub fn estimation_kind(&self) -> Result<EstimationKind, ImprintError> {
        self.estimation_type.parse()
    }
}

/// Load a config from `path`.  Returns `None` if the file does not exist.
///
/// Environment overrides are applied to the loaded value.
pub fn load_from(path: &Path) -> Result<Option<ReconstructorConfig>, ImprintError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        ImprintError::Io(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: ReconstructorConfig = toml::from_str(&raw)
        .map_err(|e| ImprintError::Configuration(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `IMPRINT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `IMPRINT_RECONSTRUCTION_FRAME` | `reconstruction_frame` |
/// | `IMPRINT_THRESHOLD` | `threshold` |
/// | `IMPRINT_OBJECT` | `object_name` |
/// | `IMPRINT_ESTIMATION` | `estimation_type` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut ReconstructorConfig) {
    if let Ok(v) = std::env::var("IMPRINT_RECONSTRUCTION_FRAME") {
        cfg.reconstruction_frame = v;
    }
    if let Ok(v) = std::env::var("IMPRINT_THRESHOLD")
        && let Ok(threshold) = v.parse::<f64>()
    {
        cfg.threshold = threshold;
    }
    if let Ok(v) = std::env::var("IMPRINT_OBJECT") {
        cfg.object_name = v;
    }
    if let Ok(v) = std::env::var("IMPRINT_ESTIMATION") {
        cfg.estimation_type = v;
    }
}

/// Save `cfg` to `path` as pretty TOML, creating parent directories.
pub fn save_to(cfg: &ReconstructorConfig, path: &Path) -> Result<(), ImprintError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ImprintError::Io(format!("failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ImprintError::Configuration(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        ImprintError::Io(format!("failed to write config at {}: {e}", path.display()))
    })
}
