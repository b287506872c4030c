//! Synthetic tool templates for pose estimation.
//!
//! Every known tool is approximated by two parallel rectangular grids of
//! points at `x = ±offset`, spanning the tool's width along Y and its
//! contact length along Z.  The templates are deterministic and carry a zero
//! payload.

use std::fmt;
use std::str::FromStr;

use imprint_types::{ImprintError, Point, PointCloud};

/// Nominal tool radius (m) used by the generic two-plane template.
const TOOL_RADIUS: f64 = 0.005;
/// Nominal tool height (m); grids span a tenth of it on each side of zero.
const TOOL_HEIGHT: f64 = 0.12;

/// The closed set of tool templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectModelKind {
    Allen,
    Marker,
    Pen,
    Spatula,
    Paddle,
    Planes,
}

impl ObjectModelKind {
    pub const ALL: [ObjectModelKind; 6] = [
        ObjectModelKind::Allen,
        ObjectModelKind::Marker,
        ObjectModelKind::Pen,
        ObjectModelKind::Spatula,
        ObjectModelKind::Paddle,
        ObjectModelKind::Planes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ObjectModelKind::Allen => "allen",
            ObjectModelKind::Marker => "marker",
            ObjectModelKind::Pen => "pen",
            ObjectModelKind::Spatula => "spatula",
            ObjectModelKind::Paddle => "paddle",
            ObjectModelKind::Planes => "planes",
        }
    }

    fn plane_pair(self) -> PlanePair {
        let half_z = TOOL_HEIGHT * 0.1;
        match self {
            ObjectModelKind::Allen => PlanePair::new(0.0025, 30, half_z, 50, 0.003),
            ObjectModelKind::Marker => PlanePair::new(0.0025, 30, half_z, 50, 0.01),
            ObjectModelKind::Pen => PlanePair::new(0.0025, 30, half_z, 50, 0.006),
            ObjectModelKind::Spatula => PlanePair::new(0.0025, 50, 0.01, 50, 0.009),
            ObjectModelKind::Paddle => PlanePair::new(0.01, 30, half_z, 50, 0.011),
            ObjectModelKind::Planes => {
                PlanePair::new(TOOL_RADIUS * 0.5, 10, half_z, 30, TOOL_RADIUS * 1.2)
            }
        }
    }
}

impl fmt::Display for ObjectModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectModelKind {
    type Err = ImprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| {
                let options: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                ImprintError::Configuration(format!(
                    "unknown object model '{s}'. Available options: {}",
                    options.join(", ")
                ))
            })
    }
}

/// Grid parameters of a two-plane template.
#[derive(Debug, Clone, Copy)]
struct PlanePair {
    half_y: f64,
    ny: usize,
    half_z: f64,
    nz: usize,
    offset_x: f64,
}

impl PlanePair {
    fn new(half_y: f64, ny: usize, half_z: f64, nz: usize, offset_x: f64) -> Self {
        Self {
            half_y,
            ny,
            half_z,
            nz,
            offset_x,
        }
    }

    /// `+x` plane first, then `-x`; each plane is Z-major, Y-minor.
    fn points(&self) -> Vec<Point> {
        let ys = linspace(-self.half_y, self.half_y, self.ny);
        let zs = linspace(-self.half_z, self.half_z, self.nz);
        let mut points = Vec::with_capacity(2 * ys.len() * zs.len());
        for x in [self.offset_x, -self.offset_x] {
            for &z in &zs {
                points.extend(ys.iter().map(|&y| Point::new(x, y, z)));
            }
        }
        points
    }
}

/// `n` evenly spaced samples over `[start, end]`, endpoints included.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// An immutable, named point-cloud template.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectModel {
    kind: ObjectModelKind,
    cloud: PointCloud,
}

impl ObjectModel {
    pub fn new(kind: ObjectModelKind) -> Self {
        Self {
            kind,
            cloud: PointCloud::new(kind.plane_pair().points()),
        }
    }

    /// Look a template up by name; unknown names are a configuration error.
    pub fn from_name(name: &str) -> Result<Self, ImprintError> {
        Ok(Self::new(name.parse()?))
    }

    pub fn kind(&self) -> ObjectModelKind {
        self.kind
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in ObjectModelKind::ALL {
            assert_eq!(kind.name().parse::<ObjectModelKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_is_a_configuration_error() {
        let err = ObjectModel::from_name("hammer").unwrap_err();
        match err {
            ImprintError::Configuration(msg) => {
                assert!(msg.contains("hammer"));
                assert!(msg.contains("allen"));
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn allen_template_layout() {
        let model = ObjectModel::from_name("allen").unwrap();
        let pts = &model.cloud().points;
        assert_eq!(pts.len(), 2 * 30 * 50);
        // First plane at +x, grid starts at (-y, -z) and walks Y fastest.
        assert!((pts[0].position - Point3::new(0.003, -0.0025, -0.012)).norm() < 1e-12);
        assert!((pts[1].position.y - (-0.0025 + 0.005 / 29.0)).abs() < 1e-12);
        assert_eq!(pts[1].position.z, pts[0].position.z);
        assert!((pts[30].position.z - (-0.012 + 0.024 / 49.0)).abs() < 1e-12);
        assert_eq!(pts[1500].position.x, -0.003);
        assert!(pts.iter().all(|p| p.payload == [0.0; 3]));
    }

    #[test]
    fn spatula_and_planes_sizes() {
        assert_eq!(ObjectModel::new(ObjectModelKind::Spatula).cloud().len(), 2 * 50 * 50);
        let planes = ObjectModel::new(ObjectModelKind::Planes);
        assert_eq!(planes.cloud().len(), 2 * 10 * 30);
        assert!((planes.cloud().points[0].position.x - 0.006).abs() < 1e-12);
    }

    #[test]
    fn linspace_includes_endpoints() {
        let v = linspace(-1.0, 1.0, 5);
        assert_eq!(v, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(linspace(0.0, 1.0, 1), vec![0.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }
}
