//! Pixel geometry of NanoWrite's controls.
//!
//! NanoWrite is a LabView front panel without an accessibility tree, so every
//! control is addressed by where it is drawn. Positions are relative to the
//! window's top-left corner and were measured at [`Resolution::default`].

use crate::errors::NanoWriteError;
use crate::types::{Point, Rect, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlName {
    // Tabs and the mini GWL console on the advanced tab
    AdvancedSettingsTab,
    GwlConsole,
    GwlSubmit,
    CameraTab,
    GraphTab,

    // Buttons on the left
    ExchangeHolder,
    LoadStructure,
    ApproachSample,
    StartDlw,
    Abort,

    // Selectable text fields
    ProgressField,
    ProgressEstimateField,
    PiezoXField,
    PiezoYField,
    PiezoZField,
    StageXField,
    StageYField,
    StageZField,

    // Indicator pixels
    FinishedPixel,
    ZInversionPixel,

    // Message panel
    LogRegion,
}

impl fmt::Display for ControlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde's snake_case name doubles as the human readable one
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{self:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Geometry {
    Rect(Rect),
    Point(Point),
}

impl Geometry {
    fn scaled(self, factor: f64) -> Self {
        let s = |v: i32| (v as f64 * factor).round() as i32;
        let su = |v: u32| (v as f64 * factor).round() as u32;
        match self {
            Geometry::Point(p) => Geometry::Point(Point::new(s(p.x), s(p.y))),
            Geometry::Rect(r) => Geometry::Rect(Rect::new(s(r.x), s(r.y), su(r.width), su(r.height))),
        }
    }
}

/// A single entry of the table, as handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlCoordinate {
    pub name: ControlName,
    pub geometry: Geometry,
    pub baseline: Resolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateTable {
    /// NanoWrite version the geometry belongs to
    pub profile: String,
    #[serde(default)]
    pub baseline: Resolution,
    pub controls: BTreeMap<ControlName, Geometry>,
}

/// Profiles shipped with the crate.
pub const BUILTIN_PROFILES: &[&str] = &["1.7.1", "1.7.5"];

impl CoordinateTable {
    /// Returns the measured table for a known NanoWrite version.
    pub fn builtin(profile: &str) -> Option<Self> {
        // 1.7.1 and 1.7.5 share one front panel layout
        if !BUILTIN_PROFILES.contains(&profile) {
            return None;
        }

        use ControlName::*;
        let p = |x, y| Geometry::Point(Point::new(x, y));
        let controls = BTreeMap::from([
            (AdvancedSettingsTab, p(268, 40)),
            (GwlConsole, p(268, 100)),
            (GwlSubmit, p(582, 110)),
            (CameraTab, p(190, 40)),
            (GraphTab, p(140, 40)),
            (ExchangeHolder, p(50, 125)),
            (LoadStructure, p(50, 180)),
            (ApproachSample, p(50, 230)),
            (StartDlw, p(50, 510)),
            (Abort, p(50, 580)),
            (ProgressField, p(190, 610)),
            (ProgressEstimateField, p(615, 560)),
            (PiezoXField, p(720, 390)),
            (PiezoYField, p(720, 410)),
            (PiezoZField, p(720, 435)),
            (StageXField, p(820, 390)),
            (StageYField, p(820, 410)),
            (StageZField, p(820, 435)),
            (FinishedPixel, p(641, 608)),
            (ZInversionPixel, p(960, 408)),
            (LogRegion, Geometry::Rect(Rect::new(110, 640, 880, 140))),
        ]);

        Some(Self {
            profile: profile.to_string(),
            baseline: Resolution::default(),
            controls,
        })
    }

    /// Loads a human-edited table from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, NanoWriteError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            NanoWriteError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            NanoWriteError::Config(format!("invalid coordinate table {}: {e}", path.display()))
        })
    }

    /// Rescales every control for a display running at `dpi`.
    pub fn scaled_to_dpi(mut self, dpi: u32) -> Self {
        if dpi == self.baseline.dpi || self.baseline.dpi == 0 {
            return self;
        }
        let factor = dpi as f64 / self.baseline.dpi as f64;
        for geometry in self.controls.values_mut() {
            *geometry = geometry.scaled(factor);
        }
        self.baseline = Resolution {
            width: (self.baseline.width as f64 * factor).round() as u32,
            height: (self.baseline.height as f64 * factor).round() as u32,
            dpi,
        };
        self
    }

    pub fn get(&self, name: ControlName) -> Result<ControlCoordinate, NanoWriteError> {
        let geometry = *self.controls.get(&name).ok_or_else(|| {
            NanoWriteError::Config(format!(
                "control '{name}' missing from coordinate table '{}'",
                self.profile
            ))
        })?;
        Ok(ControlCoordinate {
            name,
            geometry,
            baseline: self.baseline,
        })
    }

    /// Click target of a control; rectangles resolve to their center.
    pub fn point(&self, name: ControlName) -> Result<Point, NanoWriteError> {
        Ok(match self.get(name)?.geometry {
            Geometry::Point(p) => p,
            Geometry::Rect(r) => r.center(),
        })
    }

    pub fn rect(&self, name: ControlName) -> Result<Rect, NanoWriteError> {
        match self.get(name)?.geometry {
            Geometry::Rect(r) => Ok(r),
            Geometry::Point(_) => Err(NanoWriteError::Config(format!(
                "control '{name}' is a point, a region is required"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let table = CoordinateTable::builtin("1.7.5").unwrap();
        assert_eq!(table.point(ControlName::Abort).unwrap(), Point::new(50, 580));
        assert!(table.rect(ControlName::LogRegion).is_ok());
        assert!(table.rect(ControlName::Abort).is_err());
        assert!(CoordinateTable::builtin("2.0").is_none());
    }

    #[test]
    fn test_scaling_keeps_original_at_baseline() {
        let table = CoordinateTable::builtin("1.7.1").unwrap();
        assert_eq!(table.clone().scaled_to_dpi(96), table);

        let scaled = table.scaled_to_dpi(144);
        assert_eq!(scaled.point(ControlName::Abort).unwrap(), Point::new(75, 870));
        assert_eq!(scaled.baseline.dpi, 144);
    }

    #[test]
    fn test_json_round_trip_of_edited_table() {
        let json = r#"{
            "profile": "custom",
            "controls": {
                "abort": {"x": 10, "y": 20},
                "log_region": {"x": 0, "y": 0, "width": 100, "height": 50}
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        std::fs::write(&path, json).unwrap();

        let table = CoordinateTable::from_json_file(&path).unwrap();
        assert_eq!(table.baseline, Resolution::default());
        assert_eq!(table.point(ControlName::Abort).unwrap(), Point::new(10, 20));
        assert_eq!(table.point(ControlName::LogRegion).unwrap(), Point::new(50, 25));
        assert!(matches!(
            table.point(ControlName::StartDlw),
            Err(NanoWriteError::Config(_))
        ));
    }

    #[test]
    fn test_display_uses_snake_case() {
        assert_eq!(ControlName::ZInversionPixel.to_string(), "z_inversion_pixel");
    }
}
