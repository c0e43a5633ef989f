//! Common value types shared by the driver, the dispatcher and remote callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A pixel position relative to the top-left corner of the target window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// A pixel rectangle relative to the top-left corner of the target window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.x + (self.width / 2) as i32,
            self.y + (self.height / 2) as i32,
        )
    }
}

/// Screen geometry the coordinate table was measured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
    pub dpi: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1024,
            dpi: 96,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// The filled part of NanoWrite's progress bar is saturated blue.
    pub fn is_progress_blue(&self) -> bool {
        self.b > 240 && self.g < 100 && self.r < 100
    }
}

/// Holds the screenshot data
#[derive(Debug, Clone)]
pub struct ScreenshotResult {
    /// Raw RGBA pixel data, row major
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Piezo coordinates in GWL space, corrected for the z-axis inversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PiezoPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A camera picture as written by the `CapturePhoto` GWL command.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// TIFF file contents
    pub data: Vec<u8>,
    /// Contents of the accompanying `_meta.txt`
    pub metadata: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    #[serde(with = "duration_secs::option")]
    pub estimated_total: Option<Duration>,
    pub fraction: Option<f64>,
}

impl Progress {
    pub fn new(elapsed: Duration, estimated_total: Option<Duration>) -> Self {
        let fraction = estimated_total
            .filter(|total| !total.is_zero())
            .map(|total| (elapsed.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0));
        Self {
            elapsed,
            estimated_total,
            fraction,
        }
    }
}

/// Serializes durations as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.serialize_some(&d.as_secs_f64()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<f64>::deserialize(deserializer)?
                .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Parses NanoWrite's `HH:MM:SS` time fields. Seconds may carry a fraction,
/// and `MM:SS` or a bare seconds value are accepted too.
pub fn parse_hms(text: &str) -> Option<Duration> {
    let parts: Vec<f64> = text
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| *p < 0.0 || !p.is_finite()) {
        return None;
    }
    let secs = parts.iter().fold(0.0, |acc, p| acc * 60.0 + p);
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hms() {
        assert_eq!(parse_hms("01:02:03"), Some(Duration::from_secs(3723)));
        assert_eq!(parse_hms(" 00:00:07.5\r\n"), Some(Duration::from_millis(7500)));
        assert_eq!(parse_hms("02:30"), Some(Duration::from_secs(150)));
        assert_eq!(parse_hms("12"), Some(Duration::from_secs(12)));
        assert_eq!(parse_hms("1:2:3:4"), None);
        assert_eq!(parse_hms("ab:cd"), None);
        assert_eq!(parse_hms(""), None);
    }

    #[test]
    fn test_parse_hms_out_of_range() {
        assert_eq!(parse_hms("99999999999999999999:00:00"), None);
        assert_eq!(parse_hms("1e300"), None);
    }

    #[test]
    fn test_progress_fraction_is_clamped() {
        let p = Progress::new(Duration::from_secs(30), Some(Duration::from_secs(60)));
        assert_eq!(p.fraction, Some(0.5));

        let over = Progress::new(Duration::from_secs(90), Some(Duration::from_secs(60)));
        assert_eq!(over.fraction, Some(1.0));

        let unknown = Progress::new(Duration::from_secs(90), Some(Duration::ZERO));
        assert_eq!(unknown.fraction, None);
    }

    #[test]
    fn test_progress_blue() {
        assert!(Rgb::new(20, 40, 255).is_progress_blue());
        assert!(!Rgb::new(200, 200, 200).is_progress_blue());
    }
}
