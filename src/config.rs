//! Detection, classification and session settings.
//!
//! Every knob has a default; a JSON file can override any subset of them
//! (`#[serde(default)]` everywhere) and the CLI overrides the file.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::VisionError;
use crate::models::PieceColor;

/// Map a raw sensitivity knob onto the common scale.
///
/// Values up to 100 pass through; above 100 every extra point counts half.
pub fn effective(value: u32) -> f32 {
    if value <= 100 {
        value as f32
    } else {
        100.0 + (value - 100) as f32 * 0.5
    }
}

/// The three user-facing sensitivity knobs, nominally 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sensitivity {
    pub light: u32,
    pub dark: u32,
    pub empty: u32,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            light: 50,
            dark: 50,
            empty: 50,
        }
    }
}

impl Sensitivity {
    pub fn light_factor(&self) -> f32 {
        effective(self.light) / 100.0
    }

    pub fn dark_factor(&self) -> f32 {
        effective(self.dark) / 100.0
    }

    pub fn empty_factor(&self) -> f32 {
        effective(self.empty) / 100.0
    }
}

/// Empirically tuned constants of the per-cell heuristics.
///
/// Fractions are relative to the cell side, brightness values are 0-255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierTuning {
    /// Margin trimmed from each side of a cell before measuring the piece region
    pub inner_margin: f32,
    /// Side of the corner patches used for the local background estimate
    pub corner_patch: f32,
    /// Distance of the corner patches from the cell border
    pub corner_inset: f32,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,

    pub light_delta_base: f32,
    pub light_min_std_base: f32,
    pub dark_delta_base: f32,
    pub dark_min_std_base: f32,
    /// Upper bound of the std band a light piece may show
    pub max_piece_std: f32,
    /// Edge pixels per inner-crop pixel needed for an occupied call at default sensitivity
    pub edge_ratio_base: f32,

    /// Local background std above which thresholds get boosted
    pub busy_background_std: f32,
    /// Std range over which the boost ramps up to `busy_boost_max`
    pub busy_background_span: f32,
    pub busy_boost_max: f32,

    /// Absolute mean above which an edge-dense cell is called light regardless of delta
    pub brightness_threshold: f32,
    /// Absolute mean above which a textured cell is called light without edge support
    pub very_bright: f32,
    /// Pixel level counted as "bright" for the bright-pixel ratio
    pub bright_pixel_level: u8,

    pub spot_max_bright_ratio: f32,
    pub spot_edge_factor: f32,

    /// Occupied calls with std below this and few edges are dropped as noise
    pub noise_std: f32,
    pub noise_edge_factor: f32,
    /// Light calls with fewer bright pixels than this (and low std) are dropped
    pub false_light_bright_ratio: f32,

    /// Fixed edge-pixel fraction for the edge-density detector
    pub edge_density_ratio: f32,
    pub edge_density_margin: f32,
}

impl Default for ClassifierTuning {
    fn default() -> Self {
        Self {
            inner_margin: 0.25,
            corner_patch: 0.12,
            corner_inset: 0.03,
            blur_sigma: 1.0,
            canny_low: 40.0,
            canny_high: 100.0,
            light_delta_base: 25.0,
            light_min_std_base: 8.0,
            dark_delta_base: 25.0,
            dark_min_std_base: 8.0,
            max_piece_std: 100.0,
            edge_ratio_base: 0.02,
            busy_background_std: 12.0,
            busy_background_span: 24.0,
            busy_boost_max: 0.5,
            brightness_threshold: 170.0,
            very_bright: 225.0,
            bright_pixel_level: 210,
            spot_max_bright_ratio: 0.15,
            spot_edge_factor: 1.5,
            noise_std: 4.0,
            noise_edge_factor: 0.5,
            false_light_bright_ratio: 0.05,
            edge_density_ratio: 0.15,
            edge_density_margin: 0.08,
        }
    }
}

/// Board localisation and canonicalisation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Longer side of the working-resolution image
    pub working_size: u32,
    /// Median filter radius used as the edge-preserving blur
    pub smoothing_radius: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Dilate/erode radius of the morphological close
    pub close_radius: u8,
    /// Polygon approximation tolerance as a fraction of the contour perimeter
    pub approx_tolerance: f64,
    pub min_area_ratio: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
    /// Shrink toward the centroid that cuts off the physical frame
    pub shrink_factor: f32,
    /// Side of the canonical warped board image
    pub canonical_size: u32,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            working_size: 1000,
            smoothing_radius: 2,
            canny_low: 30.0,
            canny_high: 90.0,
            close_radius: 2,
            approx_tolerance: 0.02,
            min_area_ratio: 0.20,
            min_aspect: 0.7,
            max_aspect: 1.3,
            shrink_factor: 0.96,
            canonical_size: 800,
        }
    }
}

/// Continuous-mode behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Largest allowed occupied-count swing between accepted frames
    pub noise_tolerance: usize,
    /// Consecutive failures that invalidate the cached geometry
    pub failure_threshold: u32,
    /// Consecutive noise rejections that invalidate the cached geometry.
    /// A moved camera still warps cleanly, so it only shows up as noise.
    pub noise_threshold: u32,
    /// Frames buffered ahead of the worker before new ones are dropped
    pub queue_capacity: usize,
    /// Move events buffered for the listener before new ones are dropped
    pub event_capacity: usize,
    pub frame_timeout_ms: u64,
    /// When set, only moves of the other colour are reported as events
    pub player_color: Option<PieceColor>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            noise_tolerance: 3,
            failure_threshold: 3,
            noise_threshold: 5,
            queue_capacity: 4,
            event_capacity: 16,
            frame_timeout_ms: 2000,
            player_color: None,
        }
    }
}

/// Which per-cell occupancy detector the classifier runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Multi-threshold heuristic driven by the sensitivity knobs
    #[default]
    Adaptive,
    /// Fixed edge-pixel fraction on the inverted board
    EdgeDensity,
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectorKind::Adaptive => write!(f, "adaptive"),
            DetectorKind::EdgeDensity => write!(f, "edge-density"),
        }
    }
}

impl FromStr for DetectorKind {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adaptive" => Ok(DetectorKind::Adaptive),
            "edge-density" | "edge" => Ok(DetectorKind::EdgeDensity),
            other => Err(VisionError::Config(format!("unknown detector {:?}", other))),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sensitivity: Sensitivity,
    pub detector: DetectorKind,
    pub tuning: ClassifierTuning,
    pub locator: LocatorParams,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, VisionError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), VisionError> {
        let l = &self.locator;
        if l.canonical_size < 64 || l.canonical_size % 8 != 0 {
            return Err(VisionError::Config(format!(
                "canonical_size must be a multiple of 8 and at least 64, got {}",
                l.canonical_size
            )));
        }
        if l.working_size < l.canonical_size / 2 {
            return Err(VisionError::Config(format!(
                "working_size {} is too small",
                l.working_size
            )));
        }
        if !(0.0..=1.0).contains(&l.shrink_factor) || l.shrink_factor == 0.0 {
            return Err(VisionError::Config("shrink_factor must be in (0, 1]".into()));
        }
        if l.min_aspect > l.max_aspect {
            return Err(VisionError::Config("min_aspect exceeds max_aspect".into()));
        }
        let t = &self.tuning;
        if !(0.0..0.5).contains(&t.inner_margin) || !(0.0..0.5).contains(&t.edge_density_margin) {
            return Err(VisionError::Config("cell margins must be in [0, 0.5)".into()));
        }
        if t.corner_patch <= 0.0 || t.corner_inset + t.corner_patch > 0.5 {
            return Err(VisionError::Config("corner patches must fit in a cell quadrant".into()));
        }
        let s = &self.session;
        if s.queue_capacity == 0 || s.event_capacity == 0 {
            return Err(VisionError::Config("queue and event capacities must be at least 1".into()));
        }
        if s.failure_threshold == 0 || s.noise_threshold == 0 {
            return Err(VisionError::Config("failure and noise thresholds must be at least 1".into()));
        }
        Ok(())
    }
}
