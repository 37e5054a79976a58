//! Per-square occupancy and colour classification.
//!
//! A `CellDetector` decides empty / light / dark for one cell of the
//! canonical board. Two detectors ship: `AdaptiveDetector` (default) and
//! `EdgeDensityDetector`. An optional `ColorClassifier` can override the
//! colour of cells the detector calls occupied; it never changes occupancy.

pub mod adaptive;
pub mod color;
pub mod edge_density;
pub mod features;

use image::imageops::{self, FilterType};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

pub use adaptive::AdaptiveDetector;
pub use color::{ColorClassifier, ColorVerdict};
pub use edge_density::EdgeDensityDetector;
pub use features::CellFeatures;

use crate::config::{Config, DetectorKind};
use crate::detection::warp::CanonicalBoard;
use crate::error::VisionError;
use crate::models::{BoardState, Orientation, Quad, Square};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Empty,
    Light,
    Dark,
    /// Occupied, but the colour classifier could not tell
    Ambiguous,
}

impl Occupancy {
    pub fn is_occupied(&self) -> bool {
        !matches!(self, Occupancy::Empty)
    }
}

/// Verdict for one canonical grid cell
#[derive(Debug, Clone, Serialize)]
pub struct CellReading {
    pub row: u8,
    pub col: u8,
    pub occupancy: Occupancy,
    pub features: CellFeatures,
    /// Name of the rule that decided
    pub rule: &'static str,
}

/// One occupancy strategy, applied cell by cell
pub trait CellDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect(&self, board: &CanonicalBoard, row: u8, col: u8) -> CellReading;
}

/// Classifies all 64 cells of a canonical board
#[derive(Clone)]
pub struct SquareClassifier {
    detector: Arc<dyn CellDetector>,
    color: Option<Arc<dyn ColorClassifier>>,
}

impl SquareClassifier {
    pub fn new(detector: Arc<dyn CellDetector>) -> Self {
        Self {
            detector,
            color: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let detector: Arc<dyn CellDetector> = match config.detector {
            DetectorKind::Adaptive => {
                Arc::new(AdaptiveDetector::new(config.sensitivity, config.tuning.clone()))
            }
            DetectorKind::EdgeDensity => Arc::new(EdgeDensityDetector::new(config.tuning.clone())),
        };
        Self::new(detector)
    }

    pub fn with_color_classifier(mut self, classifier: Arc<dyn ColorClassifier>) -> Self {
        self.color = Some(classifier);
        self
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    /// Whether the warper must keep a colour copy of the board
    pub fn needs_color(&self) -> bool {
        self.color.is_some()
    }

    /// Readings for every cell, row-major
    pub fn classify(&self, board: &CanonicalBoard) -> Vec<CellReading> {
        let mut readings = Vec::with_capacity(64);
        for row in 0..8u8 {
            for col in 0..8u8 {
                let mut reading = self.detector.detect(board, row, col);
                if reading.occupancy.is_occupied() {
                    if let Some(verdict) = self.external_color(board, row, col) {
                        reading.occupancy = match verdict {
                            ColorVerdict::Light => Occupancy::Light,
                            ColorVerdict::Dark => Occupancy::Dark,
                            ColorVerdict::Ambiguous => Occupancy::Ambiguous,
                        };
                        reading.rule = "color_classifier";
                    }
                }
                trace!(
                    row,
                    col,
                    occupancy = ?reading.occupancy,
                    rule = reading.rule,
                    mean = reading.features.mean,
                    std = reading.features.std,
                    bg = reading.features.bg_mean,
                    edges = reading.features.edge_count,
                    "cell classified"
                );
                readings.push(reading);
            }
        }
        readings
    }

    fn external_color(&self, board: &CanonicalBoard, row: u8, col: u8) -> Option<ColorVerdict> {
        let classifier = self.color.as_ref()?;
        let color = board.color.as_ref()?;
        let (x, y, w, h) = board.grid.cell_rect(row, col);
        let crop = imageops::crop_imm(color, x, y, w, h).to_image();
        let size = classifier.input_size().max(1);
        let square = imageops::resize(&crop, size, size, FilterType::Triangle);
        Some(classifier.classify(&square))
    }

    /// Classify and label the board
    pub fn board_state(
        &self,
        board: &CanonicalBoard,
        orientation: Orientation,
        quad: Option<Quad>,
    ) -> Result<(BoardState, Vec<CellReading>), VisionError> {
        let readings = self.classify(board);
        let state = state_from_readings(&readings, orientation, quad)?;
        Ok((state, readings))
    }
}

pub fn state_from_readings(
    readings: &[CellReading],
    orientation: Orientation,
    quad: Option<Quad>,
) -> Result<BoardState, VisionError> {
    let mut light = BTreeSet::new();
    let mut dark = BTreeSet::new();
    let mut ambiguous = BTreeSet::new();
    for r in readings {
        let square: Square = orientation.square_at(r.row, r.col);
        match r.occupancy {
            Occupancy::Light => light.insert(square),
            Occupancy::Dark => dark.insert(square),
            Occupancy::Ambiguous => ambiguous.insert(square),
            Occupancy::Empty => false,
        };
    }
    BoardState::from_parts(light, dark, ambiguous, orientation, quad)
}
