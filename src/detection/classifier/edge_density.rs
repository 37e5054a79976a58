use image::imageops;

use crate::config::ClassifierTuning;
use crate::detection::classifier::features::CellFeatures;
use crate::detection::classifier::{CellDetector, CellReading, Occupancy};
use crate::detection::preprocessing;
use crate::detection::warp::CanonicalBoard;

/// Fixed-threshold alternative: a cell is occupied when the dilated edges of
/// the inverted board cover more than `edge_density_ratio` of it.
///
/// Ignores the sensitivity knobs. Colour comes from the brightness delta
/// against the cell's corner background, as in the adaptive detector.
#[derive(Debug, Clone)]
pub struct EdgeDensityDetector {
    pub tuning: ClassifierTuning,
}

impl EdgeDensityDetector {
    pub fn new(tuning: ClassifierTuning) -> Self {
        Self { tuning }
    }

    pub fn edge_fraction(&self, board: &CanonicalBoard, row: u8, col: u8) -> f32 {
        let edges = board.inverted_edges(self.tuning.canny_low, self.tuning.canny_high);
        let (x, y, w, h) = board.grid.cell_rect(row, col);
        let margin = (w as f32 * self.tuning.edge_density_margin) as u32;
        let cw = w.saturating_sub(2 * margin).max(1);
        let ch = h.saturating_sub(2 * margin).max(1);
        let cell = imageops::crop_imm(edges, x + margin, y + margin, cw, ch).to_image();
        preprocessing::count_nonzero(&cell) as f32 / (cw * ch) as f32
    }
}

impl CellDetector for EdgeDensityDetector {
    fn name(&self) -> &'static str {
        "edge-density"
    }

    fn detect(&self, board: &CanonicalBoard, row: u8, col: u8) -> CellReading {
        let features = CellFeatures::measure(board, row, col, &self.tuning);
        let fraction = self.edge_fraction(board, row, col);

        let occupancy = if fraction <= self.tuning.edge_density_ratio {
            Occupancy::Empty
        } else if features.delta() > 0.0 || features.mean > self.tuning.brightness_threshold {
            Occupancy::Light
        } else {
            Occupancy::Dark
        };

        CellReading {
            row,
            col,
            occupancy,
            features,
            rule: "edge_fraction",
        }
    }
}
