use image::GrayImage;
use image::imageops;
use serde::Serialize;

use crate::config::ClassifierTuning;
use crate::detection::preprocessing;
use crate::detection::warp::CanonicalBoard;

/// Measurements of one cell that the occupancy rules work from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellFeatures {
    /// Mean of the inner crop
    pub mean: f32,
    /// Standard deviation of the inner crop
    pub std: f32,
    /// Median mean of the four corner patches
    pub bg_mean: f32,
    /// Median std of the four corner patches
    pub bg_std: f32,
    /// Canny edge pixels inside the (blurred) inner crop
    pub edge_count: u32,
    pub inner_area: u32,
    /// Fraction of inner pixels at or above `bright_pixel_level`
    pub bright_ratio: f32,
}

impl CellFeatures {
    /// Brightness of the cell relative to its own square colour
    pub fn delta(&self) -> f32 {
        self.mean - self.bg_mean
    }

    pub fn measure(board: &CanonicalBoard, row: u8, col: u8, tuning: &ClassifierTuning) -> Self {
        let (x, y, w, h) = board.grid.cell_rect(row, col);
        let gray = &board.gray;

        let margin = (w as f32 * tuning.inner_margin) as u32;
        let inner_w = w.saturating_sub(2 * margin).max(1);
        let inner_h = h.saturating_sub(2 * margin).max(1);
        let inner = imageops::crop_imm(gray, x + margin, y + margin, inner_w, inner_h).to_image();

        let (mean, std) = mean_std(&inner);
        let bright = inner
            .pixels()
            .filter(|p| p[0] >= tuning.bright_pixel_level)
            .count();
        let inner_area = inner_w * inner_h;

        let (bg_mean, bg_std) = corner_background(gray, (x, y, w, h), tuning);

        let blurred = preprocessing::apply_blur(&inner, tuning.blur_sigma);
        let edges = preprocessing::detect_edges(&blurred, tuning.canny_low, tuning.canny_high);

        Self {
            mean,
            std,
            bg_mean,
            bg_std,
            edge_count: preprocessing::count_nonzero(&edges),
            inner_area,
            bright_ratio: bright as f32 / inner_area as f32,
        }
    }
}

pub fn mean_std(img: &GrayImage) -> (f32, f32) {
    let n = (img.width() * img.height()) as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let (sum, sum_sq) = img.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    let var = (sum_sq / n - mean * mean).max(0.0);
    (mean as f32, var.sqrt() as f32)
}

/// Median mean/std of four patches near the cell corners
fn corner_background(
    gray: &GrayImage,
    (x, y, w, h): (u32, u32, u32, u32),
    tuning: &ClassifierTuning,
) -> (f32, f32) {
    let patch = ((w as f32 * tuning.corner_patch) as u32).max(2);
    let inset = (w as f32 * tuning.corner_inset) as u32;
    let far_x = (x + w).saturating_sub(inset + patch);
    let far_y = (y + h).saturating_sub(inset + patch);
    let origins = [
        (x + inset, y + inset),
        (far_x, y + inset),
        (x + inset, far_y),
        (far_x, far_y),
    ];

    let mut means = [0.0f32; 4];
    let mut stds = [0.0f32; 4];
    for (i, (px, py)) in origins.into_iter().enumerate() {
        let view = imageops::crop_imm(gray, px, py, patch, patch).to_image();
        let (m, s) = mean_std(&view);
        means[i] = m;
        stds[i] = s;
    }
    (median4(means), median4(stds))
}

fn median4(mut values: [f32; 4]) -> f32 {
    values.sort_by(f32::total_cmp);
    (values[1] + values[2]) / 2.0
}
