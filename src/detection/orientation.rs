use image::GrayImage;
use tracing::debug;

use crate::detection::warp::{BoardGrid, CanonicalBoard};
use crate::models::Orientation;

/// Decide which side the light pieces sit on.
///
/// Looks at the top-left and bottom-right cells, both occupied in the
/// starting position; the brighter one holds the light piece. Only
/// trustworthy on a starting position, which is why sessions cache it.
pub fn resolve_orientation(board: &CanonicalBoard, inner_margin: f32) -> Orientation {
    let top_left = cell_mean(&board.gray, board.grid, 0, 0, inner_margin);
    let bottom_right = cell_mean(&board.gray, board.grid, 7, 7, inner_margin);
    let orientation = if top_left > bottom_right {
        Orientation::DarkAtBottom
    } else {
        Orientation::LightAtBottom
    };
    debug!(top_left, bottom_right, ?orientation, "orientation resolved");
    orientation
}

fn cell_mean(gray: &GrayImage, grid: BoardGrid, row: u8, col: u8, margin: f32) -> f32 {
    let (x, y, w, h) = grid.cell_rect(row, col);
    let mx = (w as f32 * margin) as u32;
    let my = (h as f32 * margin) as u32;
    let mut sum = 0u64;
    let mut count = 0u64;
    for py in (y + my)..(y + h - my).min(gray.height()) {
        for px in (x + mx)..(x + w - mx).min(gray.width()) {
            sum += gray.get_pixel(px, py)[0] as u64;
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { sum as f32 / count as f32 }
}
