use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::classifier::{CellReading, Occupancy};
use crate::detection::warp::CanonicalBoard;
use crate::models::{MoveResult, Orientation};

const LIGHT_PIECE: Rgb<u8> = Rgb([40, 200, 60]);
const DARK_PIECE: Rgb<u8> = Rgb([220, 40, 40]);
const AMBIGUOUS: Rgb<u8> = Rgb([230, 200, 30]);
const MOVE_HIGHLIGHT: Rgb<u8> = Rgb([40, 120, 255]);

/// Canonical board with per-square outlines: green light, red dark,
/// yellow ambiguous, blue for the from/to squares of a move
pub fn annotate(
    board: &CanonicalBoard,
    readings: &[CellReading],
    orientation: Orientation,
    highlight: Option<&MoveResult>,
) -> RgbImage {
    let mut canvas = match &board.color {
        Some(color) => color.clone(),
        None => DynamicImage::ImageLuma8(board.gray.clone()).to_rgb8(),
    };

    for reading in readings {
        let color = match reading.occupancy {
            Occupancy::Empty => continue,
            Occupancy::Light => LIGHT_PIECE,
            Occupancy::Dark => DARK_PIECE,
            Occupancy::Ambiguous => AMBIGUOUS,
        };
        outline_cell(&mut canvas, board, reading.row, reading.col, 4, color);
    }

    let squares = match highlight {
        Some(MoveResult::Moved { from, to, .. }) => vec![*from, *to],
        Some(MoveResult::Captured { from, at, .. }) => vec![*from, *at],
        _ => Vec::new(),
    };
    for square in squares {
        let (row, col) = orientation.cell_of(square);
        outline_cell(&mut canvas, board, row, col, 12, MOVE_HIGHLIGHT);
    }

    canvas
}

fn outline_cell(canvas: &mut RgbImage, board: &CanonicalBoard, row: u8, col: u8, inset: u32, color: Rgb<u8>) {
    let (x, y, w, h) = board.grid.cell_rect(row, col);
    // two nested rectangles for a visible stroke
    for offset in 0..2u32 {
        let i = inset + offset;
        if w <= 2 * i || h <= 2 * i {
            return;
        }
        let rect = Rect::at((x + i) as i32, (y + i) as i32).of_size(w - 2 * i, h - 2 * i);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
