use boardsight::{PieceColor, Square};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use tempfile::NamedTempFile;

pub const FRAME_WIDTH: u32 = 800;
pub const FRAME_HEIGHT: u32 = 600;

const BACKGROUND: u8 = 20;
const BEZEL: u8 = 80;
const LIGHT_SQUARE: u8 = 180;
const DARK_SQUARE: u8 = 90;
const LIGHT_PIECE: u8 = 250;
const DARK_PIECE: u8 = 15;
const LIGHT_STRIPE: u8 = 160;
const DARK_STRIPE: u8 = 80;

/// Outer frame: 500 px with a 10 px bezel, so the playing area is 0.96 of it
const FRAME_X: i32 = 150;
const FRAME_Y: i32 = 50;
const FRAME_SIDE: u32 = 500;
const BEZEL_WIDTH: u32 = 10;
const CELL: u32 = (FRAME_SIDE - 2 * BEZEL_WIDTH) / 8;

pub type Position = Vec<(Square, PieceColor)>;

pub fn sq(label: &str) -> Square {
    label.parse().expect("valid square label")
}

/// Standard starting position, 16 pieces per side
pub fn starting_position() -> Position {
    let mut pieces = Vec::new();
    for file in b'a'..=b'h' {
        let f = file as char;
        for rank in [1, 2] {
            pieces.push((sq(&format!("{}{}", f, rank)), PieceColor::Light));
        }
        for rank in [7, 8] {
            pieces.push((sq(&format!("{}{}", f, rank)), PieceColor::Dark));
        }
    }
    pieces
}

/// Move whatever stands on `from` to `to`, removing any piece already there
pub fn play(position: &Position, from: &str, to: &str) -> Position {
    let (from, to) = (sq(from), sq(to));
    let color = position
        .iter()
        .find(|(s, _)| *s == from)
        .map(|(_, c)| *c)
        .expect("piece on source square");
    let mut next: Position = position
        .iter()
        .filter(|(s, _)| *s != from && *s != to)
        .copied()
        .collect();
    next.push((to, color));
    next
}

/// How pieces are drawn on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceStyle {
    /// Small flat discs
    Flat,
    /// Large discs with vertical stripes, for edge-based detectors
    Striped,
}

/// Photo-like frame of the board, White (light) at the bottom
pub fn render_board(position: &[(Square, PieceColor)]) -> DynamicImage {
    render_board_with(position, PieceStyle::Flat)
}

pub fn render_board_with(position: &[(Square, PieceColor)], style: PieceStyle) -> DynamicImage {
    let mut img = GrayImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Luma([BACKGROUND]));
    draw_filled_rect_mut(
        &mut img,
        Rect::at(FRAME_X, FRAME_Y).of_size(FRAME_SIDE, FRAME_SIDE),
        Luma([BEZEL]),
    );

    let origin_x = FRAME_X + BEZEL_WIDTH as i32;
    let origin_y = FRAME_Y + BEZEL_WIDTH as i32;
    for row in 0..8u32 {
        for col in 0..8u32 {
            let shade = if (row + col) % 2 == 0 { LIGHT_SQUARE } else { DARK_SQUARE };
            let rect = Rect::at(origin_x + (col * CELL) as i32, origin_y + (row * CELL) as i32)
                .of_size(CELL, CELL);
            draw_filled_rect_mut(&mut img, rect, Luma([shade]));
        }
    }

    for (square, color) in position {
        let row = 7 - square.rank() as u32;
        let col = square.file() as u32;
        let cx = origin_x + (col * CELL + CELL / 2) as i32;
        let cy = origin_y + (row * CELL + CELL / 2) as i32;
        let shade = match color {
            PieceColor::Light => LIGHT_PIECE,
            PieceColor::Dark => DARK_PIECE,
        };
        match style {
            PieceStyle::Flat => {
                let radius = (CELL as f32 * 0.22).round() as i32;
                draw_filled_circle_mut(&mut img, (cx, cy), radius, Luma([shade]));
            }
            PieceStyle::Striped => {
                let stripe = match color {
                    PieceColor::Light => LIGHT_STRIPE,
                    PieceColor::Dark => DARK_STRIPE,
                };
                draw_striped_disc(&mut img, (cx, cy), (CELL as f32 * 0.4).round() as i32, shade, stripe);
            }
        }
    }

    DynamicImage::ImageLuma8(img)
}

/// Disc of `shade` crossed by 3 px wide vertical stripes of `stripe`
fn draw_striped_disc(img: &mut GrayImage, (cx, cy): (i32, i32), radius: i32, shade: u8, stripe: u8) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let v = if ((dx + radius) / 3) % 2 == 0 { shade } else { stripe };
            img.put_pixel((cx + dx) as u32, (cy + dy) as u32, Luma([v]));
        }
    }
}

/// Frame with no board in it
pub fn blank_frame() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(FRAME_WIDTH, FRAME_HEIGHT, Luma([BACKGROUND])))
}

/// Writes `img` to a temporary PNG that is removed when dropped
pub fn save_temp(img: &DynamicImage) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    img.save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

pub fn labels(squares: &std::collections::BTreeSet<Square>) -> Vec<String> {
    squares.iter().map(|s| s.to_string()).collect()
}
