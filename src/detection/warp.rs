use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use std::sync::OnceLock;

use crate::detection::preprocessing;
use crate::error::VisionError;
use crate::models::{Orientation, Point, Quad, SquarePoints};

/// Order corners as top-left, top-right, bottom-right, bottom-left.
///
/// Smallest x+y is top-left, largest x+y bottom-right, smallest y-x
/// top-right, largest y-x bottom-left. Every quad must pass through here
/// before warping or cells will not line up with their labels.
pub fn order_corners(quad: &Quad) -> Quad {
    let pts = quad.corners;
    let by = |key: fn(&Point) -> f32, max: bool| -> Point {
        let mut best = pts[0];
        for p in &pts[1..] {
            let better = if max { key(p) > key(&best) } else { key(p) < key(&best) };
            if better {
                best = *p;
            }
        }
        best
    };
    let sum = |p: &Point| p.x + p.y;
    let diff = |p: &Point| p.y - p.x;
    Quad::new([by(sum, false), by(diff, false), by(sum, true), by(diff, true)])
}

/// 8x8 cell geometry of the canonical board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardGrid {
    pub side: u32,
}

impl BoardGrid {
    pub fn new(side: u32) -> Self {
        Self { side }
    }

    pub fn cell_size(&self) -> u32 {
        self.side / 8
    }

    /// (x, y, width, height) of the cell at (row, col)
    pub fn cell_rect(&self, row: u8, col: u8) -> (u32, u32, u32, u32) {
        let c = self.cell_size();
        (col as u32 * c, row as u32 * c, c, c)
    }

    pub fn cell_center(&self, row: u8, col: u8) -> Point {
        let c = self.cell_size() as f32;
        Point::new((col as f32 + 0.5) * c, (row as f32 + 0.5) * c)
    }
}

/// Face-on board image plus lazily derived maps shared by the cell detectors
pub struct CanonicalBoard {
    pub gray: GrayImage,
    /// Only warped when a colour classifier needs it
    pub color: Option<RgbImage>,
    pub grid: BoardGrid,
    inverted_edges: OnceLock<GrayImage>,
}

impl CanonicalBoard {
    pub fn new(gray: GrayImage, color: Option<RgbImage>) -> Self {
        let grid = BoardGrid::new(gray.width().min(gray.height()));
        Self {
            gray,
            color,
            grid,
            inverted_edges: OnceLock::new(),
        }
    }

    /// Dilated Canny edges of the inverted board, computed on first use
    pub fn inverted_edges(&self, low: f32, high: f32) -> &GrayImage {
        self.inverted_edges.get_or_init(|| {
            let inverted = preprocessing::invert(&self.gray);
            let edges = preprocessing::detect_edges(&inverted, low, high);
            preprocessing::dilate_edges(&edges, 1)
        })
    }
}

/// Perspective-corrects a board quad into a fixed-size square image
#[derive(Debug, Clone, Copy)]
pub struct BoardWarper {
    pub side: u32,
}

impl BoardWarper {
    pub fn new(side: u32) -> Self {
        Self { side }
    }

    pub fn grid(&self) -> BoardGrid {
        BoardGrid::new(self.side)
    }

    /// Projection from image coordinates onto the canonical square
    pub fn projection(&self, quad: &Quad) -> Result<Projection, VisionError> {
        let ordered = order_corners(quad);
        if !ordered.is_convex() {
            return Err(VisionError::DegenerateBoard { reason: "not convex" });
        }
        if ordered.area() < 64.0 {
            return Err(VisionError::DegenerateBoard { reason: "area too small" });
        }
        let s = self.side as f32;
        let from = ordered.corners.map(|p| (p.x, p.y));
        let to = [(0.0, 0.0), (s, 0.0), (s, s), (0.0, s)];
        Projection::from_control_points(from, to)
            .ok_or(VisionError::DegenerateBoard { reason: "no perspective transform" })
    }

    pub fn warp(
        &self,
        img: &DynamicImage,
        quad: &Quad,
        keep_color: bool,
    ) -> Result<CanonicalBoard, VisionError> {
        let projection = self.projection(quad)?;

        let gray_src = preprocessing::to_grayscale(img);
        let mut gray = GrayImage::new(self.side, self.side);
        warp_into(&gray_src, &projection, Interpolation::Bilinear, Luma([0u8]), &mut gray);

        let color = keep_color.then(|| {
            let rgb_src = img.to_rgb8();
            let mut out = RgbImage::new(self.side, self.side);
            warp_into(&rgb_src, &projection, Interpolation::Bilinear, Rgb([0u8; 3]), &mut out);
            out
        });

        Ok(CanonicalBoard::new(gray, color))
    }

    /// Centre of every labelled cell, projected back into working-image coordinates
    pub fn square_points(
        &self,
        quad: &Quad,
        orientation: Orientation,
    ) -> Result<SquarePoints, VisionError> {
        let inverse = self.projection(quad)?.invert();
        let grid = self.grid();
        let mut points = SquarePoints::new();
        for row in 0..8u8 {
            for col in 0..8u8 {
                let c = grid.cell_center(row, col);
                let (x, y) = inverse * (c.x, c.y);
                points.insert(orientation.square_at(row, col), Point::new(x, y));
            }
        }
        Ok(points)
    }
}
