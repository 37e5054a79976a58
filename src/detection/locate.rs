use image::{DynamicImage, GrayImage};
use imageproc::contours::{BorderType, Contour, find_contours};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point as IPoint;
use tracing::{debug, trace};

use crate::config::LocatorParams;
use crate::detection::preprocessing;
use crate::detection::warp::order_corners;
use crate::models::{Point, Quad};

/// How the board outline was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateMethod {
    /// A 4-vertex polygon passing the area and aspect checks
    Polygon,
    /// Bounding box of the largest contour; lower confidence
    BoundingBox,
}

#[derive(Debug, Clone)]
pub struct BoardLocation {
    /// Outline as detected, corners ordered
    pub outer: Quad,
    /// `outer` shrunk toward its centroid to drop the frame; this is the warp target
    pub inner: Quad,
    pub method: LocateMethod,
}

/// Intermediate images of one locator run
pub struct EdgeMaps {
    pub edges: GrayImage,
    pub closed: GrayImage,
}

/// Finds the board outline in a normalized image
#[derive(Debug, Clone)]
pub struct BoardLocator {
    pub params: LocatorParams,
}

impl BoardLocator {
    pub fn new(params: LocatorParams) -> Self {
        Self { params }
    }

    /// Grayscale, smooth, Canny, close
    pub fn edge_maps(&self, img: &DynamicImage) -> EdgeMaps {
        let gray = preprocessing::to_grayscale(img);
        let smoothed = preprocessing::smooth(&gray, self.params.smoothing_radius);
        let edges =
            preprocessing::detect_edges(&smoothed, self.params.canny_low, self.params.canny_high);
        let closed = preprocessing::close_edges(&edges, self.params.close_radius);
        EdgeMaps { edges, closed }
    }

    /// Locate the board; `None` when the image has no contours at all
    pub fn locate_in_edges(&self, closed: &GrayImage) -> Option<BoardLocation> {
        let image_area = closed.width() as f32 * closed.height() as f32;
        let contours: Vec<Contour<i32>> = find_contours(closed);
        let external: Vec<&Contour<i32>> = contours
            .iter()
            .filter(|c| c.parent.is_none() && matches!(c.border_type, BorderType::Outer))
            .collect();
        debug!(total = contours.len(), external = external.len(), "contours found");

        if external.is_empty() {
            return None;
        }

        let (outer, method) = match self.best_polygon(&external, image_area) {
            Some(quad) => (quad, LocateMethod::Polygon),
            None => {
                let largest = external
                    .iter()
                    .max_by(|a, b| polygon_area(&a.points).total_cmp(&polygon_area(&b.points)))?;
                let quad = bounding_quad(&largest.points)?;
                debug!(?quad, "no 4-vertex candidate, falling back to bounding box");
                (quad, LocateMethod::BoundingBox)
            }
        };

        Some(BoardLocation {
            outer,
            inner: outer.shrink(self.params.shrink_factor),
            method,
        })
    }

    fn best_polygon(&self, contours: &[&Contour<i32>], image_area: f32) -> Option<Quad> {
        let mut best: Option<(f32, Quad)> = None;

        for (i, contour) in contours.iter().enumerate() {
            if contour.points.len() < 4 {
                continue;
            }
            let epsilon = self.params.approx_tolerance * arc_length(&contour.points, true);
            let poly = merge_close_vertices(
                approximate_polygon_dp(&contour.points, epsilon, true),
                epsilon,
            );
            if poly.len() != 4 {
                trace!(contour = i, vertices = poly.len(), "rejected: not a quadrilateral");
                continue;
            }

            let area = polygon_area(&contour.points);
            if area <= image_area * self.params.min_area_ratio {
                trace!(contour = i, area, "rejected: too small");
                continue;
            }

            let quad = order_corners(&Quad::new([
                to_point(poly[0]),
                to_point(poly[1]),
                to_point(poly[2]),
                to_point(poly[3]),
            ]));
            let aspect = quad.aspect_ratio();
            if aspect < self.params.min_aspect || aspect > self.params.max_aspect {
                trace!(contour = i, aspect, "rejected: not square enough");
                continue;
            }
            if !quad.is_convex() {
                trace!(contour = i, "rejected: not convex");
                continue;
            }

            if best.as_ref().is_none_or(|(a, _)| area > *a) {
                best = Some((area, quad));
            }
        }

        best.map(|(_, quad)| quad)
    }
}

fn to_point(p: IPoint<i32>) -> Point {
    Point::new(p.x as f32, p.y as f32)
}

/// Drop vertices within `epsilon` of their predecessor, wrapping around.
/// The closed approximation repeats its start point and may keep the
/// contour's last pixel right next to it.
fn merge_close_vertices(poly: Vec<IPoint<i32>>, epsilon: f64) -> Vec<IPoint<i32>> {
    let dist = |a: IPoint<i32>, b: IPoint<i32>| {
        let dx = (a.x - b.x) as f64;
        let dy = (a.y - b.y) as f64;
        (dx * dx + dy * dy).sqrt()
    };
    let mut out: Vec<IPoint<i32>> = Vec::with_capacity(poly.len());
    for p in poly {
        if out.last().is_some_and(|q| dist(*q, p) < epsilon) {
            continue;
        }
        out.push(p);
    }
    while out.len() > 1 && dist(out[0], out[out.len() - 1]) < epsilon {
        out.pop();
    }
    out
}

/// Shoelace area of a closed contour
fn polygon_area(points: &[IPoint<i32>]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice: i64 = 0;
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        twice += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (twice.abs() as f32) / 2.0
}

fn bounding_quad(points: &[IPoint<i32>]) -> Option<Quad> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(Quad::from_rect(
        min_x as f32,
        min_y as f32,
        (max_x - min_x) as f32,
        (max_y - min_y) as f32,
    ))
}
