use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::VisionError;

/// 2D point in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self::new(self.x * factor, self.y * factor)
    }
}

/// Four board corners.
///
/// Straight out of the locator the corners carry no particular order; after
/// `detection::warp::order_corners` they are top-left, top-right,
/// bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    /// Axis-aligned rectangle, corners already in canonical order
    pub fn from_rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new([
            Point::new(x, y),
            Point::new(x + width, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        ])
    }

    pub fn centroid(&self) -> Point {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / 4.0, sy / 4.0)
    }

    /// Shoelace area. Only meaningful once the corners are ordered around the outline.
    pub fn area(&self) -> f32 {
        let mut twice = 0.0;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            twice += a.x * b.y - b.x * a.y;
        }
        (twice / 2.0).abs()
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounding_box(&self) -> (f32, f32, f32, f32) {
        self.corners.iter().fold(
            (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        )
    }

    pub fn aspect_ratio(&self) -> f32 {
        let (min_x, min_y, max_x, max_y) = self.bounding_box();
        let h = max_y - min_y;
        if h <= 0.0 {
            return 0.0;
        }
        (max_x - min_x) / h
    }

    /// True when walking the corners in order always turns the same way
    pub fn is_convex(&self) -> bool {
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let c = self.corners[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross.abs() < f32::EPSILON {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Pull every corner toward the centroid; `factor` 1.0 is the identity
    pub fn shrink(&self, factor: f32) -> Quad {
        let c = self.centroid();
        let mut corners = self.corners;
        for p in corners.iter_mut() {
            p.x = c.x + (p.x - c.x) * factor;
            p.y = c.y + (p.y - c.y) * factor;
        }
        Quad::new(corners)
    }

    pub fn scaled(&self, factor: f32) -> Quad {
        let mut corners = self.corners;
        for p in corners.iter_mut() {
            *p = p.scaled(factor);
        }
        Quad::new(corners)
    }
}

/// One of the 64 board squares, `a1`..`h8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// `file` and `rank` are zero-based (`a` = 0, rank `1` = 0)
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }

    pub fn file(&self) -> u8 {
        self.file
    }

    pub fn rank(&self) -> u8 {
        self.rank
    }

    pub fn all() -> impl Iterator<Item = Square> {
        (0..8u8).flat_map(|rank| (0..8u8).map(move |file| Square { file, rank }))
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file) as char, self.rank + 1)
    }
}

impl FromStr for Square {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(VisionError::InvalidSquare(s.to_string()));
        }
        let file = bytes[0].to_ascii_lowercase().wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(|| VisionError::InvalidSquare(s.to_string()))
    }
}

impl TryFrom<String> for Square {
    type Error = VisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Square> for String {
    fn from(square: Square) -> Self {
        square.to_string()
    }
}

/// Piece colour. Light pieces are White, dark pieces are Black.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceColor {
    Light,
    Dark,
}

impl PieceColor {
    pub fn opponent(&self) -> PieceColor {
        match self {
            PieceColor::Light => PieceColor::Dark,
            PieceColor::Dark => PieceColor::Light,
        }
    }
}

impl fmt::Display for PieceColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PieceColor::Light => write!(f, "White"),
            PieceColor::Dark => write!(f, "Black"),
        }
    }
}

impl FromStr for PieceColor {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "white" | "light" | "w" => Ok(PieceColor::Light),
            "black" | "dark" | "b" => Ok(PieceColor::Dark),
            _ => Err(VisionError::InvalidColor(s.to_string())),
        }
    }
}

/// Which side of the canonical grid the light pieces started on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Row 0 is rank 8, column 0 is file a
    #[default]
    LightAtBottom,
    /// Row 0 is rank 1, column 0 is file h
    DarkAtBottom,
}

impl Orientation {
    pub fn flipped(&self) -> Orientation {
        match self {
            Orientation::LightAtBottom => Orientation::DarkAtBottom,
            Orientation::DarkAtBottom => Orientation::LightAtBottom,
        }
    }

    /// Label of the canonical grid cell at (row, col), both in 0..8
    pub fn square_at(&self, row: u8, col: u8) -> Square {
        debug_assert!(row < 8 && col < 8);
        match self {
            Orientation::LightAtBottom => Square { file: col, rank: 7 - row },
            Orientation::DarkAtBottom => Square { file: 7 - col, rank: row },
        }
    }

    /// Inverse of `square_at`
    pub fn cell_of(&self, square: Square) -> (u8, u8) {
        match self {
            Orientation::LightAtBottom => (7 - square.rank, square.file),
            Orientation::DarkAtBottom => (square.rank, 7 - square.file),
        }
    }
}

/// Square label → pixel position in the raw frame, for downstream move execution
pub type SquarePoints = BTreeMap<Square, Point>;

/// Occupancy snapshot of one processed frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardState {
    light: BTreeSet<Square>,
    dark: BTreeSet<Square>,
    ambiguous: BTreeSet<Square>,
    orientation: Orientation,
    quad: Option<Quad>,
}

impl BoardState {
    /// Build a state; fails if any square appears in more than one set
    pub fn from_parts(
        light: BTreeSet<Square>,
        dark: BTreeSet<Square>,
        ambiguous: BTreeSet<Square>,
        orientation: Orientation,
        quad: Option<Quad>,
    ) -> Result<Self, VisionError> {
        if let Some(sq) = light.intersection(&dark).next() {
            return Err(VisionError::OverlappingSquares(*sq));
        }
        if let Some(sq) = ambiguous.iter().find(|sq| light.contains(sq) || dark.contains(sq)) {
            return Err(VisionError::OverlappingSquares(*sq));
        }
        Ok(Self {
            light,
            dark,
            ambiguous,
            orientation,
            quad,
        })
    }

    pub fn new(light: BTreeSet<Square>, dark: BTreeSet<Square>) -> Result<Self, VisionError> {
        Self::from_parts(light, dark, BTreeSet::new(), Orientation::default(), None)
    }

    /// Convenience constructor from square labels such as `"e4"`
    pub fn from_labels(light: &[&str], dark: &[&str]) -> Result<Self, VisionError> {
        let parse = |labels: &[&str]| -> Result<BTreeSet<Square>, VisionError> {
            labels.iter().map(|l| l.parse()).collect()
        };
        Self::new(parse(light)?, parse(dark)?)
    }

    pub fn light(&self) -> &BTreeSet<Square> {
        &self.light
    }

    pub fn dark(&self) -> &BTreeSet<Square> {
        &self.dark
    }

    pub fn ambiguous(&self) -> &BTreeSet<Square> {
        &self.ambiguous
    }

    pub fn pieces(&self, color: PieceColor) -> &BTreeSet<Square> {
        match color {
            PieceColor::Light => &self.light,
            PieceColor::Dark => &self.dark,
        }
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn quad(&self) -> Option<&Quad> {
        self.quad.as_ref()
    }

    /// Light + dark + ambiguous squares
    pub fn occupied_count(&self) -> usize {
        self.light.len() + self.dark.len() + self.ambiguous.len()
    }

    pub fn color_at(&self, square: Square) -> Option<PieceColor> {
        if self.light.contains(&square) {
            Some(PieceColor::Light)
        } else if self.dark.contains(&square) {
            Some(PieceColor::Dark)
        } else {
            None
        }
    }

    /// Same pieces on the same squares, ignoring geometry
    pub fn same_occupancy(&self, other: &BoardState) -> bool {
        self.light == other.light && self.dark == other.dark && self.ambiguous == other.ambiguous
    }
}

/// Outcome of comparing two consecutive board states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MoveResult {
    Moved {
        color: PieceColor,
        from: Square,
        to: Square,
    },
    Captured {
        color: PieceColor,
        from: Square,
        at: Square,
    },
    NoneDetected,
}

impl MoveResult {
    pub fn color(&self) -> Option<PieceColor> {
        match self {
            MoveResult::Moved { color, .. } | MoveResult::Captured { color, .. } => Some(*color),
            MoveResult::NoneDetected => None,
        }
    }

    /// 4-character UCI-style string such as `e2e4`
    pub fn uci(&self) -> Option<String> {
        match self {
            MoveResult::Moved { from, to, .. } => Some(format!("{}{}", from, to)),
            MoveResult::Captured { from, at, .. } => Some(format!("{}{}", from, at)),
            MoveResult::NoneDetected => None,
        }
    }

    /// Human-readable form: `White moved e2e4`, `Black captured d5e4`
    pub fn describe(&self) -> Option<String> {
        match self {
            MoveResult::Moved { color, from, to } => Some(format!("{} moved {}{}", color, from, to)),
            MoveResult::Captured { color, from, at } => {
                Some(format!("{} captured {}{}", color, from, at))
            }
            MoveResult::NoneDetected => None,
        }
    }
}
