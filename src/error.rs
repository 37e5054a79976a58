use crate::models::Square;

/// Errors surfaced by the vision pipeline.
///
/// `BoardNotFound` is an expected per-frame result in continuous mode and is
/// folded into the session's failure accounting there. Only single-pair mode
/// hands it to the caller.
#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("chessboard not found in image")]
    BoardNotFound,
    #[error("board outline is degenerate ({reason})")]
    DegenerateBoard { reason: &'static str },
    #[error("image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("square {0} is listed for more than one colour")]
    OverlappingSquares(Square),
    #[error("invalid square label {0:?}")]
    InvalidSquare(String),
    #[error("invalid colour {0:?} (expected white/light or black/dark)")]
    InvalidColor(String),
    #[error("frame analysis timed out after {millis} ms")]
    Timeout { millis: u64 },
    #[error("frame analysis task failed: {0}")]
    Worker(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = VisionError> = std::result::Result<T, E>;
