pub mod config;
pub mod detection;
pub mod diff;
pub mod error;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod session;

pub use config::{Config, DetectorKind, Sensitivity, SessionConfig};
pub use detection::{BoardDetector, BoardGeometry, FrameAnalysis};
pub use diff::diff_states;
pub use error::VisionError;
pub use models::{BoardState, MoveResult, Orientation, PieceColor, Point, Quad, Square, SquarePoints};
pub use pipeline::{BoardPipeline, DebugConfig, PairReport, PipelineContext};
pub use session::{
    CaptureSession, FrameAnalyzer, FrameOutcome, MoveEvent, SessionHandle, SessionPhase, SessionReport,
    spawn_session,
};
