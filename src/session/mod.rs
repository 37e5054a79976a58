//! Continuous-frame mode.
//!
//! `CaptureSession` owns one `DetectionCache` and walks the
//! `Uninitialized → Detecting → Tracking → (Error → Detecting)` state machine.
//! It is synchronous; `runtime` drives it from a tokio task.

pub mod executor;
pub mod runtime;

use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::detection::{BoardGeometry, FrameAnalysis};
use crate::diff::diff_states;
use crate::error::VisionError;
use crate::models::{BoardState, MoveResult, SquarePoints};

pub use executor::{MoveExecutor, dispatch_move};
pub use runtime::{MoveEvent, SessionHandle, SessionReport, spawn_session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    /// Full localisation every frame
    Detecting,
    /// Cached geometry, classification only
    Tracking,
    /// Drift detected; next frame re-detects
    Error,
}

/// What one analysed frame yields for the session
#[derive(Debug, Clone)]
pub struct Observation {
    pub state: BoardState,
    pub geometry: BoardGeometry,
}

impl From<FrameAnalysis> for Observation {
    fn from(analysis: FrameAnalysis) -> Self {
        Self {
            state: analysis.state,
            geometry: analysis.geometry,
        }
    }
}

/// Runs the vision pipeline on one frame; `cached` geometry means tracking
pub trait FrameAnalyzer: Send + Sync {
    fn analyze(
        &self,
        frame: DynamicImage,
        cached: Option<&BoardGeometry>,
        label: &str,
    ) -> Result<Observation, VisionError>;
}

/// Per-session cache of derived detection data. Never holds pixels.
#[derive(Debug, Default)]
pub struct DetectionCache {
    geometry: Option<BoardGeometry>,
    consecutive_failures: u32,
    consecutive_noise: u32,
    last_accepted: Option<BoardState>,
    previous: Option<BoardState>,
}

impl DetectionCache {
    pub fn geometry(&self) -> Option<&BoardGeometry> {
        self.geometry.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_noise(&self) -> u32 {
        self.consecutive_noise
    }

    pub fn last_accepted(&self) -> Option<&BoardState> {
        self.last_accepted.as_ref()
    }

    /// Accepted state before `last_accepted`
    pub fn previous(&self) -> Option<&BoardState> {
        self.previous.as_ref()
    }

    fn invalidate(&mut self) {
        *self = Self::default();
    }
}

/// Result of feeding one frame to the session
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// First accepted state after (re)detection
    Initialized { occupied: usize },
    Unchanged,
    Moved(MoveResult),
    /// Occupancy changed but not as one move or capture
    NoClearMove,
    /// Occupied count swung by more than the tolerance; state kept
    NoiseRejected { expected: usize, got: usize },
    Failed { consecutive: u32 },
    /// Failure or noise threshold reached; cache invalidated
    DriftReset { failures: u32 },
}

pub struct CaptureSession {
    id: Uuid,
    config: SessionConfig,
    phase: SessionPhase,
    cache: DetectionCache,
}

impl CaptureSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            phase: SessionPhase::Uninitialized,
            cache: DetectionCache::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Last accepted board state
    pub fn state(&self) -> Option<&BoardState> {
        self.cache.last_accepted.as_ref()
    }

    pub fn points(&self) -> Option<Arc<SquarePoints>> {
        self.cache.geometry.as_ref().map(|g| Arc::clone(&g.points))
    }

    /// Reset the cache and start detecting
    pub fn begin(&mut self) {
        self.cache.invalidate();
        self.phase = SessionPhase::Detecting;
        info!(session = %self.id, "session started");
    }

    /// Geometry for the next frame, or `None` for full detection.
    ///
    /// Moves `Uninitialized`/`Error` to `Detecting`.
    pub fn next_geometry(&mut self) -> Option<BoardGeometry> {
        match self.phase {
            SessionPhase::Uninitialized => {
                self.begin();
                None
            }
            SessionPhase::Error => {
                debug!(session = %self.id, "re-detecting after drift");
                self.phase = SessionPhase::Detecting;
                None
            }
            SessionPhase::Detecting => None,
            SessionPhase::Tracking => self.cache.geometry.clone(),
        }
    }

    /// Feed a successfully classified frame
    pub fn accept(&mut self, observation: Observation) -> FrameOutcome {
        self.cache.consecutive_failures = 0;
        if self.phase != SessionPhase::Tracking {
            info!(
                session = %self.id,
                orientation = ?observation.geometry.orientation,
                "board geometry cached"
            );
            self.cache.geometry = Some(observation.geometry);
            self.phase = SessionPhase::Tracking;
        }

        let state = observation.state;
        let Some(last) = self.cache.last_accepted.as_ref() else {
            let occupied = state.occupied_count();
            self.cache.last_accepted = Some(state);
            return FrameOutcome::Initialized { occupied };
        };

        let expected = last.occupied_count();
        let got = state.occupied_count();
        if expected.abs_diff(got) > self.config.noise_tolerance {
            self.cache.consecutive_noise += 1;
            let rejected = self.cache.consecutive_noise;
            if rejected >= self.config.noise_threshold {
                warn!(session = %self.id, rejected, expected, got, "persistent noise, invalidating cache");
                self.reset_after_drift();
                return FrameOutcome::DriftReset { failures: rejected };
            }
            debug!(session = %self.id, expected, got, rejected, "frame rejected as noise");
            return FrameOutcome::NoiseRejected { expected, got };
        }
        self.cache.consecutive_noise = 0;

        if last.same_occupancy(&state) {
            self.cache.last_accepted = Some(state);
            return FrameOutcome::Unchanged;
        }

        let result = diff_states(last, &state);
        self.cache.previous = self.cache.last_accepted.replace(state);
        match result {
            MoveResult::NoneDetected => FrameOutcome::NoClearMove,
            detected => FrameOutcome::Moved(detected),
        }
    }

    /// Count a frame that could not be classified
    pub fn record_failure(&mut self, error: &VisionError) -> FrameOutcome {
        self.cache.consecutive_failures += 1;
        let failures = self.cache.consecutive_failures;
        if failures >= self.config.failure_threshold {
            warn!(session = %self.id, failures, error = %error, "detection drift, invalidating cache");
            self.reset_after_drift();
            return FrameOutcome::DriftReset { failures };
        }
        debug!(session = %self.id, failures, error = %error, "frame failed");
        FrameOutcome::Failed { consecutive: failures }
    }

    fn reset_after_drift(&mut self) {
        self.cache.invalidate();
        self.phase = SessionPhase::Error;
    }

    /// Synchronous per-frame step
    pub fn process_frame(
        &mut self,
        analyzer: &dyn FrameAnalyzer,
        frame: DynamicImage,
        label: &str,
    ) -> FrameOutcome {
        let cached = self.next_geometry();
        match analyzer.analyze(frame, cached.as_ref(), label) {
            Ok(observation) => self.accept(observation),
            Err(error) => self.record_failure(&error),
        }
    }
}
