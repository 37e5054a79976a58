use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{CaptureSession, FrameAnalyzer, FrameOutcome, Observation};
use crate::config::SessionConfig;
use crate::error::VisionError;
use crate::models::{BoardState, MoveResult, SquarePoints};

struct Frame {
    index: u64,
    image: DynamicImage,
}

type Analysis = JoinHandle<Result<Observation, VisionError>>;

/// One detected move in continuous mode
#[derive(Debug, Clone)]
pub struct MoveEvent {
    pub session: Uuid,
    pub frame_index: u64,
    pub result: MoveResult,
    /// e.g. `e2e4`
    pub uci: String,
    pub at: OffsetDateTime,
    /// Cached square → raw-frame point map, for move execution
    pub points: Arc<SquarePoints>,
}

/// Frame accounting for one session.
///
/// Every submitted frame ends up in exactly one of `dropped`, `skipped`,
/// `processed` or `flushed`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionReport {
    pub session: Uuid,
    pub submitted: u64,
    /// Queue full when submitted
    pub dropped: u64,
    /// Taken off the queue while a timed-out analysis was still running
    pub skipped: u64,
    pub processed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub noise_rejected: u64,
    pub drift_resets: u64,
    /// Still queued when the session was stopped
    pub flushed: u64,
    /// Moves reported to the listener
    pub moves: u64,
    /// Reported moves lost because the event buffer was full
    pub events_dropped: u64,
    /// Moves of `player_color`, not reported as events
    pub own_moves: u64,
    pub final_state: Option<BoardState>,
}

/// Producer side of a running session
pub struct SessionHandle {
    id: Uuid,
    frames: mpsc::Sender<Frame>,
    cancel: watch::Sender<bool>,
    worker: JoinHandle<SessionReport>,
    submitted: AtomicU64,
    dropped: AtomicU64,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, image: DynamicImage) -> bool {
        let index = self.submitted.fetch_add(1, Ordering::Relaxed);
        match self.frames.try_send(Frame { index, image }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(session = %self.id, index, "frame dropped (queue full)");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(session = %self.id, index, "frame dropped (session closed)");
                false
            }
        }
    }

    /// Cancel: the frame in flight completes, queued frames are flushed
    pub async fn stop(self) -> Result<SessionReport, VisionError> {
        self.cancel.send_replace(true);
        self.join().await
    }

    /// End of stream: process everything queued, then stop
    pub async fn finish(self) -> Result<SessionReport, VisionError> {
        self.join().await
    }

    async fn join(self) -> Result<SessionReport, VisionError> {
        let Self {
            id,
            frames,
            cancel,
            worker,
            submitted,
            dropped,
        } = self;
        drop(frames);
        let mut report = worker
            .await
            .map_err(|e| VisionError::Worker(e.to_string()))?;
        drop(cancel);

        report.submitted = submitted.into_inner();
        report.dropped = dropped.into_inner();
        info!(
            session = %id,
            submitted = report.submitted,
            dropped = report.dropped,
            skipped = report.skipped,
            processed = report.processed,
            flushed = report.flushed,
            moves = report.moves,
            "session stopped"
        );
        Ok(report)
    }
}

/// Start a session worker on the current tokio runtime.
///
/// At most one analysis runs at a time, including one that timed out and is
/// still finishing, so live frame buffers are bounded by `queue_capacity + 1`.
pub fn spawn_session(
    analyzer: Arc<dyn FrameAnalyzer>,
    config: SessionConfig,
) -> (SessionHandle, mpsc::Receiver<MoveEvent>) {
    let (frame_tx, frame_rx) = mpsc::channel(config.queue_capacity.max(1));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));

    let mut session = CaptureSession::new(config);
    session.begin();
    let id = session.id();

    let worker = tokio::spawn(run_worker(session, analyzer, frame_rx, cancel_rx, event_tx));

    let handle = SessionHandle {
        id,
        frames: frame_tx,
        cancel: cancel_tx,
        worker,
        submitted: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    };
    (handle, event_rx)
}

async fn run_worker(
    mut session: CaptureSession,
    analyzer: Arc<dyn FrameAnalyzer>,
    mut frames: mpsc::Receiver<Frame>,
    mut cancel: watch::Receiver<bool>,
    events: mpsc::Sender<MoveEvent>,
) -> SessionReport {
    let mut report = SessionReport {
        session: session.id(),
        ..Default::default()
    };
    let timeout = Duration::from_millis(session.config().frame_timeout_ms);
    let mut stalled: Option<Analysis> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.changed() => None,
            frame = frames.recv() => frame,
        };
        let Some(frame) = next else { break };

        if stalled.as_ref().is_some_and(|job| !job.is_finished()) {
            report.skipped += 1;
            debug!(session = %report.session, index = frame.index, "frame skipped (timed-out analysis still running)");
            continue;
        }
        stalled = None;

        let index = frame.index;
        let outcome =
            analyze_with_timeout(&mut session, &analyzer, frame, timeout, &mut report, &mut stalled).await;
        report.processed += 1;

        match outcome {
            FrameOutcome::Moved(result) => {
                if session.config().player_color.is_some_and(|c| result.color() == Some(c)) {
                    report.own_moves += 1;
                    debug!(session = %report.session, ?result, "own move");
                    continue;
                }
                let Some(uci) = result.uci() else { continue };
                report.moves += 1;
                info!(session = %report.session, frame = index, uci = %uci, "move detected");
                let event = MoveEvent {
                    session: report.session,
                    frame_index: index,
                    result,
                    uci,
                    at: OffsetDateTime::now_utc(),
                    points: session.points().unwrap_or_default(),
                };
                match events.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        report.events_dropped += 1;
                        warn!(session = %report.session, frame = index, "move event dropped (listener behind)");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(session = %report.session, "no event listener");
                    }
                }
            }
            FrameOutcome::NoiseRejected { .. } => report.noise_rejected += 1,
            FrameOutcome::DriftReset { .. } => report.drift_resets += 1,
            FrameOutcome::Initialized { .. }
            | FrameOutcome::Unchanged
            | FrameOutcome::NoClearMove
            | FrameOutcome::Failed { .. } => {}
        }
    }

    frames.close();
    while let Ok(frame) = frames.try_recv() {
        report.flushed += 1;
        drop(frame);
    }
    if report.flushed > 0 {
        debug!(session = %report.session, flushed = report.flushed, "flushed queued frames");
    }
    if let Some(job) = stalled.take() {
        debug!(session = %report.session, "waiting for timed-out analysis");
        if let Err(e) = job.await {
            error!(session = %report.session, error = %e, "timed-out analysis failed");
        }
    }
    report.final_state = session.state().cloned();
    report
}

async fn analyze_with_timeout(
    session: &mut CaptureSession,
    analyzer: &Arc<dyn FrameAnalyzer>,
    frame: Frame,
    timeout: Duration,
    report: &mut SessionReport,
    stalled: &mut Option<Analysis>,
) -> FrameOutcome {
    let cached = session.next_geometry();
    let analyzer = Arc::clone(analyzer);
    let label = format!("frame_{:05}", frame.index);
    let image = frame.image;
    let mut job: Analysis = task::spawn_blocking(move || analyzer.analyze(image, cached.as_ref(), &label));

    let waited = tokio::time::timeout(timeout, &mut job).await;
    match waited {
        Ok(Ok(Ok(observation))) => session.accept(observation),
        Ok(Ok(Err(error))) => {
            report.failed += 1;
            session.record_failure(&error)
        }
        Ok(Err(join_error)) => {
            error!(session = %report.session, error = %join_error, "frame worker failed");
            report.failed += 1;
            session.record_failure(&VisionError::Worker(join_error.to_string()))
        }
        Err(_) => {
            report.timed_out += 1;
            // blocking work cannot be aborted; hold the handle until it finishes
            *stalled = Some(job);
            let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            session.record_failure(&VisionError::Timeout { millis })
        }
    }
}
