//! Continuous mode: session state machine over real frames and the tokio
//! runtime's buffering, timeout and cancellation accounting.

mod common;

use boardsight::detection::BoardGeometry;
use boardsight::session::Observation;
use boardsight::{
    BoardPipeline, BoardState, CaptureSession, FrameAnalyzer, FrameOutcome, MoveResult, Orientation,
    PieceColor, Quad, SessionConfig, SessionPhase, VisionError, spawn_session,
};
use common::*;
use image::DynamicImage;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn session_tracks_moves_and_recovers_from_drift() -> anyhow::Result<()> {
    let config = test_config();
    let pipeline = BoardPipeline::new(&config);
    let mut session = CaptureSession::new(config.session.clone());

    let start = starting_position();
    let e4 = play(&start, "e2", "e4");

    let outcome = session.process_frame(&pipeline, render_board(&start), "f0");
    assert_eq!(outcome, FrameOutcome::Initialized { occupied: 32 });
    assert_eq!(session.phase(), SessionPhase::Tracking);

    let outcome = session.process_frame(&pipeline, render_board(&e4), "f1");
    assert_eq!(
        outcome,
        FrameOutcome::Moved(MoveResult::Moved {
            color: PieceColor::Light,
            from: sq("e2"),
            to: sq("e4"),
        })
    );

    // tracking warps the cached quad, so a blank frame classifies as an
    // empty board and is rejected as noise rather than failing
    let outcome = session.process_frame(&pipeline, blank_frame(), "f2");
    assert!(matches!(outcome, FrameOutcome::NoiseRejected { expected: 32, .. }));
    assert_eq!(session.state().map(|s| s.occupied_count()), Some(32));
    Ok(())
}

#[test]
fn board_removed_while_tracking_ends_in_drift_reset() {
    let config = test_config();
    let threshold = config.session.noise_threshold;
    let pipeline = BoardPipeline::new(&config);
    let mut session = CaptureSession::new(config.session.clone());

    let start = starting_position();
    let outcome = session.process_frame(&pipeline, render_board(&start), "start");
    assert_eq!(outcome, FrameOutcome::Initialized { occupied: 32 });

    for i in 1..threshold {
        let outcome = session.process_frame(&pipeline, blank_frame(), &format!("gone{}", i));
        assert!(matches!(outcome, FrameOutcome::NoiseRejected { got: 0, .. }), "{:?}", outcome);
        assert_eq!(session.phase(), SessionPhase::Tracking);
    }
    let outcome = session.process_frame(&pipeline, blank_frame(), "gone");
    assert_eq!(outcome, FrameOutcome::DriftReset { failures: threshold });
    assert_eq!(session.phase(), SessionPhase::Error);

    // full detection again: no board is a failure, the board coming back re-initializes
    let outcome = session.process_frame(&pipeline, blank_frame(), "still gone");
    assert_eq!(outcome, FrameOutcome::Failed { consecutive: 1 });
    let outcome = session.process_frame(&pipeline, render_board(&play(&start, "e2", "e4")), "back");
    assert_eq!(outcome, FrameOutcome::Initialized { occupied: 32 });
    assert_eq!(session.phase(), SessionPhase::Tracking);
}

#[test]
fn detecting_phase_counts_missing_boards_until_drift() {
    let config = test_config();
    let pipeline = BoardPipeline::new(&config);
    let mut session = CaptureSession::new(config.session.clone());

    let outcomes: Vec<FrameOutcome> = (0..3)
        .map(|i| session.process_frame(&pipeline, blank_frame(), &format!("blank{}", i)))
        .collect();
    assert_eq!(outcomes[0], FrameOutcome::Failed { consecutive: 1 });
    assert_eq!(outcomes[1], FrameOutcome::Failed { consecutive: 2 });
    assert_eq!(outcomes[2], FrameOutcome::DriftReset { failures: 3 });
    assert_eq!(session.phase(), SessionPhase::Error);

    let outcome = session.process_frame(&pipeline, render_board(&starting_position()), "back");
    assert_eq!(outcome, FrameOutcome::Initialized { occupied: 32 });
}

/// Replays scripted states, optionally sleeping per frame
struct Scripted {
    states: Mutex<Vec<BoardState>>,
    delay: Duration,
}

impl Scripted {
    fn new(states: Vec<BoardState>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(states),
            delay,
        })
    }
}

impl FrameAnalyzer for Scripted {
    fn analyze(
        &self,
        _frame: DynamicImage,
        _cached: Option<&BoardGeometry>,
        _label: &str,
    ) -> Result<Observation, VisionError> {
        std::thread::sleep(self.delay);
        let mut states = self.states.lock().unwrap();
        if states.is_empty() {
            return Err(VisionError::BoardNotFound);
        }
        let mut points = BTreeMap::new();
        points.insert(sq("e2"), boardsight::Point::new(10.0, 20.0));
        Ok(Observation {
            state: states.remove(0),
            geometry: BoardGeometry {
                quad: Quad::from_rect(0.0, 0.0, 100.0, 100.0),
                orientation: Orientation::LightAtBottom,
                points: Arc::new(points),
            },
        })
    }
}

fn state(light: &[&str], dark: &[&str]) -> BoardState {
    BoardState::from_labels(light, dark).unwrap()
}

fn frame() -> DynamicImage {
    DynamicImage::new_luma8(8, 8)
}

fn session_config() -> SessionConfig {
    SessionConfig {
        queue_capacity: 8,
        frame_timeout_ms: 5_000,
        ..SessionConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn moves_are_emitted_as_events() -> anyhow::Result<()> {
    let analyzer = Scripted::new(
        vec![
            state(&["e2"], &["e7"]),
            state(&["e4"], &["e7"]),
            state(&["e4"], &["e5"]),
        ],
        Duration::ZERO,
    );
    let (handle, mut events) = spawn_session(analyzer, session_config());
    for _ in 0..3 {
        assert!(handle.submit(frame()));
    }
    let report = handle.finish().await?;

    let first = events.recv().await.expect("first move");
    assert_eq!(first.uci, "e2e4");
    assert_eq!(first.frame_index, 1);
    assert!(first.points.contains_key(&sq("e2")));
    let second = events.recv().await.expect("second move");
    assert_eq!(second.uci, "e7e5");
    assert!(events.recv().await.is_none());

    assert_eq!(report.submitted, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.moves, 2);
    assert_eq!(report.final_state, Some(state(&["e4"], &["e5"])));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn own_moves_are_not_reported() -> anyhow::Result<()> {
    let analyzer = Scripted::new(
        vec![
            state(&["e2"], &["e7"]),
            state(&["e4"], &["e7"]),
            state(&["e4"], &["e5"]),
        ],
        Duration::ZERO,
    );
    let config = SessionConfig {
        player_color: Some(PieceColor::Light),
        ..session_config()
    };
    let (handle, mut events) = spawn_session(analyzer, config);
    for _ in 0..3 {
        handle.submit(frame());
    }
    let report = handle.finish().await?;

    let only = events.recv().await.expect("enemy move");
    assert_eq!(only.uci, "e7e5");
    assert_eq!(only.result.color(), Some(PieceColor::Dark));
    assert!(events.recv().await.is_none());
    assert_eq!(report.own_moves, 1);
    assert_eq!(report.moves, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_queue_drops_and_stop_flushes() -> anyhow::Result<()> {
    let states = (0..10).map(|_| state(&["a1"], &[])).collect();
    let analyzer = Scripted::new(states, Duration::from_millis(200));
    let config = SessionConfig {
        queue_capacity: 1,
        ..session_config()
    };
    let (handle, _events) = spawn_session(analyzer, config);

    let accepted = (0..6).filter(|_| handle.submit(frame())).count();
    assert!(accepted <= 2, "accepted {}", accepted);
    let report = handle.stop().await?;

    assert_eq!(report.submitted, 6);
    assert!(report.dropped >= 4);
    assert_eq!(
        report.submitted,
        report.dropped + report.skipped + report.processed + report.flushed
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_frames_time_out_and_count_as_failures() -> anyhow::Result<()> {
    let states = (0..3).map(|_| state(&["a1"], &[])).collect();
    let analyzer = Scripted::new(states, Duration::from_millis(300));
    let config = SessionConfig {
        frame_timeout_ms: 20,
        ..session_config()
    };
    let (handle, _events) = spawn_session(analyzer, config);
    for _ in 0..3 {
        handle.submit(frame());
        // let the timed-out analysis finish before the next frame arrives
        tokio::time::sleep(Duration::from_millis(600)).await;
    }
    let report = handle.finish().await?;

    assert_eq!(report.processed, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.timed_out, 3);
    assert_eq!(report.drift_resets, 1);
    assert!(report.final_state.is_none());
    Ok(())
}

/// Slow analyzer that records how many analyses ever ran at once
struct Gauge {
    running: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl FrameAnalyzer for Gauge {
    fn analyze(
        &self,
        _frame: DynamicImage,
        _cached: Option<&BoardGeometry>,
        _label: &str,
    ) -> Result<Observation, VisionError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Err(VisionError::BoardNotFound)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_analysis_blocks_new_ones_until_it_finishes() -> anyhow::Result<()> {
    let gauge = Arc::new(Gauge {
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        delay: Duration::from_millis(250),
    });
    let config = SessionConfig {
        queue_capacity: 2,
        frame_timeout_ms: 20,
        ..session_config()
    };
    let capacity = config.queue_capacity;
    let (handle, _events) = spawn_session(gauge.clone(), config);

    for _ in 0..8 {
        handle.submit(frame());
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    let report = handle.finish().await?;

    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= capacity + 1, "peak {}", peak);
    assert_eq!(peak, 1);
    assert_eq!(gauge.running.load(Ordering::SeqCst), 0);
    assert!(report.timed_out >= 1);
    assert!(report.skipped >= 1);
    assert_eq!(
        report.submitted,
        report.dropped + report.skipped + report.processed + report.flushed
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_listener_loses_events_not_memory() -> anyhow::Result<()> {
    let analyzer = Scripted::new(
        vec![
            state(&["e2"], &["e7"]),
            state(&["e4"], &["e7"]),
            state(&["e4"], &["e5"]),
        ],
        Duration::ZERO,
    );
    let config = SessionConfig {
        event_capacity: 1,
        ..session_config()
    };
    let (handle, mut events) = spawn_session(analyzer, config);
    for _ in 0..3 {
        handle.submit(frame());
    }
    let report = handle.finish().await?;

    assert_eq!(report.moves, 2);
    assert_eq!(report.events_dropped, 1);
    assert_eq!(events.recv().await.map(|e| e.uci).as_deref(), Some("e2e4"));
    assert!(events.recv().await.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn real_frames_through_the_runtime() -> anyhow::Result<()> {
    let config = test_config();
    let analyzer: Arc<dyn FrameAnalyzer> = Arc::new(BoardPipeline::new(&config));
    let (handle, mut events) = spawn_session(analyzer, config.session.clone());

    let start = starting_position();
    let after = play(&start, "d2", "d4");
    handle.submit(render_board(&start));
    handle.submit(render_board(&after));
    let report = handle.finish().await?;

    let event = events.recv().await.expect("move event");
    assert_eq!(event.uci, "d2d4");
    assert_eq!(event.points.len(), 64);
    assert_eq!(report.failed, 0);
    Ok(())
}
