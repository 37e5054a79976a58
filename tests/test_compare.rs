//! Single-pair mode: before/after photos to move strings.

mod common;

use boardsight::{BoardPipeline, MoveResult, PieceColor, VisionError};
use common::*;

#[test]
fn identical_photos_report_no_move() -> anyhow::Result<()> {
    let pipeline = BoardPipeline::new(&test_config());
    let frame = render_board(&starting_position());
    let report = pipeline.compare(frame.clone(), frame)?;
    assert_eq!(report.result, MoveResult::NoneDetected);
    assert!(report.moves.is_empty());
    Ok(())
}

#[test]
fn pawn_push_is_reported() -> anyhow::Result<()> {
    let pipeline = BoardPipeline::new(&test_config());
    let before = starting_position();
    let after = play(&before, "e2", "e4");

    let report = pipeline.compare(render_board(&before), render_board(&after))?;
    assert_eq!(
        report.result,
        MoveResult::Moved {
            color: PieceColor::Light,
            from: sq("e2"),
            to: sq("e4"),
        }
    );
    assert_eq!(report.moves, vec!["White moved e2e4".to_string()]);
    Ok(())
}

#[test]
fn capture_is_reported_from_files() -> anyhow::Result<()> {
    let before = play(&play(&starting_position(), "e2", "e4"), "d7", "d5");
    let after = play(&before, "e4", "d5");
    let before_file = save_temp(&render_board(&before));
    let after_file = save_temp(&render_board(&after));

    let pipeline = BoardPipeline::new(&test_config());
    let report = pipeline.compare_files(before_file.path(), after_file.path())?;
    assert_eq!(report.moves, vec!["White captured e4d5".to_string()]);
    assert_eq!(report.after.occupied_count(), 31);
    Ok(())
}

#[test]
fn capture_on_a_corner_keeps_the_before_orientation() -> anyhow::Result<()> {
    // a8 goes from a dark piece to a light one, which alone would flip the
    // orientation read from the "after" photo
    let before = vec![
        (sq("b7"), PieceColor::Light),
        (sq("e1"), PieceColor::Light),
        (sq("a8"), PieceColor::Dark),
        (sq("e8"), PieceColor::Dark),
    ];
    let after = play(&before, "b7", "a8");

    let pipeline = BoardPipeline::new(&test_config());
    let report = pipeline.compare(render_board(&before), render_board(&after))?;

    assert_eq!(report.before.orientation(), report.after.orientation());
    assert_eq!(labels(report.after.light()), vec!["a8", "e1"]);
    assert_eq!(labels(report.after.dark()), vec!["e8"]);
    assert_eq!(
        report.result,
        MoveResult::Captured {
            color: PieceColor::Light,
            from: sq("b7"),
            at: sq("a8"),
        }
    );
    assert_eq!(report.moves, vec!["White captured b7a8".to_string()]);
    Ok(())
}

#[test]
fn missing_board_in_after_photo_fails_the_pair() {
    let pipeline = BoardPipeline::new(&test_config());
    let result = pipeline.compare(render_board(&starting_position()), blank_frame());
    assert!(matches!(result, Err(VisionError::BoardNotFound)));
}

#[test]
fn annotation_and_debug_stages_are_written() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let pipeline = BoardPipeline::new(&test_config())
        .with_debug(debug_dir.clone())?
        .with_annotation(true);

    let before = starting_position();
    let after = play(&before, "g8", "f6");
    let report = pipeline.compare(render_board(&before), render_board(&after))?;

    assert_eq!(report.moves, vec!["Black moved g8f6".to_string()]);
    let annotated = report.annotated.expect("annotated image");
    assert_eq!(annotated.width(), test_config().locator.canonical_size);

    for stage in ["00_input", "01_normalized", "02_edges", "03_closed", "04_warped", "05_annotated"] {
        for label in ["before", "after"] {
            let path = debug_dir.join(stage).join(format!("{}.png", label));
            assert!(path.exists(), "missing {}", path.display());
        }
    }
    Ok(())
}

#[test]
fn report_serializes_to_json() -> anyhow::Result<()> {
    let pipeline = BoardPipeline::new(&test_config());
    let before = starting_position();
    let after = play(&before, "b1", "c3");
    let report = pipeline.compare(render_board(&before), render_board(&after))?;

    let json: serde_json::Value = serde_json::to_value(&report)?;
    assert_eq!(json["result"]["kind"], "moved");
    assert_eq!(json["result"]["from"], "b1");
    assert_eq!(json["result"]["to"], "c3");
    assert_eq!(json["moves"][0], "White moved b1c3");
    Ok(())
}
