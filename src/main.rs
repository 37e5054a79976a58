use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

use boardsight::detection::annotate::annotate;
use boardsight::detection::preprocessing::load_image;
use boardsight::logging::init_logging;
use boardsight::models::SquarePoints;
use boardsight::session::{MoveExecutor, dispatch_move};
use boardsight::{BoardPipeline, Config, DetectorKind, FrameAnalyzer, PieceColor, spawn_session};

#[derive(Parser)]
#[command(name = "boardsight")]
#[command(about = "Detect chess moves from photos of a physical board")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Light piece sensitivity (0-100, soft above 100)
    #[arg(long, global = true)]
    light: Option<u32>,

    /// Dark piece sensitivity
    #[arg(long, global = true)]
    dark: Option<u32>,

    /// Empty square sensitivity
    #[arg(long, global = true)]
    empty: Option<u32>,

    /// Occupancy detector: adaptive or edge-density
    #[arg(long, global = true)]
    detector: Option<DetectorKind>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, global = true, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Compare a before and an after photo
    Compare {
        before: PathBuf,
        after: PathBuf,
        /// Write the annotated "after" board here
        #[arg(long, value_name = "OUT")]
        annotate: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the board state of one photo
    Inspect {
        image: PathBuf,
        #[arg(long, value_name = "OUT")]
        annotate: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Feed the images of a directory as a frame stream
    Watch {
        dir: PathBuf,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Your colour; only the opponent's moves are reported
        #[arg(long)]
        player: Option<PieceColor>,
        /// Print the screen points each reported move would be played at
        #[arg(long)]
        execute: bool,
    },
}

fn build_config(args: &CommonArgs) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(v) = args.light {
        config.sensitivity.light = v;
    }
    if let Some(v) = args.dark {
        config.sensitivity.dark = v;
    }
    if let Some(v) = args.empty {
        config.sensitivity.empty = v;
    }
    if let Some(kind) = args.detector {
        config.detector = kind;
    }
    config.validate()?;
    Ok(config)
}

fn build_pipeline(args: &CommonArgs, config: &Config) -> anyhow::Result<BoardPipeline> {
    let mut pipeline = BoardPipeline::new(config);
    if let Some(dir) = &args.debug_out {
        pipeline = pipeline.with_debug(dir.clone())?;
    }
    Ok(pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let config = build_config(&cli.common)?;
    let pipeline = build_pipeline(&cli.common, &config)?;

    match cli.command {
        Command::Compare {
            before,
            after,
            annotate,
            json,
        } => run_compare(pipeline, &before, &after, annotate, json),
        Command::Inspect {
            image,
            annotate,
            json,
        } => run_inspect(&pipeline, &image, annotate, json),
        Command::Watch {
            dir,
            interval_ms,
            player,
            execute,
        } => {
            let mut session = config.session.clone();
            if player.is_some() {
                session.player_color = player;
            }
            run_watch(pipeline, session, &dir, interval_ms, execute).await
        }
    }
}

fn run_compare(
    pipeline: BoardPipeline,
    before: &Path,
    after: &Path,
    annotate_out: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = pipeline.with_annotation(annotate_out.is_some());
    let report = pipeline
        .compare_files(before, after)
        .context("Failed to compare images")?;

    if let (Some(path), Some(image)) = (&annotate_out, &report.annotated) {
        image.save(path)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.moves.is_empty() {
        println!("No clear move detected");
    } else {
        for line in &report.moves {
            println!("{}", line);
        }
    }
    Ok(())
}

fn run_inspect(
    pipeline: &BoardPipeline,
    path: &Path,
    annotate_out: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let image = load_image(path)?;
    let analysis = pipeline
        .analyze_image(image, "input")
        .with_context(|| format!("Failed to analyze {}", path.display()))?;

    if let Some(out) = &annotate_out {
        annotate(&analysis.board, &analysis.readings, analysis.geometry.orientation, None).save(out)?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis.state)?);
        return Ok(());
    }

    let join = |set: &std::collections::BTreeSet<boardsight::Square>| {
        set.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(" ")
    };
    let state = &analysis.state;
    println!("Orientation: {:?}", state.orientation());
    println!("White ({}): {}", state.light().len(), join(state.light()));
    println!("Black ({}): {}", state.dark().len(), join(state.dark()));
    if !state.ambiguous().is_empty() {
        println!("Ambiguous ({}): {}", state.ambiguous().len(), join(state.ambiguous()));
    }
    if let Some(method) = analysis.located_by {
        println!("Located by: {:?}", method);
    }
    Ok(())
}

/// Prints where each move would be played instead of playing it
struct PrintExecutor;

impl MoveExecutor for PrintExecutor {
    fn execute(&self, uci: &str, points: &SquarePoints) -> anyhow::Result<()> {
        let (from, to) = uci.split_at(2);
        for label in [from, to] {
            let square: boardsight::Square = label.parse()?;
            if let Some(p) = points.get(&square) {
                println!("    {} at ({:.0}, {:.0})", label, p.x, p.y);
            }
        }
        Ok(())
    }
}

async fn run_watch(
    pipeline: BoardPipeline,
    session: boardsight::SessionConfig,
    dir: &Path,
    interval_ms: u64,
    execute: bool,
) -> anyhow::Result<()> {
    let frames = list_images(dir)?;
    if frames.is_empty() {
        anyhow::bail!("No images found in {}", dir.display());
    }

    let analyzer: Arc<dyn FrameAnalyzer> = Arc::new(pipeline);
    let (handle, mut events) = spawn_session(analyzer, session);
    println!("Session {} watching {} frames", handle.id(), frames.len());

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let at = event.at.format(&Rfc3339).unwrap_or_default();
            println!("{} {} (frame {})", at, event.uci, event.frame_index);
            if execute {
                if let Err(e) = dispatch_move(&PrintExecutor, &event.uci, &event.points) {
                    eprintln!("    cannot execute {}: {:#}", event.uci, e);
                }
            }
        }
    });

    for path in &frames {
        let image = load_image(path).with_context(|| format!("Failed to decode {}", path.display()))?;
        handle.submit(image);
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
    }

    let report = handle.finish().await?;
    printer.await?;

    println!(
        "Frames: {} submitted, {} dropped, {} skipped, {} processed, {} failed, {} timed out, {} noise, {} flushed",
        report.submitted,
        report.dropped,
        report.skipped,
        report.processed,
        report.failed,
        report.timed_out,
        report.noise_rejected,
        report.flushed
    );
    println!(
        "Moves reported: {} ({} events dropped, drift resets: {})",
        report.moves, report.events_dropped, report.drift_resets
    );
    Ok(())
}

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp" | "webp"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}
