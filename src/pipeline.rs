use image::{DynamicImage, GrayImage, RgbImage};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::detection::classifier::ColorClassifier;
use crate::detection::preprocessing::load_image;
use crate::detection::{BoardDetector, BoardGeometry, FrameAnalysis, annotate};
use crate::diff::diff_states;
use crate::error::VisionError;
use crate::models::{BoardState, MoveResult};
use crate::session::{FrameAnalyzer, Observation};

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Context available to every stage of a run
#[derive(Clone, Debug, Default)]
pub struct PipelineContext {
    pub debug: Option<DebugConfig>,
}

impl PipelineContext {
    /// Enable debug mode with output directory.
    /// The directory must be empty or non-existent
    pub fn with_debug(output_dir: impl Into<PathBuf>) -> Result<Self, VisionError> {
        let output_dir = output_dir.into();
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(VisionError::Config(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        Ok(Self {
            debug: Some(DebugConfig { output_dir }),
        })
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.is_some()
    }

    /// Save a stage image as `<dir>/<NN>_<stage>/<label>.png`
    pub fn save_stage(
        &self,
        index: usize,
        stage: &str,
        label: &str,
        image: &DynamicImage,
    ) -> Result<(), VisionError> {
        let Some(path) = self.stage_path(index, stage, label)? else {
            return Ok(());
        };
        image.save(&path)?;
        debug!(path = %path.display(), "saved debug image");
        Ok(())
    }

    /// Grayscale variant of `save_stage`; nothing is cloned when debug is off
    pub fn save_gray(
        &self,
        index: usize,
        stage: &str,
        label: &str,
        image: &GrayImage,
    ) -> Result<(), VisionError> {
        let Some(path) = self.stage_path(index, stage, label)? else {
            return Ok(());
        };
        image.save(&path)?;
        debug!(path = %path.display(), "saved debug image");
        Ok(())
    }

    fn stage_path(&self, index: usize, stage: &str, label: &str) -> Result<Option<PathBuf>, VisionError> {
        let Some(debug_config) = &self.debug else {
            return Ok(None);
        };
        let stage_dir = debug_config.output_dir.join(format!(
            "{:02}_{}",
            index,
            stage.to_lowercase().replace(' ', "_")
        ));
        std::fs::create_dir_all(&stage_dir)?;
        Ok(Some(stage_dir.join(format!("{}.png", label))))
    }
}

/// Result of single-pair mode
#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub before: BoardState,
    pub after: BoardState,
    pub result: MoveResult,
    /// Zero or one human-readable move strings
    pub moves: Vec<String>,
    #[serde(skip)]
    pub annotated: Option<RgbImage>,
}

/// Single-image and before/after analysis on top of `BoardDetector`
pub struct BoardPipeline {
    detector: Arc<BoardDetector>,
    context: PipelineContext,
    annotate: bool,
}

impl BoardPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            detector: Arc::new(BoardDetector::new(config)),
            context: PipelineContext::default(),
            annotate: false,
        }
    }

    /// Enable debug mode with output directory.
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: impl Into<PathBuf>) -> Result<Self, VisionError> {
        self.context = PipelineContext::with_debug(output_dir)?;
        Ok(self)
    }

    /// Render an annotated image of the "after" board in pair reports
    pub fn with_annotation(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    /// Must be called before the detector is shared with a session
    pub fn with_color_classifier(mut self, classifier: Arc<dyn ColorClassifier>) -> Self {
        if let Some(detector) = Arc::get_mut(&mut self.detector) {
            detector.classifier = detector.classifier.clone().with_color_classifier(classifier);
        } else {
            warn!("detector already shared; colour classifier ignored");
        }
        self
    }

    pub fn detector(&self) -> Arc<BoardDetector> {
        Arc::clone(&self.detector)
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Run the full pipeline on one image
    pub fn analyze_image(&self, image: DynamicImage, label: &str) -> Result<FrameAnalysis, VisionError> {
        self.detector.detect(image, &self.context, label)
    }

    /// Single-pair mode. `BoardNotFound` on either image is returned as an error.
    ///
    /// Orientation is resolved once, from "before"; "after" is located again
    /// but labelled with the same orientation.
    pub fn compare(&self, before: DynamicImage, after: DynamicImage) -> Result<PairReport, VisionError> {
        let first = self.analyze_image(before, "before")?;
        let orientation = first.geometry.orientation;
        let second = self
            .detector
            .detect_oriented(after, orientation, &self.context, "after")?;
        debug!(?orientation, "after image labelled with the before orientation");

        let result = diff_states(&first.state, &second.state);
        let moves: Vec<String> = result.describe().into_iter().collect();
        info!(result = ?result, "pair compared");

        let annotated = self.annotate.then(|| {
            annotate::annotate(
                &second.board,
                &second.readings,
                second.geometry.orientation,
                Some(&result),
            )
        });

        Ok(PairReport {
            before: first.state,
            after: second.state,
            result,
            moves,
            annotated,
        })
    }

    pub fn compare_files(
        &self,
        before: impl AsRef<Path>,
        after: impl AsRef<Path>,
    ) -> Result<PairReport, VisionError> {
        let before = load_image(before)?;
        let after = load_image(after)?;
        self.compare(before, after)
    }
}

impl FrameAnalyzer for BoardPipeline {
    fn analyze(
        &self,
        frame: DynamicImage,
        cached: Option<&BoardGeometry>,
        label: &str,
    ) -> Result<Observation, VisionError> {
        self.detector
            .analyze(frame, cached, &self.context, label)
            .map(Observation::from)
    }
}
