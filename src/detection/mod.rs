pub mod annotate;
pub mod classifier;
pub mod locate;
pub mod orientation;
pub mod preprocessing;
pub mod warp;

use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::VisionError;
use crate::models::{BoardState, Orientation, Quad, SquarePoints};
use crate::pipeline::PipelineContext;

use classifier::{CellReading, ColorClassifier, SquareClassifier};
use locate::{BoardLocator, LocateMethod};
use preprocessing::{ImageNormalizer, NormalizedImage};
use warp::{BoardWarper, CanonicalBoard};

/// Board geometry worth keeping between frames of one camera setup.
///
/// Stored in raw frame coordinates so it survives a change of working scale.
#[derive(Debug, Clone)]
pub struct BoardGeometry {
    /// Warp target (already shrunk), raw frame pixels
    pub quad: Quad,
    pub orientation: Orientation,
    /// Cell centres in raw frame pixels
    pub points: Arc<SquarePoints>,
}

/// Everything one pipeline run produced
pub struct FrameAnalysis {
    pub state: BoardState,
    pub readings: Vec<CellReading>,
    pub geometry: BoardGeometry,
    pub board: CanonicalBoard,
    /// `None` when the cached geometry was reused
    pub located_by: Option<LocateMethod>,
}

/// Runs normalize → locate → warp → orient → classify on single frames
pub struct BoardDetector {
    pub normalizer: ImageNormalizer,
    pub locator: BoardLocator,
    pub warper: BoardWarper,
    pub classifier: SquareClassifier,
    inner_margin: f32,
}

impl BoardDetector {
    pub fn new(config: &Config) -> Self {
        Self {
            normalizer: ImageNormalizer::new(config.locator.working_size),
            locator: BoardLocator::new(config.locator.clone()),
            warper: BoardWarper::new(config.locator.canonical_size),
            classifier: SquareClassifier::from_config(config),
            inner_margin: config.tuning.inner_margin,
        }
    }

    pub fn with_color_classifier(mut self, classifier: Arc<dyn ColorClassifier>) -> Self {
        self.classifier = self.classifier.with_color_classifier(classifier);
        self
    }

    /// Full detection, or tracking when `cached` geometry is given
    pub fn analyze(
        &self,
        frame: DynamicImage,
        cached: Option<&BoardGeometry>,
        context: &PipelineContext,
        label: &str,
    ) -> Result<FrameAnalysis, VisionError> {
        match cached {
            Some(geometry) => self.track(frame, geometry, context, label),
            None => self.detect(frame, context, label),
        }
    }

    /// Locate the board from scratch and resolve its orientation
    pub fn detect(
        &self,
        frame: DynamicImage,
        context: &PipelineContext,
        label: &str,
    ) -> Result<FrameAnalysis, VisionError> {
        self.locate_and_classify(frame, None, context, label)
    }

    /// Locate the board from scratch but keep an orientation resolved earlier
    /// for the same setup
    pub fn detect_oriented(
        &self,
        frame: DynamicImage,
        orientation: Orientation,
        context: &PipelineContext,
        label: &str,
    ) -> Result<FrameAnalysis, VisionError> {
        self.locate_and_classify(frame, Some(orientation), context, label)
    }

    fn locate_and_classify(
        &self,
        frame: DynamicImage,
        known: Option<Orientation>,
        context: &PipelineContext,
        label: &str,
    ) -> Result<FrameAnalysis, VisionError> {
        context.save_stage(0, "input", label, &frame)?;
        let normalized = self.normalizer.normalize(frame)?;
        context.save_stage(1, "normalized", label, &normalized.image)?;

        let maps = self.locator.edge_maps(&normalized.image);
        context.save_gray(2, "edges", label, &maps.edges)?;
        context.save_gray(3, "closed", label, &maps.closed)?;

        let location = self
            .locator
            .locate_in_edges(&maps.closed)
            .ok_or(VisionError::BoardNotFound)?;
        debug!(method = ?location.method, quad = ?location.inner, "board located");

        let board = self
            .warper
            .warp(&normalized.image, &location.inner, self.classifier.needs_color())?;
        context.save_gray(4, "warped", label, &board.gray)?;

        let orientation = known
            .unwrap_or_else(|| orientation::resolve_orientation(&board, self.inner_margin));
        let points = self.raw_points(&location.inner, orientation, &normalized)?;
        let geometry = BoardGeometry {
            quad: location.inner.scaled(1.0 / normalized.scale),
            orientation,
            points: Arc::new(points),
        };

        let (state, readings) =
            self.classifier
                .board_state(&board, orientation, Some(geometry.quad))?;
        info!(
            light = state.light().len(),
            dark = state.dark().len(),
            ambiguous = state.ambiguous().len(),
            ?orientation,
            detector = self.classifier.detector_name(),
            "board detected"
        );
        self.save_annotated(context, label, &board, &readings, orientation)?;

        Ok(FrameAnalysis {
            state,
            readings,
            geometry,
            board,
            located_by: Some(location.method),
        })
    }

    /// Reuse cached geometry: skip localisation and orientation
    pub fn track(
        &self,
        frame: DynamicImage,
        geometry: &BoardGeometry,
        context: &PipelineContext,
        label: &str,
    ) -> Result<FrameAnalysis, VisionError> {
        context.save_stage(0, "input", label, &frame)?;
        let normalized = self.normalizer.normalize(frame)?;
        let quad = geometry.quad.scaled(normalized.scale);

        let board = self
            .warper
            .warp(&normalized.image, &quad, self.classifier.needs_color())?;
        context.save_gray(4, "warped", label, &board.gray)?;

        let (state, readings) =
            self.classifier
                .board_state(&board, geometry.orientation, Some(geometry.quad))?;
        debug!(occupied = state.occupied_count(), "frame tracked");
        self.save_annotated(context, label, &board, &readings, geometry.orientation)?;

        Ok(FrameAnalysis {
            state,
            readings,
            geometry: geometry.clone(),
            board,
            located_by: None,
        })
    }

    fn raw_points(
        &self,
        quad: &Quad,
        orientation: Orientation,
        normalized: &NormalizedImage,
    ) -> Result<SquarePoints, VisionError> {
        let mut points = self.warper.square_points(quad, orientation)?;
        for p in points.values_mut() {
            *p = normalized.to_raw(*p);
        }
        Ok(points)
    }

    fn save_annotated(
        &self,
        context: &PipelineContext,
        label: &str,
        board: &CanonicalBoard,
        readings: &[CellReading],
        orientation: Orientation,
    ) -> Result<(), VisionError> {
        if !context.debug_enabled() {
            return Ok(());
        }
        let annotated = annotate::annotate(board, readings, orientation, None);
        context.save_stage(5, "annotated", label, &DynamicImage::ImageRgb8(annotated))
    }
}
