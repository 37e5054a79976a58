use image::RgbImage;
use serde::Serialize;

/// Answer of an external piece-colour classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorVerdict {
    Light,
    Dark,
    Ambiguous,
}

/// External binary colour classifier.
///
/// Receives one occupied square cropped from the canonical board and resized
/// to the classifier's input size. Must be a pure function of the image.
pub trait ColorClassifier: Send + Sync {
    fn classify(&self, square: &RgbImage) -> ColorVerdict;

    /// Side of the square image the classifier expects
    fn input_size(&self) -> u32 {
        64
    }
}

impl<F> ColorClassifier for F
where
    F: Fn(&RgbImage) -> ColorVerdict + Send + Sync,
{
    fn classify(&self, square: &RgbImage) -> ColorVerdict {
        self(square)
    }
}
