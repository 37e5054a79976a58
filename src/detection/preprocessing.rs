use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageReader};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::morphology::{dilate, erode};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

use crate::error::VisionError;
use crate::models::Point;

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Apply Gaussian blur to reduce noise
pub fn apply_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    gaussian_blur_f32(img, sigma)
}

/// Edge-preserving smoothing (median filter)
pub fn smooth(img: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return img.clone();
    }
    median_filter(img, radius, radius)
}

/// Detect edges using Canny edge detector
pub fn detect_edges(img: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    canny(img, low_threshold, high_threshold)
}

/// Morphological close: dilate then erode, joining broken edge segments
pub fn close_edges(edges: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return edges.clone();
    }
    erode(&dilate(edges, Norm::LInf, radius), Norm::LInf, radius)
}

pub fn dilate_edges(edges: &GrayImage, radius: u8) -> GrayImage {
    dilate(edges, Norm::LInf, radius)
}

pub fn invert(img: &GrayImage) -> GrayImage {
    let mut out = img.clone();
    image::imageops::invert(&mut out);
    out
}

pub fn count_nonzero(img: &GrayImage) -> u32 {
    img.pixels().filter(|p| p[0] > 0).count() as u32
}

/// Decode an image file, applying its EXIF orientation
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage, VisionError> {
    let decoder = ImageReader::open(path.as_ref())?
        .with_guessed_format()?
        .into_decoder()?;
    oriented(decoder)
}

/// Decode an in-memory image, applying its EXIF orientation
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, VisionError> {
    let decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    oriented(decoder)
}

fn oriented(mut decoder: impl image::ImageDecoder) -> Result<DynamicImage, VisionError> {
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// A frame resized to the working resolution
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: DynamicImage,
    /// working pixels per raw pixel
    pub scale: f32,
}

impl NormalizedImage {
    /// Map a working-resolution point back to raw frame coordinates
    pub fn to_raw(&self, p: Point) -> Point {
        p.scaled(1.0 / self.scale)
    }
}

/// Resizes raw frames so the longer side equals `working_size`
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    pub working_size: u32,
}

impl ImageNormalizer {
    pub fn new(working_size: u32) -> Self {
        Self { working_size }
    }

    pub fn normalize(&self, img: DynamicImage) -> Result<NormalizedImage, VisionError> {
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(VisionError::EmptyImage { width, height });
        }

        let long_side = width.max(height);
        let scale = self.working_size as f32 / long_side as f32;
        if (scale - 1.0).abs() < 1e-3 {
            return Ok(NormalizedImage { image: img, scale: 1.0 });
        }

        let new_w = ((width as f32 * scale).round() as u32).max(1);
        let new_h = ((height as f32 * scale).round() as u32).max(1);
        debug!(width, height, new_w, new_h, "normalizing frame");

        Ok(NormalizedImage {
            image: img.resize_exact(new_w, new_h, FilterType::Triangle),
            scale,
        })
    }
}
