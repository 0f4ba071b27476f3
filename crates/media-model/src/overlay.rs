//! The flattened overlay image composited onto every frame.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use veneer_common::{VeneerError, VeneerResult};

use crate::geometry::{CoverCrop, OutputGeometry};

/// Straight-alpha RGBA8 pixels, rows top to bottom, no padding.
///
/// Alpha 0 is fully transparent (video shows through); alpha 255 fully
/// covers the video.
#[derive(Clone, PartialEq, Eq)]
pub struct OverlayImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl std::fmt::Debug for OverlayImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl OverlayImage {
    /// Wrap a raw RGBA buffer. The buffer must hold exactly
    /// `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> VeneerResult<Self> {
        if width == 0 || height == 0 {
            return Err(VeneerError::overlay(format!(
                "overlay has an empty dimension ({width}x{height})"
            )));
        }
        let expected = u64::from(width) * u64::from(height) * 4;
        if pixels.len() as u64 != expected {
            return Err(VeneerError::overlay(format!(
                "overlay buffer is {} bytes, expected {expected} for {width}x{height} RGBA",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decode a PNG (or any format the linked `image` build supports).
    pub fn load_png(path: impl AsRef<Path>) -> VeneerResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VeneerError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let decoded = image::open(path)
            .map_err(|e| VeneerError::overlay(format!("{}: {e}", path.display())))?;
        Self::from_image(decoded.into_rgba8())
    }

    /// Fully transparent overlay of the given size.
    pub fn transparent(width: u32, height: u32) -> VeneerResult<Self> {
        Self::from_rgba(width, height, vec![0; width as usize * height as usize * 4])
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Whether every pixel has zero alpha.
    pub fn is_fully_transparent(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px[3] == 0)
    }

    /// Apply the cover-and-center-crop rule so the result is exactly
    /// `target` sized.
    pub fn cover_to(&self, target: OutputGeometry) -> VeneerResult<Self> {
        if self.width == target.width && self.height == target.height {
            return Ok(self.clone());
        }
        let crop = CoverCrop::compute(self.width, self.height, target)?;

        let source = RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| VeneerError::overlay("overlay buffer does not match its size"))?;

        let window = imageops::crop_imm(
            &source,
            crop.source_x,
            crop.source_y,
            crop.source_width,
            crop.source_height,
        )
        .to_image();

        let cropped = if window.dimensions() == (target.width, target.height) {
            window
        } else {
            imageops::resize(&window, target.width, target.height, FilterType::Lanczos3)
        };

        tracing::debug!(
            src = %format!("{}x{}", self.width, self.height),
            window = %format!(
                "{}x{}+{}+{}",
                crop.source_width, crop.source_height, crop.source_x, crop.source_y
            ),
            target = %target,
            "Overlay cover-cropped"
        );

        Self::from_image(cropped)
    }

    /// Encode as PNG, used by the CLI backend which hands ffmpeg a file.
    pub fn save_png(&self, path: impl AsRef<Path>) -> VeneerResult<()> {
        image::save_buffer_with_format(
            path.as_ref(),
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .map_err(|e| VeneerError::overlay(format!("cannot write overlay PNG: {e}")))
    }

    fn from_image(image: RgbaImage) -> VeneerResult<Self> {
        let (width, height) = image.dimensions();
        Self::from_rgba(width, height, image.into_raw())
    }
}
