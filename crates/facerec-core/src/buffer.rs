//! RGB pixel buffer: the in-memory image every pipeline stage consumes.

use crate::types::BoundingBox;
use image::{DynamicImage, RgbImage};
use std::path::Path;

const CHANNELS: usize = 3;

/// Height × width × 3 bytes of RGB, rows `stride` bytes apart.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    stride: usize,
}

impl PixelBuffer {
    /// A black image with tightly packed rows.
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width as usize * CHANNELS;
        Self {
            pixels: vec![0; stride * height as usize],
            width,
            height,
            stride,
        }
    }

    /// Wrap existing RGB bytes. Requires `stride >= width * 3` and
    /// `pixels.len() == height * stride`.
    pub fn from_raw(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        stride: usize,
    ) -> Result<Self, ImageError> {
        let min_stride = width as usize * CHANNELS;
        if stride < min_stride {
            return Err(ImageError::StrideTooSmall {
                stride,
                min: min_stride,
            });
        }
        let expected = height as usize * stride;
        if pixels.len() != expected {
            return Err(ImageError::InvalidLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            stride,
        })
    }

    /// Decode an image file (any format the `image` crate reads) into RGB.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let decoded = image::open(path).map_err(|source| ImageError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(
            path = %path.display(),
            width = decoded.width(),
            height = decoded.height(),
            "decoded image"
        );
        Ok(Self::from_dynamic(&decoded))
    }

    pub fn from_dynamic(img: &DynamicImage) -> Self {
        Self::from_rgb_image(img.to_rgb8())
    }

    pub fn from_rgb_image(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            pixels: img.into_raw(),
            width,
            height,
            stride: width as usize * CHANNELS,
        }
    }

    /// Copy into a tightly packed `image::RgbImage`.
    pub fn to_rgb_image(&self) -> RgbImage {
        let row = self.width as usize * CHANNELS;
        let mut packed = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.stride;
            packed.extend_from_slice(&self.pixels[start..start + row]);
        }
        // Length matches width * height * 3 by construction.
        RgbImage::from_raw(self.width, self.height, packed)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `(height, width, channels)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, CHANNELS)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGB at `(x, y)`, or `None` outside the image.
    pub fn get(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let off = y as usize * self.stride + x as usize * CHANNELS;
        Some([self.pixels[off], self.pixels[off + 1], self.pixels[off + 2]])
    }

    /// Write RGB at `(x, y)`. Out-of-bounds writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let off = y as usize * self.stride + x as usize * CHANNELS;
        self.pixels[off..off + CHANNELS].copy_from_slice(&rgb);
    }

    /// Luma (ITU-R 601) replicated into all three channels.
    pub fn to_grayscale(&self) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                if let Some([r, g, b]) = self.get(x, y) {
                    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
                    let l = luma.min(255) as u8;
                    out.set(x, y, [l, l, l]);
                }
            }
        }
        out
    }

    /// Copy the region under `rect`, clamped to the image. Regions with no
    /// area yield an empty 0×0 buffer.
    pub fn crop(&self, rect: &BoundingBox) -> Self {
        let r = rect.clamp_to(self.height, self.width);
        if r.is_empty() {
            return Self::new(0, 0);
        }
        let (w, h) = (r.width() as u32, r.height() as u32);
        let mut out = Self::new(w, h);
        let row = w as usize * CHANNELS;
        for y in 0..h as usize {
            let src = (r.top as usize + y) * self.stride + r.left as usize * CHANNELS;
            let dst = y * out.stride;
            out.pixels[dst..dst + row].copy_from_slice(&self.pixels[src..src + row]);
        }
        out
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("row stride {stride} is smaller than width * 3 = {min}")]
    StrideTooSmall { stride: usize, min: usize },
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("failed to load image '{path}': {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
}
