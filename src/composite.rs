//! Two-layer grayscale composition and separation.
//!
//! Each matrix cell carries two bits, one per layer, fused into a single
//! intensity out of four fixed levels. The level ordering puts both `public = 1` states below the
//! midpoint, so an ordinary binary scanner thresholding the raster still
//! reads the public layer, while 4-way quantization recovers both layers.
//!
//! Persisted composites are lossless PNG; a lossy re-encode shifts block
//! means off the 4-level palette and is rejected at decompose time rather
//! than absorbed.

use std::path::Path;

use image::{GrayImage, ImageFormat, Luma};
use thiserror::Error;
use tracing::{debug, warn};

use crate::matrix::BitMatrix;

/// Cell intensities, indexed by `(public_bit << 1) | sig_bit`.
///
/// `(0,0)` white, `(0,1)` light gray, `(1,0)` dark gray, `(1,1)` black.
pub const INTENSITY_LEVELS: [u8; 4] = [255, 170, 85, 0];

/// Default rendered block size, in pixels per module.
pub const DEFAULT_SCALE: u32 = 10;

/// Smallest block size that still averages out single-pixel noise.
pub const MIN_SCALE: u32 = 2;

/// Furthest a block's mean intensity may sit from its nearest palette
/// level before the image is treated as foreign or recompressed. Half the
/// inter-level gap is 42, so this leaves a comfortable rejection band.
const MAX_LEVEL_DRIFT: u32 = 25;

/// Failure to fuse or separate the two layers.
#[derive(Debug, Error)]
pub enum LayerSeparationError {
    /// The two layers do not share dimensions.
    #[error(
        "layer dimensions differ: public {public_w}x{public_h}, signature {sig_w}x{sig_h}"
    )]
    LayerMismatch {
        public_w: usize,
        public_h: usize,
        sig_w: usize,
        sig_h: usize,
    },

    /// The configured block size is too small to decode reliably.
    #[error("scale {0} is below the minimum block size {}", MIN_SCALE)]
    ScaleTooSmall(u32),

    /// The raster does not partition into whole blocks.
    #[error("image {width}x{height} does not partition into {scale}-pixel blocks")]
    NotGridAligned {
        width: u32,
        height: u32,
        scale: u32,
    },

    /// A block's mean intensity does not cluster near any of the four
    /// expected levels; the image was re-encoded or is not a composite.
    #[error("block ({col},{row}) mean intensity {mean} is off the 4-level palette")]
    LevelDrift { col: u32, row: u32, mean: u8 },
}

/// A composed grayscale raster holding both layers.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeImage {
    pixels: GrayImage,
}

impl CompositeImage {
    /// Wrap an existing luma raster.
    pub fn from_luma(pixels: GrayImage) -> Self {
        Self { pixels }
    }

    /// Borrow the underlying raster.
    pub fn as_luma(&self) -> &GrayImage {
        &self.pixels
    }

    /// Raster width in pixels.
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Raster height in pixels.
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Persist as lossless PNG.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), image::ImageError> {
        self.pixels.save_with_format(path.as_ref(), ImageFormat::Png)
    }

    /// Load a previously persisted composite.
    pub fn load_png(path: impl AsRef<Path>) -> Result<Self, image::ImageError> {
        let pixels = image::open(path.as_ref())?.to_luma8();
        Ok(Self { pixels })
    }
}

/// Fuses two bit matrices into a 4-level raster and separates them again.
#[derive(Debug, Clone, Copy)]
pub struct CompositeCodec {
    scale: u32,
}

impl Default for CompositeCodec {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
        }
    }
}

impl CompositeCodec {
    /// Codec with an explicit block size.
    pub fn new(scale: u32) -> Result<Self, LayerSeparationError> {
        if scale < MIN_SCALE {
            return Err(LayerSeparationError::ScaleTooSmall(scale));
        }
        Ok(Self { scale })
    }

    /// Configured block size in pixels per module.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Fuse the public and signature layers into one raster.
    ///
    /// Lossless: `decompose` recovers both inputs exactly.
    pub fn compose(
        &self,
        public: &BitMatrix,
        signature: &BitMatrix,
    ) -> Result<CompositeImage, LayerSeparationError> {
        if public.width() != signature.width() || public.height() != signature.height() {
            return Err(LayerSeparationError::LayerMismatch {
                public_w: public.width(),
                public_h: public.height(),
                sig_w: signature.width(),
                sig_h: signature.height(),
            });
        }

        let scale = self.scale;
        let width = public.width() as u32 * scale;
        let height = public.height() as u32 * scale;
        let pixels = GrayImage::from_fn(width, height, |px, py| {
            let x = (px / scale) as usize;
            let y = (py / scale) as usize;
            let index = (public.get(x, y) as usize) << 1 | signature.get(x, y) as usize;
            Luma([INTENSITY_LEVELS[index]])
        });

        debug!(
            modules = public.width(),
            scale, "composed dual-layer raster"
        );
        Ok(CompositeImage { pixels })
    }

    /// Separate a composite raster back into its two layers.
    pub fn decompose(
        &self,
        image: &CompositeImage,
    ) -> Result<(BitMatrix, BitMatrix), LayerSeparationError> {
        let scale = self.scale;
        let (width, height) = image.pixels.dimensions();
        if width == 0 || height == 0 || width % scale != 0 || height % scale != 0 {
            return Err(LayerSeparationError::NotGridAligned {
                width,
                height,
                scale,
            });
        }

        let cols = width / scale;
        let rows = height / scale;
        let mut public = BitMatrix::new(cols as usize, rows as usize);
        let mut signature = BitMatrix::new(cols as usize, rows as usize);

        for row in 0..rows {
            for col in 0..cols {
                let mean = self.block_mean(&image.pixels, col, row);
                let index = nearest_level(mean);
                let drift = mean.abs_diff(u32::from(INTENSITY_LEVELS[index]));
                if drift > MAX_LEVEL_DRIFT {
                    warn!(col, row, mean, "composite block off the intensity palette");
                    return Err(LayerSeparationError::LevelDrift {
                        col,
                        row,
                        mean: mean as u8,
                    });
                }
                public.set(col as usize, row as usize, index & 0b10 != 0);
                signature.set(col as usize, row as usize, index & 0b01 != 0);
            }
        }

        Ok((public, signature))
    }

    fn block_mean(&self, pixels: &GrayImage, col: u32, row: u32) -> u32 {
        let scale = self.scale;
        let mut sum: u32 = 0;
        for py in row * scale..(row + 1) * scale {
            for px in col * scale..(col + 1) * scale {
                sum += u32::from(pixels.get_pixel(px, py).0[0]);
            }
        }
        let n = scale * scale;
        (sum + n / 2) / n
    }
}

/// Index of the palette level nearest to `mean` in 1-D intensity space.
fn nearest_level(mean: u32) -> usize {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (i, level) in INTENSITY_LEVELS.iter().enumerate() {
        let distance = mean.abs_diff(u32::from(*level));
        if distance < best_distance {
            best_distance = distance;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_pair(side: usize) -> (BitMatrix, BitMatrix) {
        let mut public = BitMatrix::new(side, side);
        let mut signature = BitMatrix::new(side, side);
        for y in 0..side {
            for x in 0..side {
                public.set(x, y, (x + y) % 2 == 0);
                signature.set(x, y, x % 3 == 0);
            }
        }
        (public, signature)
    }

    #[test]
    fn compose_decompose_round_trip() {
        let codec = CompositeCodec::default();
        let (public, signature) = checker_pair(21);
        let image = codec.compose(&public, &signature).unwrap();
        assert_eq!(image.width(), 21 * DEFAULT_SCALE);
        let (p2, s2) = codec.decompose(&image).unwrap();
        assert_eq!(public, p2);
        assert_eq!(signature, s2);
    }

    #[test]
    fn recompose_is_pixel_identical() {
        let codec = CompositeCodec::new(4).unwrap();
        let (public, signature) = checker_pair(25);
        let image = codec.compose(&public, &signature).unwrap();
        let (p2, s2) = codec.decompose(&image).unwrap();
        let again = codec.compose(&p2, &s2).unwrap();
        assert_eq!(image, again);
    }

    #[test]
    fn midpoint_threshold_recovers_public_layer() {
        // A plain binary scanner sees dark wherever the public bit is set,
        // regardless of the signature bit.
        for (index, level) in INTENSITY_LEVELS.iter().enumerate() {
            let public_bit = index & 0b10 != 0;
            assert_eq!(*level < 128, public_bit);
        }
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let codec = CompositeCodec::default();
        let public = BitMatrix::new(21, 21);
        let signature = BitMatrix::new(25, 25);
        assert!(matches!(
            codec.compose(&public, &signature),
            Err(LayerSeparationError::LayerMismatch { .. })
        ));
    }

    #[test]
    fn tiny_scale_is_rejected() {
        assert!(matches!(
            CompositeCodec::new(1),
            Err(LayerSeparationError::ScaleTooSmall(1))
        ));
    }

    #[test]
    fn unaligned_raster_is_rejected() {
        let codec = CompositeCodec::default();
        let image = CompositeImage::from_luma(GrayImage::from_pixel(205, 210, Luma([255])));
        assert!(matches!(
            codec.decompose(&image),
            Err(LayerSeparationError::NotGridAligned { .. })
        ));
    }

    #[test]
    fn off_palette_intensity_is_rejected() {
        let codec = CompositeCodec::default();
        let (public, signature) = checker_pair(21);
        let image = codec.compose(&public, &signature).unwrap();

        // Simulate lossy recompression of one block: drag it halfway
        // between two palette levels.
        let mut pixels = image.as_luma().clone();
        for py in 0..DEFAULT_SCALE {
            for px in 0..DEFAULT_SCALE {
                pixels.put_pixel(px, py, Luma([128]));
            }
        }
        let degraded = CompositeImage::from_luma(pixels);
        assert!(matches!(
            codec.decompose(&degraded),
            Err(LayerSeparationError::LevelDrift { .. })
        ));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("composite.png");

        let codec = CompositeCodec::default();
        let (public, signature) = checker_pair(21);
        let image = codec.compose(&public, &signature).unwrap();
        image.save_png(&path).unwrap();

        let loaded = CompositeImage::load_png(&path).unwrap();
        assert_eq!(image, loaded);
    }
}
