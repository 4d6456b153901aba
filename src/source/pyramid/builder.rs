use std::fs;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::BuildError;
use crate::geo::DEFAULT_TILE_SIZE;
use crate::tile::{DecodedTile, PngCompression, PngTileEncoder};

/// Size of one generated level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelSummary {
    pub level: u8,
    pub width: u32,
    pub height: u32,
    pub rows: u32,
    pub cols: u32,
}

/// Result of a pyramid build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PyramidSummary {
    pub levels: Vec<LevelSummary>,
    pub tiles_written: usize,
}

/// Splits a large image into the directory layout read by
/// [`PyramidSource`](super::PyramidSource).
///
/// The deepest level holds the image at full resolution; each shallower
/// level halves it, down to level 0. Edge tiles are cropped rather than
/// padded.
#[derive(Debug, Clone)]
pub struct PyramidBuilder {
    tile_size: u32,
    encoder: PngTileEncoder,
}

impl Default for PyramidBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PyramidBuilder {
    pub fn new() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            encoder: PngTileEncoder::with_compression(PngCompression::Best),
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    /// Deepest level generated for an image of `width` x `height`:
    /// `floor(log2(max_dim / tile_size)) + 1`.
    pub fn deepest_level(&self, width: u32, height: u32) -> Result<u8, BuildError> {
        let max_dim = width.max(height);
        if max_dim < self.tile_size {
            return Err(BuildError::TooSmall {
                width,
                height,
                tile_size: self.tile_size,
            });
        }
        Ok(((max_dim / self.tile_size).ilog2() + 1) as u8)
    }

    /// Read an image file and build its pyramid under `out_dir`.
    pub fn build_file(&self, input: &Path, out_dir: &Path) -> Result<PyramidSummary, BuildError> {
        let image = image::open(input)
            .map_err(|e| BuildError::Image(format!("{}: {e}", input.display())))?;
        self.build(&image, out_dir)
    }

    /// Build the pyramid for `image` under `out_dir`, which must be empty or
    /// absent.
    pub fn build(&self, image: &DynamicImage, out_dir: &Path) -> Result<PyramidSummary, BuildError> {
        let deepest = self.deepest_level(image.width(), image.height())?;
        prepare_output(out_dir)?;

        // RGB stays RGB, everything else is stored as RGBA.
        let source = match image {
            DynamicImage::ImageRgb8(_) => image.clone(),
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        };

        let mut summary = PyramidSummary {
            levels: Vec::with_capacity(deepest as usize + 1),
            tiles_written: 0,
        };

        for level in (0..=deepest).rev() {
            let step = 1u32 << (deepest - level);
            let width = source.width().div_ceil(step);
            let height = source.height().div_ceil(step);

            let scaled = if step == 1 {
                source.clone()
            } else {
                source.resize_exact(width, height, FilterType::Triangle)
            };

            let level_summary = self.write_level(&scaled, level, out_dir)?;
            summary.tiles_written += (level_summary.rows * level_summary.cols) as usize;
            summary.levels.push(level_summary);
        }

        summary.levels.reverse();
        info!(
            out_dir = %out_dir.display(),
            levels = summary.levels.len(),
            tiles = summary.tiles_written,
            "Built tile pyramid"
        );
        Ok(summary)
    }

    fn write_level(
        &self,
        image: &DynamicImage,
        level: u8,
        out_dir: &Path,
    ) -> Result<LevelSummary, BuildError> {
        let size = self.tile_size;
        let (width, height) = (image.width(), image.height());
        let rows = height.div_ceil(size);
        let cols = width.div_ceil(size);

        let level_dir = out_dir.join(level.to_string());
        fs::create_dir_all(&level_dir).map_err(|e| io_error(&level_dir, e))?;

        for row in 0..rows {
            for col in 0..cols {
                let (x, y) = (col * size, row * size);
                let chunk = image.crop_imm(x, y, size.min(width - x), size.min(height - y));
                let png = self.encoder.encode(&DecodedTile::from_image(chunk))?;

                let path = level_dir.join(format!("{row}.{col}.png"));
                fs::write(&path, &png).map_err(|e| io_error(&path, e))?;
            }
        }

        debug!(level, rows, cols, "Wrote pyramid level");
        Ok(LevelSummary {
            level,
            width,
            height,
            rows,
            cols,
        })
    }
}

fn prepare_output(out_dir: &Path) -> Result<(), BuildError> {
    if out_dir.exists() {
        let mut entries = fs::read_dir(out_dir).map_err(|e| io_error(out_dir, e))?;
        if entries.next().is_some() {
            return Err(BuildError::OutputNotEmpty(out_dir.to_path_buf()));
        }
    }
    fs::create_dir_all(out_dir).map_err(|e| io_error(out_dir, e))
}

fn io_error(path: &Path, e: std::io::Error) -> BuildError {
    BuildError::Io(format!("{}: {e}", path.display()))
}
