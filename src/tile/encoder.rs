//! PNG tile encoder.
//!
//! Decoded tiles are served and written to disk as PNG. The encoder keeps the
//! tile's channel layout, so RGB tiles stay three-channel.

use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use super::decoded::{ChannelLayout, DecodedTile};
use crate::error::EncodeError;

/// PNG compression preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PngCompression {
    /// Fast encoding, larger output
    #[default]
    Fast,

    /// Slower encoding, smaller output
    Best,
}

// =============================================================================
// PNG Encoder
// =============================================================================

/// Encoder from [`DecodedTile`] pixels to PNG bytes.
///
/// # Example
///
/// ```
/// use maptile_cache::tile::{unavailable_tile, PngTileEncoder};
///
/// let encoder = PngTileEncoder::new();
/// let png = encoder.encode(&unavailable_tile(64)).unwrap();
/// assert_eq!(&png[..4], b"\x89PNG");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PngTileEncoder {
    compression: PngCompression,
}

impl PngTileEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(compression: PngCompression) -> Self {
        Self { compression }
    }

    /// Encode a tile as PNG.
    pub fn encode(&self, tile: &DecodedTile) -> Result<Bytes, EncodeError> {
        let color = match tile.layout() {
            ChannelLayout::Rgb => ExtendedColorType::Rgb8,
            ChannelLayout::Rgba => ExtendedColorType::Rgba8,
        };
        let compression = match self.compression {
            PngCompression::Fast => CompressionType::Fast,
            PngCompression::Best => CompressionType::Best,
        };

        let mut output = Vec::new();
        PngEncoder::new_with_quality(&mut output, compression, FilterType::Adaptive)
            .write_image(tile.pixels(), tile.width(), tile.height(), color)
            .map_err(|e| EncodeError(e.to_string()))?;

        Ok(Bytes::from(output))
    }
}

// =============================================================================
// Tests
// =============================================================================
