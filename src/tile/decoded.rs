use std::fmt;

use image::DynamicImage;
use serde::Serialize;

use crate::error::DecodeError;

/// Channel layout of a decoded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    Rgb,
    Rgba,
}

impl ChannelLayout {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgba => 4,
        }
    }
}

/// An in-memory pixel buffer for one tile.
///
/// Pixels are 8-bit, row-major, top row first. The buffer length always equals
/// `width * height * layout.channels()`.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedTile {
    width: u32,
    height: u32,
    layout: ChannelLayout,
    pixels: Vec<u8>,
}

impl DecodedTile {
    /// Wrap a raw pixel buffer, checking its length.
    pub fn new(
        width: u32,
        height: u32,
        layout: ChannelLayout,
        pixels: Vec<u8>,
    ) -> Result<Self, DecodeError> {
        let expected = width as usize * height as usize * layout.channels();
        if pixels.len() != expected {
            return Err(DecodeError::BufferSize {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            width,
            height,
            layout,
            pixels,
        })
    }

    /// Convert a decoded image. RGB images stay RGB; everything else becomes
    /// RGBA.
    pub fn from_image(image: DynamicImage) -> Self {
        let (width, height) = (image.width(), image.height());
        match image {
            DynamicImage::ImageRgb8(rgb) => Self {
                width,
                height,
                layout: ChannelLayout::Rgb,
                pixels: rgb.into_raw(),
            },
            other => Self {
                width,
                height,
                layout: ChannelLayout::Rgba,
                pixels: other.into_rgba8().into_raw(),
            },
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    /// Channel depth (bytes per pixel).
    pub fn depth(&self) -> usize {
        self.layout.channels()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Channel values of the pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let depth = self.depth();
        let start = (y as usize * self.width as usize + x as usize) * depth;
        self.pixels.get(start..start + depth)
    }
}

impl fmt::Debug for DecodedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedTile")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decode encoded tile bytes (PNG or JPEG) into pixels.
pub fn decode_tile(bytes: &[u8]) -> Result<DecodedTile, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let image = image::load_from_memory(bytes).map_err(|e| DecodeError::Image(e.to_string()))?;
    Ok(DecodedTile::from_image(image))
}
