use image::{Rgba, RgbaImage};

use super::decoded::DecodedTile;

const BACKGROUND: Rgba<u8> = Rgba([192, 192, 192, 255]);
const CROSS: Rgba<u8> = Rgba([64, 64, 64, 255]);

/// Tile drawn in place of one that could not be loaded: light grey with a dark
/// diagonal cross.
pub fn unavailable_tile(size: u32) -> DecodedTile {
    let half_width = (size / 64).max(1) as i64;
    let last = size.saturating_sub(1) as i64;

    let image = RgbaImage::from_fn(size, size, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let on_main = (x - y).abs() <= half_width;
        let on_anti = (x + y - last).abs() <= half_width;
        if on_main || on_anti {
            CROSS
        } else {
            BACKGROUND
        }
    });

    DecodedTile::from_image(image::DynamicImage::ImageRgba8(image))
}
