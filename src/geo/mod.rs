//! Coordinate transforms between WGS84 degrees, world pixels and tile indices.
//!
//! ```text
//!   (lat, lon, zoom) ──geo_to_pixel──▶ (x, y) ──pixel_to_tile──▶ (zoom, row, col)
//!                    ◀──pixel_to_geo──
//! ```
//!
//! Everything here is pure. The only failure mode is a zoom above
//! [`MAX_ZOOM`], which panics.

mod address;
mod mercator;

pub use address::{
    grid_extent, TileAddress, WrapFlags, ZoomQuery, ZoomRange, DEFAULT_TILE_SIZE, MAX_ZOOM,
};
pub use mercator::{clamp_latitude, WebMercator, MAX_LATITUDE};
