use std::f64::consts::PI;

use super::address::{grid_extent, TileAddress, WrapFlags, DEFAULT_TILE_SIZE};

/// Latitude bound of the square Web Mercator world, in degrees.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Clamp a latitude into the range the projection is defined for.
#[inline]
pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}

/// Web Mercator projection for a fixed tile size.
///
/// Pixel space has its origin at the north-west corner of the world with `y`
/// growing southwards. The world is `tile_size * 2^zoom` pixels wide and tall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebMercator {
    tile_size: u32,
}

impl WebMercator {
    pub fn new(tile_size: u32) -> Self {
        assert!(tile_size > 0, "tile size must be positive");
        Self { tile_size }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// World edge length in pixels at `zoom`.
    pub fn map_size(&self, zoom: u8) -> f64 {
        self.tile_size as f64 * grid_extent(zoom) as f64
    }

    /// Project WGS84 degrees to world pixels.
    ///
    /// Latitude must satisfy `|lat| < MAX_LATITUDE`; clamp with
    /// [`clamp_latitude`] first, the projection diverges at the poles.
    pub fn geo_to_pixel(&self, lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
        let map_size = self.map_size(zoom);
        let lat_rad = lat.to_radians();

        let x = (lon + 180.0) / 360.0 * map_size;
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * map_size;
        (x, y)
    }

    /// Inverse of [`geo_to_pixel`](Self::geo_to_pixel). Returns `(lat, lon)`.
    pub fn pixel_to_geo(&self, x: f64, y: f64, zoom: u8) -> (f64, f64) {
        let map_size = self.map_size(zoom);

        let lon = x * 360.0 / map_size - 180.0;
        let lat = (PI * (1.0 - 2.0 * y / map_size)).sinh().atan().to_degrees();
        (lat, lon)
    }

    /// Tile containing a world pixel.
    ///
    /// Wrapping axes are reduced modulo `2^zoom`; a non-wrapping axis outside
    /// the grid yields `None`.
    pub fn pixel_to_tile(&self, x: f64, y: f64, zoom: u8, wrap: WrapFlags) -> Option<TileAddress> {
        let n = grid_extent(zoom) as i64;
        let size = self.tile_size as f64;

        let col = wrap_axis((x / size).floor() as i64, n, wrap.x)?;
        let row = wrap_axis((y / size).floor() as i64, n, wrap.y)?;

        Some(TileAddress::new(zoom, row, col))
    }

    /// Tile containing a geographic position. Latitude is clamped.
    pub fn geo_to_tile(&self, lat: f64, lon: f64, zoom: u8) -> Option<TileAddress> {
        let (x, y) = self.geo_to_pixel(clamp_latitude(lat), lon, zoom);
        // The clamped poles land on the grid edges; keep them inside.
        let y = y.clamp(0.0, self.map_size(zoom) - 1.0);
        self.pixel_to_tile(x, y, zoom, WrapFlags::MAP)
    }
}

impl Default for WebMercator {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

fn wrap_axis(index: i64, n: i64, wraps: bool) -> Option<u32> {
    if wraps {
        Some(index.rem_euclid(n) as u32)
    } else if (0..n).contains(&index) {
        Some(index as u32)
    } else {
        None
    }
}
