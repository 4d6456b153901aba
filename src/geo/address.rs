use std::fmt;

use crate::error::ConfigError;

/// Deepest zoom level supported. `2^30` rows still fit in a `u32`.
pub const MAX_ZOOM: u8 = 30;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Number of tiles along one axis at `zoom`.
///
/// # Panics
///
/// Panics if `zoom > MAX_ZOOM`.
#[inline]
pub fn grid_extent(zoom: u8) -> u32 {
    assert!(zoom <= MAX_ZOOM, "zoom {zoom} exceeds MAX_ZOOM ({MAX_ZOOM})");
    1u32 << zoom
}

// =============================================================================
// Tile Address
// =============================================================================

/// Address of one tile in a zoom level's grid.
///
/// Row 0 is the northern-most row and column 0 the western-most column.
/// Backends that store rows in a different orientation flip at their own
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    /// Zoom level
    pub zoom: u8,

    /// Row index (0 = top)
    pub row: u32,

    /// Column index (0 = left)
    pub col: u32,
}

impl TileAddress {
    /// Create a new tile address.
    ///
    /// # Panics
    ///
    /// Panics if `zoom > MAX_ZOOM`.
    pub fn new(zoom: u8, row: u32, col: u32) -> Self {
        assert!(zoom <= MAX_ZOOM, "zoom {zoom} exceeds MAX_ZOOM ({MAX_ZOOM})");
        Self { zoom, row, col }
    }

    /// Whether row and column fall inside the full `2^zoom` grid.
    pub fn is_within_grid(&self) -> bool {
        let n = grid_extent(self.zoom);
        self.row < n && self.col < n
    }

    /// Row index counted from the bottom of the grid (TMS orientation).
    pub fn flipped_row(&self) -> u32 {
        grid_extent(self.zoom) - 1 - self.row
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.row, self.col)
    }
}

// =============================================================================
// Zoom Range
// =============================================================================

/// Inclusive bounds on the zoom levels a source serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    pub min_level: u8,
    pub max_level: u8,
}

impl ZoomRange {
    /// Create a validated zoom range.
    pub fn new(min_level: u8, max_level: u8) -> Result<Self, ConfigError> {
        if min_level > max_level || max_level > MAX_ZOOM {
            return Err(ConfigError::InvalidZoomRange {
                min: min_level,
                max: max_level,
            });
        }
        Ok(Self {
            min_level,
            max_level,
        })
    }

    /// Whether `zoom` lies inside the range.
    pub fn contains(&self, zoom: u8) -> bool {
        (self.min_level..=self.max_level).contains(&zoom)
    }

    /// Clamp `zoom` into the range.
    pub fn clamp(&self, zoom: u8) -> u8 {
        zoom.clamp(self.min_level, self.max_level)
    }

    /// Iterate every level in the range.
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        self.min_level..=self.max_level
    }
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self {
            min_level: 0,
            max_level: 17,
        }
    }
}

/// Zoom selector for dimension queries.
///
/// `Max` stands for the deepest configured level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomQuery {
    Level(u8),
    Max,
}

impl ZoomQuery {
    /// Resolve against a zoom range.
    pub fn resolve(self, range: ZoomRange) -> u8 {
        match self {
            ZoomQuery::Level(zoom) => zoom,
            ZoomQuery::Max => range.max_level,
        }
    }
}

impl From<u8> for ZoomQuery {
    fn from(zoom: u8) -> Self {
        ZoomQuery::Level(zoom)
    }
}

// =============================================================================
// Wrap Flags
// =============================================================================

/// Which grid axes wrap around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WrapFlags {
    /// Horizontal axis (longitude / columns)
    pub x: bool,

    /// Vertical axis (latitude / rows)
    pub y: bool,
}

impl WrapFlags {
    /// Web maps wrap in longitude but not in latitude.
    pub const MAP: WrapFlags = WrapFlags { x: true, y: false };

    /// Neither axis wraps.
    pub const NONE: WrapFlags = WrapFlags { x: false, y: false };
}
