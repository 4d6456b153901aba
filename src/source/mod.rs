//! Tile source backends.
//!
//! A [`TileSource`] turns a [`TileAddress`] into decoded pixels. Sources that
//! can answer quickly return [`TileLoad::Ready`] and are read inline by the
//! manager; sources that need network I/O return [`TileLoad::Deferred`] with a
//! job the manager hands to its dispatch queue.
//!
//! ```text
//!                       ┌─────────────────────┐
//!                       │     TileSource      │
//!                       └──────────┬──────────┘
//!          ┌───────────────────────┼───────────────────────┐
//!          ▼                       ▼                       ▼
//!   HttpTileSource           MbTilesSource           PyramidSource
//!   (deferred, LIFO)         (inline, SQLite)        (inline, files)
//! ```
//!
//! Every backend uses top-origin rows. A backend whose storage counts rows
//! from the bottom flips at its own boundary.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::DrainOrder;
use crate::error::{ConfigError, DecodeError, FetchError};
use crate::geo::{grid_extent, TileAddress, WebMercator, WrapFlags, ZoomRange, DEFAULT_TILE_SIZE};
use crate::tile::{decode_tile, DecodedTile};

pub mod http;
pub mod mbtiles;
pub mod pyramid;
mod template;

pub use http::{HttpTileFetch, HttpTileSource, DEFAULT_FETCH_TIMEOUT, DEFAULT_HTTP_PORT};
pub use mbtiles::MbTilesSource;
pub use pyramid::{PyramidBuilder, PyramidSource, PyramidSummary};
pub use template::UrlTemplate;

// =============================================================================
// Tile Source
// =============================================================================

/// Result of asking a source for a tile.
pub enum TileLoad {
    /// The source answered inline. `None` means it has no such tile.
    Ready(Option<DecodedTile>),

    /// The tile must be fetched off the caller's thread.
    Deferred(Box<dyn TileFetch>),
}

impl fmt::Debug for TileLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileLoad::Ready(tile) => f.debug_tuple("Ready").field(tile).finish(),
            TileLoad::Deferred(job) => write!(f, "Deferred({job})"),
        }
    }
}

/// Blocking fetch job produced by a deferred source.
pub trait TileFetch: Send + fmt::Display {
    /// Perform the fetch. `Ok(None)` means the source has no such tile.
    fn fetch(self: Box<Self>) -> Result<Option<DecodedTile>, FetchError>;
}

/// Capability interface shared by all tile backends.
pub trait TileSource: Send + Sync {
    /// Short backend name used in logs and server output.
    fn name(&self) -> &'static str;

    /// Tile edge length in pixels.
    fn tile_size(&self) -> u32;

    fn zoom_range(&self) -> ZoomRange;

    /// `(rows, cols)` of tiles available at `zoom`.
    fn data_dimensions(&self, zoom: u8) -> (u32, u32) {
        let n = grid_extent(zoom);
        (n, n)
    }

    fn wrap_flags(&self) -> WrapFlags {
        WrapFlags::MAP
    }

    /// Tile containing world pixel `(x, y)` at `zoom`.
    fn tile_number_for(&self, x: f64, y: f64, zoom: u8) -> Option<TileAddress> {
        WebMercator::new(self.tile_size()).pixel_to_tile(x, y, zoom, self.wrap_flags())
    }

    /// Load or schedule one tile.
    fn load(&self, address: TileAddress) -> Result<TileLoad, FetchError>;

    /// Preferred execution order for this source's deferred jobs.
    fn drain_order(&self) -> DrainOrder {
        DrainOrder::Fifo
    }
}

impl<T: TileSource + ?Sized> TileSource for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn tile_size(&self) -> u32 {
        (**self).tile_size()
    }

    fn zoom_range(&self) -> ZoomRange {
        (**self).zoom_range()
    }

    fn data_dimensions(&self, zoom: u8) -> (u32, u32) {
        (**self).data_dimensions(zoom)
    }

    fn wrap_flags(&self) -> WrapFlags {
        (**self).wrap_flags()
    }

    fn tile_number_for(&self, x: f64, y: f64, zoom: u8) -> Option<TileAddress> {
        (**self).tile_number_for(x, y, zoom)
    }

    fn load(&self, address: TileAddress) -> Result<TileLoad, FetchError> {
        (**self).load(address)
    }

    fn drain_order(&self) -> DrainOrder {
        (**self).drain_order()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Settings for the HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Host name, or a base URL with scheme
    pub server: String,

    /// Port used with a bare host name, or to override a base URL's port
    pub port: u16,

    /// Path template with zoom/row/col placeholders
    pub url: String,

    pub zoom_range: ZoomRange,
    pub tile_size: u32,

    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(server: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            port: DEFAULT_HTTP_PORT,
            url: url.into(),
            zoom_range: ZoomRange::default(),
            tile_size: DEFAULT_TILE_SIZE,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_zoom_range(mut self, zoom_range: ZoomRange) -> Self {
        self.zoom_range = zoom_range;
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Settings for the MBTiles backend.
#[derive(Debug, Clone)]
pub struct MbTilesConfig {
    pub filename: PathBuf,

    /// Overrides the zoom bounds read from the database
    pub zoom_range: Option<ZoomRange>,

    pub tile_size: u32,
}

impl MbTilesConfig {
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            zoom_range: None,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_zoom_range(mut self, zoom_range: ZoomRange) -> Self {
        self.zoom_range = Some(zoom_range);
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }
}

/// Settings for the local pyramid backend.
#[derive(Debug, Clone)]
pub struct PyramidConfig {
    pub lod_dir: PathBuf,
    pub tile_size: u32,
}

impl PyramidConfig {
    pub fn new(lod_dir: impl Into<PathBuf>) -> Self {
        Self {
            lod_dir: lod_dir.into(),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }
}

/// Backend selection plus its parameters.
#[derive(Debug, Clone)]
pub enum TileSourceConfig {
    Http(HttpSourceConfig),
    MbTiles(MbTilesConfig),
    Pyramid(PyramidConfig),
}

/// Construct the backend described by `config`.
pub fn open_source(config: &TileSourceConfig) -> Result<Box<dyn TileSource>, ConfigError> {
    let source: Box<dyn TileSource> = match config {
        TileSourceConfig::Http(config) => Box::new(HttpTileSource::new(config.clone())?),
        TileSourceConfig::MbTiles(config) => Box::new(MbTilesSource::open(config.clone())?),
        TileSourceConfig::Pyramid(config) => Box::new(PyramidSource::open(config.clone())?),
    };
    Ok(source)
}

fn check_tile_size(tile_size: u32) -> Result<(), ConfigError> {
    if tile_size == 0 {
        return Err(ConfigError::InvalidTileSize);
    }
    Ok(())
}

/// Decode a payload, rejecting images larger than a tile. Smaller images
/// pass: edge tiles may be partial.
fn decode_sized(data: &[u8], tile_size: u32) -> Result<DecodedTile, DecodeError> {
    let tile = decode_tile(data)?;
    if tile.width() > tile_size || tile.height() > tile_size {
        return Err(DecodeError::Oversized {
            width: tile.width(),
            height: tile.height(),
            tile_size,
        });
    }
    Ok(tile)
}
