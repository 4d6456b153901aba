//! Command-line configuration for the `maptile-cache` binary.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `MAPTILE_` prefix
//! - Defaults for every optional setting
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use maptile_cache::config::{Cli, Command};
//!
//! let cli = Cli::parse();
//! if let Command::Serve(serve) = &cli.command {
//!     println!("Listening on {}", serve.bind);
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `MAPTILE_SOURCE` - Backend: `http`, `mbtiles` or `pyramid`
//! - `MAPTILE_SERVER`, `MAPTILE_PORT`, `MAPTILE_URL` - HTTP backend
//! - `MAPTILE_FILENAME` - MBTiles database path
//! - `MAPTILE_LOD_DIR` - Pyramid root directory
//! - `MAPTILE_MIN_LEVEL`, `MAPTILE_MAX_LEVEL` - Zoom bounds (default: 0..=17)
//! - `MAPTILE_TILE_SIZE` - Tile edge in pixels (default: 256)
//! - `MAPTILE_TIMEOUT_SECS` - HTTP fetch timeout (default: 5)
//! - `MAPTILE_CACHE_CAPACITY` - Cached tiles (default: 256)
//! - `MAPTILE_CACHE_POLICY` - `lru` or `lfu` (default: lru)
//! - `MAPTILE_RETRY_FAILED_SECS` - Retry window for failed tiles, 0 = never (default: 30)
//! - `MAPTILE_POLL_INTERVAL_MS` - Dispatch worker poll interval (default: 200)
//! - `MAPTILE_BIND` - Server bind address (default: 127.0.0.1:3000)
//! - `MAPTILE_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::{CachePolicy, DEFAULT_CACHE_CAPACITY};
use crate::dispatch::{DispatchConfig, DEFAULT_POLL_INTERVAL};
use crate::error::ConfigError;
use crate::geo::{ZoomRange, DEFAULT_TILE_SIZE, MAX_ZOOM};
use crate::manager::{ManagerConfig, RetryPolicy, DEFAULT_RETRY_AFTER};
use crate::server::DEFAULT_CACHE_MAX_AGE;
use crate::source::{
    HttpSourceConfig, MbTilesConfig, PyramidConfig, TileSourceConfig, DEFAULT_FETCH_TIMEOUT,
    DEFAULT_HTTP_PORT,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Default seconds `fetch` waits for an asynchronous tile.
pub const DEFAULT_FETCH_WAIT_SECS: u64 = 30;

// =============================================================================
// CLI Arguments
// =============================================================================

/// maptile-cache - cached access to Web Mercator raster tiles.
///
/// Reads tiles from a remote HTTP tile server, an MBTiles database or a
/// local level-of-detail pyramid, keeps decoded tiles in a bounded cache and
/// fetches misses on a background worker.
#[derive(Parser, Debug, Clone)]
#[command(name = "maptile-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve tiles over HTTP.
    Serve(ServeConfig),

    /// Fetch one tile and write it as PNG.
    Fetch(FetchConfig),

    /// Print the source's geometry as JSON.
    Info(InfoConfig),

    /// Convert a latitude/longitude to world pixel and tile coordinates.
    Locate(LocateConfig),

    /// Split a large image into a tile pyramid.
    BuildPyramid(BuildPyramidConfig),
}

impl Command {
    /// Validate the selected subcommand's arguments.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Command::Serve(config) => config.validate(),
            Command::Fetch(config) => config.validate(),
            Command::Info(config) => config.source.validate(),
            Command::Locate(config) => config.validate(),
            Command::BuildPyramid(config) => config.validate(),
        }
    }
}

// =============================================================================
// Source Arguments
// =============================================================================

/// Tile backend selector.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Remote tile server
    Http,

    /// MBTiles SQLite database
    Mbtiles,

    /// Local directory pyramid
    Pyramid,
}

/// Backend selection and parameters shared by every source-backed command.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Tile backend.
    #[arg(long, value_enum, env = "MAPTILE_SOURCE")]
    pub source: SourceKind,

    /// Tile server host name or base URL (http).
    #[arg(long, env = "MAPTILE_SERVER")]
    pub server: Option<String>,

    /// Tile server port (http).
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "MAPTILE_PORT")]
    pub port: u16,

    /// URL path template with %(zoom)d, %(row)d and %(col)d, or {z}, {y}
    /// and {x} (http).
    #[arg(long, env = "MAPTILE_URL")]
    pub url: Option<String>,

    /// MBTiles database file (mbtiles).
    #[arg(long, env = "MAPTILE_FILENAME")]
    pub filename: Option<PathBuf>,

    /// Pyramid root directory (pyramid).
    #[arg(long, env = "MAPTILE_LOD_DIR")]
    pub lod_dir: Option<PathBuf>,

    /// Lowest zoom level served. Overrides database metadata for mbtiles.
    #[arg(long, env = "MAPTILE_MIN_LEVEL")]
    pub min_level: Option<u8>,

    /// Highest zoom level served. Overrides database metadata for mbtiles.
    #[arg(long, env = "MAPTILE_MAX_LEVEL")]
    pub max_level: Option<u8>,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "MAPTILE_TILE_SIZE")]
    pub tile_size: u32,

    /// Per-request timeout for the http backend, in seconds.
    #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs(), env = "MAPTILE_TIMEOUT_SECS")]
    pub timeout_secs: u64,
}

impl SourceArgs {
    /// Validate the source arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        match self.source {
            SourceKind::Http => {
                if self.server.as_deref().map_or(true, str::is_empty) {
                    return Err(
                        "The http source needs a server. Set --server or MAPTILE_SERVER"
                            .to_string(),
                    );
                }
                if self.url.as_deref().map_or(true, str::is_empty) {
                    return Err(
                        "The http source needs a URL template. Set --url or MAPTILE_URL"
                            .to_string(),
                    );
                }
                if self.timeout_secs == 0 {
                    return Err("timeout_secs must be greater than 0".to_string());
                }
            }
            SourceKind::Mbtiles => {
                if self.filename.is_none() {
                    return Err(
                        "The mbtiles source needs a database. Set --filename or MAPTILE_FILENAME"
                            .to_string(),
                    );
                }
            }
            SourceKind::Pyramid => {
                if self.lod_dir.is_none() {
                    return Err(
                        "The pyramid source needs a directory. Set --lod-dir or MAPTILE_LOD_DIR"
                            .to_string(),
                    );
                }
            }
        }

        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }

        let range = self.zoom_range();
        if range.min_level > range.max_level || range.max_level > MAX_ZOOM {
            return Err(format!(
                "Invalid zoom range {}..={} (levels must be ordered and at most {})",
                range.min_level, range.max_level, MAX_ZOOM
            ));
        }

        Ok(())
    }

    /// Zoom bounds with unset ends filled from the default range.
    fn zoom_range(&self) -> ZoomRange {
        let default = ZoomRange::default();
        ZoomRange {
            min_level: self.min_level.unwrap_or(default.min_level),
            max_level: self.max_level.unwrap_or(default.max_level),
        }
    }

    fn has_zoom_override(&self) -> bool {
        self.min_level.is_some() || self.max_level.is_some()
    }

    /// Convert into the library's backend configuration.
    pub fn to_source_config(&self) -> Result<TileSourceConfig, ConfigError> {
        let range = self.zoom_range();
        let zoom_range = ZoomRange::new(range.min_level, range.max_level)?;

        let config = match self.source {
            SourceKind::Http => TileSourceConfig::Http(
                HttpSourceConfig::new(
                    self.server.clone().unwrap_or_default(),
                    self.url.clone().unwrap_or_default(),
                )
                .with_port(self.port)
                .with_zoom_range(zoom_range)
                .with_tile_size(self.tile_size)
                .with_timeout(Duration::from_secs(self.timeout_secs)),
            ),
            SourceKind::Mbtiles => {
                let mut config = MbTilesConfig::new(self.filename.clone().unwrap_or_default())
                    .with_tile_size(self.tile_size);
                if self.has_zoom_override() {
                    config = config.with_zoom_range(zoom_range);
                }
                TileSourceConfig::MbTiles(config)
            }
            SourceKind::Pyramid => TileSourceConfig::Pyramid(
                PyramidConfig::new(self.lod_dir.clone().unwrap_or_default())
                    .with_tile_size(self.tile_size),
            ),
        };
        Ok(config)
    }
}

// =============================================================================
// Cache Arguments
// =============================================================================

/// Tile manager and dispatch settings.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Maximum number of cached tiles.
    #[arg(long, default_value_t = DEFAULT_CACHE_CAPACITY, env = "MAPTILE_CACHE_CAPACITY")]
    pub cache_capacity: usize,

    /// Eviction policy: lru or lfu.
    #[arg(long, default_value_t = CachePolicy::Lru, env = "MAPTILE_CACHE_POLICY")]
    pub cache_policy: CachePolicy,

    /// Seconds before a failed tile is fetched again; 0 keeps failures until
    /// the cache is invalidated.
    #[arg(long, default_value_t = DEFAULT_RETRY_AFTER.as_secs(), env = "MAPTILE_RETRY_FAILED_SECS")]
    pub retry_failed_secs: u64,

    /// How long the dispatch worker waits for work before re-checking for
    /// shutdown, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64, env = "MAPTILE_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,
}

impl CacheArgs {
    /// Validate the cache arguments and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be greater than 0".to_string());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let capacity = NonZeroUsize::new(self.cache_capacity).ok_or(ConfigError::InvalidCapacity)?;
        Ok(ManagerConfig::default()
            .with_cache_capacity(capacity)
            .with_cache_policy(self.cache_policy)
            .with_retry(RetryPolicy::from_secs(self.retry_failed_secs)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig::default().with_poll_interval(self.poll_interval())
    }
}

// =============================================================================
// Subcommands
// =============================================================================

/// Arguments for `serve`.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Address to bind the server to.
    #[arg(long, default_value = DEFAULT_BIND, env = "MAPTILE_BIND")]
    pub bind: String,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "MAPTILE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "MAPTILE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()?;
        self.cache.validate()?;
        if self.bind.is_empty() {
            return Err("bind address must not be empty".to_string());
        }
        Ok(())
    }
}

/// Arguments for `fetch`.
#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub cache: CacheArgs,

    /// Zoom level.
    #[arg(long)]
    pub zoom: u8,

    /// Row index (0 = top).
    #[arg(long)]
    pub row: u32,

    /// Column index (0 = left).
    #[arg(long)]
    pub col: u32,

    /// Output PNG path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Write the placeholder tile instead of failing when the tile is
    /// unavailable.
    #[arg(long, default_value_t = false)]
    pub placeholder: bool,

    /// Seconds to wait for an asynchronous fetch.
    #[arg(long, default_value_t = DEFAULT_FETCH_WAIT_SECS)]
    pub wait_secs: u64,
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()?;
        self.cache.validate()?;
        if self.zoom > MAX_ZOOM {
            return Err(format!("zoom must be at most {MAX_ZOOM}"));
        }
        if self.wait_secs == 0 {
            return Err("wait_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Arguments for `info`.
#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Arguments for `locate`.
#[derive(Args, Debug, Clone)]
pub struct LocateConfig {
    /// Latitude in degrees; clamped to the Web Mercator limit.
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude in degrees.
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,

    /// Zoom level.
    #[arg(long)]
    pub zoom: u8,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,
}

impl LocateConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.lat.is_finite() || !self.lon.is_finite() {
            return Err("lat and lon must be finite numbers".to_string());
        }
        if self.zoom > MAX_ZOOM {
            return Err(format!("zoom must be at most {MAX_ZOOM}"));
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Arguments for `build-pyramid`.
#[derive(Args, Debug, Clone)]
pub struct BuildPyramidConfig {
    /// Source image (PNG or JPEG).
    pub input: PathBuf,

    /// Output directory; must be empty or absent.
    pub output: PathBuf,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,
}

impl BuildPyramidConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
