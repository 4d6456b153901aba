//! # maptile-cache
//!
//! Tile caching and asynchronous fetching for Web Mercator raster maps.
//!
//! A [`TileManager`] answers "give me the tile at (zoom, row, col)" from a
//! bounded in-memory cache. Misses are read inline from local backends, or
//! queued on a background [`DispatchQueue`] for remote ones, so rendering
//! code never blocks on the network.
//!
//! ## Features
//!
//! - **Three backends**: remote HTTP tile servers, MBTiles databases and local
//!   level-of-detail pyramids, behind one [`TileSource`] trait
//! - **Bounded caching**: LRU or LFU eviction, counted in tiles
//! - **Change notification**: subscribe to [`TileEvent`]s to redraw when a
//!   queued tile arrives
//! - **HTTP server**: an axum router exposing a manager over `/tiles`
//!
//! ## Architecture
//!
//! - [`geo`] - Web Mercator transforms and tile addressing
//! - [`cache`] - Bounded memoizing cache
//! - [`dispatch`] - Background request queue
//! - [`tile`] - Decoded pixels, decoding and PNG encoding
//! - [`source`] - Tile backends and the pyramid builder
//! - [`manager`] - The tile manager tying the pieces together
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use maptile_cache::{
//!     open_source, ManagerConfig, PyramidConfig, TileAddress, TileManager, TileSourceConfig,
//!     DEFAULT_POLL_INTERVAL,
//! };
//!
//! let config = TileSourceConfig::Pyramid(PyramidConfig::new("/data/lod"));
//! let source = open_source(&config).expect("valid pyramid");
//! let manager = TileManager::with_worker(source, ManagerConfig::default(), DEFAULT_POLL_INTERVAL)
//!     .expect("worker started");
//!
//! if let Some(tile) = manager.get_tile(TileAddress::new(0, 0, 0)) {
//!     println!("{}x{} tile", tile.width(), tile.height());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod manager;
pub mod server;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use cache::{BoundedCache, CachePolicy, CacheStats, DEFAULT_CACHE_CAPACITY};
pub use config::{CacheArgs, Cli, Command, SourceArgs, SourceKind};
pub use dispatch::{
    DispatchConfig, DispatchQueue, DispatchStats, DrainOrder, Request, DEFAULT_POLL_INTERVAL,
};
pub use error::{
    BuildError, ConfigError, DecodeError, DispatchError, EncodeError, FetchError, ServeError,
};
pub use geo::{
    TileAddress, WebMercator, WrapFlags, ZoomQuery, ZoomRange, DEFAULT_TILE_SIZE, MAX_ZOOM,
};
pub use manager::{
    ManagerConfig, ManagerStats, RetryPolicy, SubscriptionId, TileEvent, TileManager, TileState,
};
pub use server::{create_router, AppState, RouterConfig};
pub use source::{
    open_source, HttpSourceConfig, HttpTileSource, MbTilesConfig, MbTilesSource, PyramidBuilder,
    PyramidConfig, PyramidSource, TileFetch, TileLoad, TileSource, TileSourceConfig,
};
pub use tile::{decode_tile, unavailable_tile, ChannelLayout, DecodedTile, PngTileEncoder};
