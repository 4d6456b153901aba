use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while constructing or reconfiguring a tile source or manager.
///
/// These are fatal for the component being built: a backend that fails with a
/// `ConfigError` refuses to initialize.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The embedded tile database file does not exist
    #[error("Tile database not found: {}", .0.display())]
    MissingDatabase(PathBuf),

    /// The tile database exists but could not be opened or queried
    #[error("Tile database error: {0}")]
    Database(String),

    /// The pyramid root directory does not exist or is not a directory
    #[error("Pyramid directory not found: {}", .0.display())]
    MissingPyramid(PathBuf),

    /// A level directory is missing below the deepest level found
    #[error("Incomplete pyramid at {}: level {level} is missing", .path.display())]
    IncompletePyramid { path: PathBuf, level: u8 },

    /// The URL template is missing a coordinate placeholder
    #[error("Invalid URL template '{template}': {reason}")]
    InvalidUrlTemplate { template: String, reason: String },

    /// The server/port pair does not form a valid base URL
    #[error("Invalid tile server '{server}': {reason}")]
    InvalidServer { server: String, reason: String },

    /// Zoom bounds are inverted or exceed the supported maximum
    #[error("Invalid zoom range: {min}..={max}")]
    InvalidZoomRange { min: u8, max: u8 },

    /// Tile edge length must be positive
    #[error("Tile size must be greater than 0")]
    InvalidTileSize,

    /// Cache capacity must be at least one entry
    #[error("Cache capacity must be greater than 0")]
    InvalidCapacity,

    /// Failed to build the HTTP client
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Filesystem error while scanning configuration inputs
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors produced when decoding encoded tile bytes into pixels.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The payload is empty
    #[error("Empty tile payload")]
    Empty,

    /// The image codec rejected the payload
    #[error("Image decode failed: {0}")]
    Image(String),

    /// A raw pixel buffer does not match its declared dimensions
    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// The image is larger than the source's tiles
    #[error("Tile image is {width}x{height}, larger than the {tile_size}px tile size")]
    Oversized {
        width: u32,
        height: u32,
        tile_size: u32,
    },
}

/// Error produced when encoding a decoded tile for output.
#[derive(Debug, Clone, Error)]
#[error("Failed to encode tile: {0}")]
pub struct EncodeError(pub String);

/// Errors that can occur while fetching a single tile.
///
/// Fetch errors are always recovered locally: the dispatch worker logs them and
/// the tile is marked as failed.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network or connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request exceeded the configured timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The server answered with a status other than 200
    #[error("Unexpected HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    /// The payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Embedded database query failure
    #[error("Database error: {0}")]
    Database(String),

    /// Local filesystem failure
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors returned by the dispatch queue lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The queue was stopped and accepts no more requests
    #[error("Dispatch queue is stopped")]
    Stopped,

    /// `start()` was called on a queue that already has a worker
    #[error("Dispatch queue is already running")]
    AlreadyStarted,

    /// The worker thread could not be spawned
    #[error("Failed to spawn dispatch worker: {0}")]
    Spawn(String),
}

/// Errors raised while building a tile pyramid from a source image.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The source image could not be read or decoded
    #[error("Failed to read source image: {0}")]
    Image(String),

    /// The source image is smaller than a single tile
    #[error("Image of {width}x{height} is smaller than one {tile_size}px tile")]
    TooSmall {
        width: u32,
        height: u32,
        tile_size: u32,
    },

    /// The output directory already holds level directories
    #[error("Output directory {} is not empty", .0.display())]
    OutputNotEmpty(PathBuf),

    /// Writing a tile or directory failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Encoding a tile failed
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Errors surfaced by the HTTP tile server.
#[derive(Debug, Clone, Error)]
pub enum ServeError {
    /// Zoom outside the source's configured range
    #[error("Zoom {zoom} outside range {min}..={max}")]
    ZoomOutOfRange { zoom: u8, min: u8, max: u8 },

    /// Row or column outside the grid at this zoom
    #[error("Tile ({zoom}, {row}, {col}) outside grid of {rows}x{cols}")]
    TileOutOfBounds {
        zoom: u8,
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
    },

    /// Malformed path parameter
    #[error("Invalid tile path: {0}")]
    InvalidPath(String),

    /// The source has no such tile, or fetching it failed
    #[error("Tile ({zoom}, {row}, {col}) is not available")]
    Unavailable { zoom: u8, row: u32, col: u32 },

    /// Encoding the response image failed
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Worker task failure inside the server
    #[error("Internal error: {0}")]
    Internal(String),
}
