//! HTTP request handlers for the tile API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{zoom}/{row}/{col}.png` - Serve a tile
//! - `GET /info` - Source geometry
//! - `GET /stats` - Cache and queue counters
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{EncodeError, ServeError};
use crate::geo::{TileAddress, WrapFlags};
use crate::manager::{ManagerStats, TileManager, TileState};
use crate::source::TileSource;
use crate::tile::PngTileEncoder;

/// Response header carrying the tile's [`TileState`].
pub const TILE_STATE_HEADER: &str = "x-tile-state";

/// Seconds a client should wait before polling a pending tile again.
pub const PENDING_RETRY_AFTER_SECS: u32 = 1;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the tile manager.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<S: TileSource> {
    pub manager: Arc<TileManager<S>>,

    /// Cache-Control max-age in seconds for served tiles (defaults to 1 hour)
    pub cache_max_age: u32,

    pub encoder: PngTileEncoder,
}

impl<S: TileSource> AppState<S> {
    pub fn new(manager: Arc<TileManager<S>>) -> Self {
        Self::with_cache_max_age(manager, 3600)
    }

    pub fn with_cache_max_age(manager: Arc<TileManager<S>>, cache_max_age: u32) -> Self {
        Self {
            manager,
            cache_max_age,
            encoder: PngTileEncoder::new(),
        }
    }
}

impl<S: TileSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            cache_max_age: self.cache_max_age,
            encoder: self.encoder,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from `/tiles/{zoom}/{row}/{filename}` where filename is `{col}`
/// or `{col}.png`.
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub zoom: u8,

    /// Row index (0 = top)
    pub row: u32,

    /// Column with optional `.png` extension
    pub filename: String,
}

impl TilePathParams {
    /// Parse the column from the filename, stripping any `.png` extension.
    pub fn col(&self) -> Result<u32, ServeError> {
        let col = self
            .filename
            .strip_suffix(".png")
            .unwrap_or(&self.filename);
        col.parse()
            .map_err(|_| ServeError::InvalidPath(format!("bad column {:?}", self.filename)))
    }
}

/// Query parameters for tile requests.
#[derive(Debug, Default, Deserialize)]
pub struct TileQueryParams {
    /// Serve the placeholder instead of 404 for absent or failed tiles
    #[serde(default)]
    pub placeholder: bool,
}

// =============================================================================
// Response Types
// =============================================================================

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body of a `202 Accepted` tile response.
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub zoom: u8,
    pub row: u32,
    pub col: u32,
    pub state: TileState,
}

/// Grid size of one zoom level.
#[derive(Debug, Serialize)]
pub struct LevelInfo {
    pub zoom: u8,
    pub rows: u32,
    pub cols: u32,
}

/// Response from the info endpoint.
#[derive(Debug, Serialize)]
pub struct InfoResponse {
    /// Backend name ("http", "mbtiles", "pyramid")
    pub source: &'static str,
    pub tile_size: u32,
    pub min_level: u8,
    pub max_level: u8,
    pub wrap_x: bool,
    pub wrap_y: bool,
    pub levels: Vec<LevelInfo>,
}

impl InfoResponse {
    pub fn describe<S: TileSource + ?Sized>(source: &S) -> Self {
        let range = source.zoom_range();
        let WrapFlags { x, y } = source.wrap_flags();
        let levels = range
            .levels()
            .map(|zoom| {
                let (rows, cols) = source.data_dimensions(zoom);
                LevelInfo { zoom, rows, cols }
            })
            .collect();

        Self {
            source: source.name(),
            tile_size: source.tile_size(),
            min_level: range.min_level,
            max_level: range.max_level,
            wrap_x: x,
            wrap_y: y,
            levels,
        }
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert ServeError to HTTP response.
///
/// 404s are logged at DEBUG, other 4xx at WARN and 5xx at ERROR.
impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ServeError::ZoomOutOfRange { .. } => (StatusCode::BAD_REQUEST, "zoom_out_of_range"),
            ServeError::TileOutOfBounds { .. } => {
                (StatusCode::BAD_REQUEST, "tile_out_of_bounds")
            }
            ServeError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "invalid_path"),
            ServeError::Unavailable { .. } => (StatusCode::NOT_FOUND, "not_found"),
            ServeError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            ServeError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);

        (status, Json(error_response)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn tile_state_header() -> HeaderName {
    HeaderName::from_static(TILE_STATE_HEADER)
}

/// Outcome of a tile lookup, computed off the async executor.
enum TileOutcome {
    Png { data: Bytes, state: TileState },
    Pending(TileState),
    Missing(TileState),
}

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{zoom}/{row}/{col}.png`
///
/// # Query Parameters
///
/// - `placeholder`: when `true`, absent and failed tiles are served as the
///   placeholder image instead of 404
///
/// # Response
///
/// - `200 OK`: PNG tile with `Content-Type: image/png`
/// - `202 Accepted`: the tile is being fetched; retry after `Retry-After`
/// - `400 Bad Request`: zoom out of range or tile off the grid
/// - `404 Not Found`: the source has no such tile, or the fetch failed
///
/// Every tile response carries `X-Tile-State`.
pub async fn tile_handler<S: TileSource + 'static>(
    State(state): State<AppState<S>>,
    Path(params): Path<TilePathParams>,
    Query(query): Query<TileQueryParams>,
) -> Result<Response, ServeError> {
    let col = params.col()?;
    let range = state.manager.zoom_range();
    if !range.contains(params.zoom) {
        return Err(ServeError::ZoomOutOfRange {
            zoom: params.zoom,
            min: range.min_level,
            max: range.max_level,
        });
    }

    let requested = TileAddress::new(params.zoom, params.row, col);
    let Some(address) = state.manager.normalize(requested) else {
        let (rows, cols) = state.manager.data_dimensions(params.zoom);
        return Err(ServeError::TileOutOfBounds {
            zoom: params.zoom,
            row: params.row,
            col,
            rows,
            cols,
        });
    };

    // Inline sources read files or SQLite on a miss.
    let manager = Arc::clone(&state.manager);
    let encoder = state.encoder;
    let placeholder = query.placeholder;
    let outcome = tokio::task::spawn_blocking(move || -> Result<TileOutcome, EncodeError> {
        if let Some(tile) = manager.get_tile(address) {
            let data = encoder.encode(&tile)?;
            return Ok(TileOutcome::Png {
                data,
                state: TileState::Available,
            });
        }

        match manager.tile_state(address) {
            state @ (TileState::Absent | TileState::Failed) if placeholder => {
                let data = encoder.encode(&manager.placeholder())?;
                Ok(TileOutcome::Png { data, state })
            }
            state @ (TileState::Absent | TileState::Failed) => Ok(TileOutcome::Missing(state)),
            // Evicted between the two lookups; the next poll reloads it.
            state => Ok(TileOutcome::Pending(state)),
        }
    })
    .await
    .map_err(|e| ServeError::Internal(format!("tile task failed: {e}")))??;

    match outcome {
        TileOutcome::Png { data, state: tile_state } => Ok((
            [
                (header::CONTENT_TYPE, "image/png".to_string()),
                (
                    header::CACHE_CONTROL,
                    format!("public, max-age={}", state.cache_max_age),
                ),
                (tile_state_header(), tile_state.to_string()),
            ],
            data,
        )
            .into_response()),
        TileOutcome::Pending(tile_state) => Ok((
            StatusCode::ACCEPTED,
            [
                (header::RETRY_AFTER, PENDING_RETRY_AFTER_SECS.to_string()),
                (tile_state_header(), tile_state.to_string()),
            ],
            Json(PendingResponse {
                zoom: address.zoom,
                row: address.row,
                col: address.col,
                state: tile_state,
            }),
        )
            .into_response()),
        TileOutcome::Missing(_) => Err(ServeError::Unavailable {
            zoom: address.zoom,
            row: address.row,
            col: address.col,
        }),
    }
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /info`: backend name, tile size, zoom range, wrapping and the grid
/// size of every level.
pub async fn info_handler<S: TileSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<InfoResponse> {
    Json(state.manager.with_source(|source| InfoResponse::describe(source)))
}

/// `GET /stats`: cache and dispatch counters.
pub async fn stats_handler<S: TileSource + 'static>(
    State(state): State<AppState<S>>,
) -> Json<ManagerStats> {
    Json(state.manager.stats())
}

// =============================================================================
// Tests
// =============================================================================
