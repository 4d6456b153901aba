//! HTTP server layer exposing a tile manager.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │              GET /tiles/{zoom}/{row}/{col}.png                  │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (tile, info, stats)      │  │ (router config, CORS)       │  │
//! │  └────────────┬─────────────┘  └─────────────────────────────┘  │
//! └───────────────┼─────────────────────────────────────────────────┘
//!                 ▼
//!          TileManager<S> ──▶ BoundedCache / DispatchQueue
//! ```
//!
//! A tile that is still being fetched answers `202 Accepted` with a
//! `Retry-After` header; clients poll until it turns into `200` or `404`.

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, info_handler, stats_handler, tile_handler, AppState, ErrorResponse,
    HealthResponse, InfoResponse, LevelInfo, PendingResponse, TilePathParams, TileQueryParams,
    TILE_STATE_HEADER,
};
pub use routes::{create_router, RouterConfig, DEFAULT_CACHE_MAX_AGE};
