//! API integration tests for the tile server.
//!
//! Tests verify:
//! - Tile retrieval from pyramid and MBTiles sources
//! - Error cases (zoom out of range, off-grid tiles, bad paths, absent tiles)
//! - Placeholder serving and the `x-tile-state` header
//! - Info, stats and health endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use maptile_cache::{
    create_router, decode_tile, ManagerConfig, MbTilesSource, PyramidSource, RouterConfig,
    TileManager, TileSource,
};

use super::test_utils::{address_color, create_mbtiles, create_pyramid, MbTile};

const TILE_SIZE: u32 = 4;

fn pyramid_router(dir: &TempDir, config: RouterConfig) -> Router {
    let source = PyramidSource::open_path(dir.path()).unwrap();
    router_for(source, config)
}

fn router_for<S: TileSource + 'static>(source: S, config: RouterConfig) -> Router {
    let manager =
        TileManager::with_worker(source, ManagerConfig::default(), Duration::from_millis(20))
            .unwrap();
    create_router(Arc::new(manager), config.with_tracing(false))
}

async fn get(router: Router, uri: &str) -> axum::response::Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.oneshot(request).await.unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

// =============================================================================
// Tile Retrieval
// =============================================================================

#[tokio::test]
async fn test_pyramid_tile_retrieval() {
    let dir = create_pyramid(&[(1, 1), (2, 3)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/tiles/1/1/2.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=3600"
    );
    assert_eq!(response.headers().get("x-tile-state").unwrap(), "available");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let tile = decode_tile(&body).unwrap();
    assert_eq!(tile.width(), TILE_SIZE);
    assert_eq!(tile.pixel(2, 2), Some(&address_color(1, 1, 2)[..]));
}

#[tokio::test]
async fn test_column_without_extension() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/tiles/1/0/1").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_custom_cache_max_age() {
    let dir = create_pyramid(&[(1, 1)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new().with_cache_max_age(60));

    let response = get(router, "/tiles/0/0/0.png").await;
    assert_eq!(
        response.headers().get("cache-control").unwrap(),
        "public, max-age=60"
    );
}

#[tokio::test]
async fn test_mbtiles_tile_retrieval() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.mbtiles");
    create_mbtiles(&path, &[MbTile::solid(2, 0, 3, TILE_SIZE)], &[]);
    let router = router_for(MbTilesSource::open_path(&path).unwrap(), RouterConfig::new());

    let response = get(router, "/tiles/2/0/3.png").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let tile = decode_tile(&body).unwrap();
    assert_eq!(tile.pixel(0, 0), Some(&address_color(2, 0, 3)[..]));
}

#[tokio::test]
async fn test_mbtiles_wraps_columns() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.mbtiles");
    create_mbtiles(&path, &[MbTile::solid(2, 1, 1, TILE_SIZE)], &[]);
    let router = router_for(MbTilesSource::open_path(&path).unwrap(), RouterConfig::new());

    // Column 5 at zoom 2 is column 1.
    let response = get(router, "/tiles/2/1/5.png").await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Missing Tiles
// =============================================================================

#[tokio::test]
async fn test_absent_tile_returns_404() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    std::fs::remove_file(dir.path().join("1").join("0.0.png")).unwrap();
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/tiles/1/0/0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_absent_tile_with_placeholder() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    std::fs::remove_file(dir.path().join("1").join("0.0.png")).unwrap();
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/tiles/1/0/0.png?placeholder=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(response.headers().get("x-tile-state").unwrap(), "absent");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let tile = decode_tile(&body).unwrap();
    assert_eq!((tile.width(), tile.height()), (TILE_SIZE, TILE_SIZE));
}

#[tokio::test]
async fn test_corrupt_tile_with_placeholder_reports_failed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.mbtiles");
    create_mbtiles(&path, &[MbTile::raw(1, 0, 0, b"garbage")], &[]);
    let router = router_for(MbTilesSource::open_path(&path).unwrap(), RouterConfig::new());

    let response = get(router.clone(), "/tiles/1/0/0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(router, "/tiles/1/0/0.png?placeholder=true").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-tile-state").unwrap(), "failed");
}

// =============================================================================
// Bad Requests
// =============================================================================

#[tokio::test]
async fn test_zoom_out_of_range() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/tiles/5/0/0.png").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["error"], "zoom_out_of_range");
}

#[tokio::test]
async fn test_tile_off_grid() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router.clone(), "/tiles/1/2/0.png").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "tile_out_of_bounds");

    // Pyramids do not wrap.
    let response = get(router, "/tiles/1/0/2.png").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_column() {
    let dir = create_pyramid(&[(1, 1)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router.clone(), "/tiles/0/0/abc.png").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "invalid_path");

    let response = get(router, "/tiles/0/0/0.jpg").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_numeric_zoom_rejected() {
    let dir = create_pyramid(&[(1, 1)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/tiles/top/0/0.png").await;
    assert!(response.status().is_client_error());
}

// =============================================================================
// Metadata Endpoints
// =============================================================================

#[tokio::test]
async fn test_health() {
    let dir = create_pyramid(&[(1, 1)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_info_describes_pyramid() {
    let dir = create_pyramid(&[(1, 1), (2, 3)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router, "/info").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["source"], "pyramid");
    assert_eq!(json["tile_size"], TILE_SIZE);
    assert_eq!(json["min_level"], 0);
    assert_eq!(json["max_level"], 1);
    assert_eq!(json["wrap_x"], false);
    assert_eq!(json["levels"][1]["rows"], 2);
    assert_eq!(json["levels"][1]["cols"], 3);
}

#[tokio::test]
async fn test_stats_count_cache_traffic() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    let router = pyramid_router(&dir, RouterConfig::new());

    let response = get(router.clone(), "/tiles/1/1/1.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = get(router.clone(), "/tiles/1/1/1.png").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(get(router, "/stats").await).await;
    assert_eq!(json["source"], "pyramid");
    assert_eq!(json["cache"]["len"], 1);
    assert_eq!(json["cache"]["hits"], 1);
    assert_eq!(json["cache"]["misses"], 1);
    assert_eq!(json["dispatch"]["executed"], 0);
}

// =============================================================================
// CORS
// =============================================================================

#[tokio::test]
async fn test_cors_restricted_origin() {
    let dir = create_pyramid(&[(1, 1)], TILE_SIZE);
    let router = pyramid_router(
        &dir,
        RouterConfig::new().with_cors_origins(vec!["https://maps.example.com".to_string()]),
    );

    let request = Request::builder()
        .uri("/health")
        .header("origin", "https://maps.example.com")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "https://maps.example.com"
    );
}
