//! Test utilities for integration tests.
//!
//! Fixture builders for every backend: encoded PNG tiles, pyramid directory
//! trees, MBTiles databases, and a mock remote tile server.

use std::fs;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use crossbeam_channel::{unbounded, Receiver};
use image::{ImageFormat, Rgb, RgbImage};
use rusqlite::Connection;
use tempfile::TempDir;
use tokio::sync::oneshot;

use maptile_cache::{TileAddress, TileEvent, TileManager, TileSource};

/// How long tests wait for an asynchronous tile.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Tile Images
// =============================================================================

/// Encode a solid RGB tile as PNG.
pub fn png_tile(size: u32, color: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(size, size, Rgb(color));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Colour that identifies a tile address in fixtures.
pub fn address_color(zoom: u8, row: u32, col: u32) -> [u8; 3] {
    [zoom, row as u8, col as u8]
}

// =============================================================================
// Pyramid Fixtures
// =============================================================================

/// Write a pyramid with the given `(rows, cols)` per level. Every tile is
/// coloured with [`address_color`].
pub fn create_pyramid(levels: &[(u32, u32)], tile_size: u32) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (level, &(rows, cols)) in levels.iter().enumerate() {
        let level_dir = dir.path().join(level.to_string());
        fs::create_dir_all(&level_dir).unwrap();
        for row in 0..rows {
            for col in 0..cols {
                let color = address_color(level as u8, row, col);
                fs::write(
                    level_dir.join(format!("{row}.{col}.png")),
                    png_tile(tile_size, color),
                )
                .unwrap();
            }
        }
    }
    dir
}

// =============================================================================
// MBTiles Fixtures
// =============================================================================

/// One row of the `tiles` table, addressed top-origin.
pub struct MbTile {
    pub address: TileAddress,
    pub data: Vec<u8>,
}

impl MbTile {
    /// Solid tile coloured with [`address_color`].
    pub fn solid(zoom: u8, row: u32, col: u32, size: u32) -> Self {
        Self {
            address: TileAddress::new(zoom, row, col),
            data: png_tile(size, address_color(zoom, row, col)),
        }
    }

    pub fn raw(zoom: u8, row: u32, col: u32, data: &[u8]) -> Self {
        Self {
            address: TileAddress::new(zoom, row, col),
            data: data.to_vec(),
        }
    }
}

/// Create an MBTiles file at `path`. Rows are stored bottom-origin as the
/// format requires.
pub fn create_mbtiles(path: &Path, tiles: &[MbTile], metadata: &[(&str, &str)]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, \
         tile_row INTEGER, tile_data BLOB);
         CREATE TABLE metadata (name TEXT, value TEXT);",
    )
    .unwrap();

    for tile in tiles {
        conn.execute(
            "INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                tile.address.zoom,
                tile.address.col,
                tile.address.flipped_row(),
                tile.data
            ],
        )
        .unwrap();
    }

    for (name, value) in metadata {
        conn.execute("INSERT INTO metadata VALUES (?1, ?2)", [name, value])
            .unwrap();
    }
}

// =============================================================================
// Mock Tile Server
// =============================================================================

#[derive(Clone)]
struct MockState {
    requests: Arc<AtomicUsize>,
    tile_size: u32,
}

/// A remote XYZ tile server running on its own runtime thread.
///
/// Serves `/{z}/{x}/{y}.png`:
/// - zoom 3 answers `404 Not Found`
/// - zoom 4 answers `200 OK` with bytes that are not an image
/// - everything else answers a PNG coloured with [`address_color`]
pub struct MockTileServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockTileServer {
    pub fn start(tile_size: u32) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let requests = Arc::new(AtomicUsize::new(0));
        let state = MockState {
            requests: Arc::clone(&requests),
            tile_size,
        };
        let (shutdown, stopped) = oneshot::channel::<()>();

        let thread = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).unwrap();
                let router = Router::new()
                    .route("/{z}/{x}/{filename}", get(mock_tile))
                    .with_state(state);
                axum::serve(listener, router)
                    .with_graceful_shutdown(async {
                        let _ = stopped.await;
                    })
                    .await
                    .unwrap();
            });
        });

        Self {
            addr,
            requests,
            shutdown: Some(shutdown),
            thread: Some(thread),
        }
    }

    /// Host name to configure the HTTP source with.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL template matching the served paths.
    pub fn url_template(&self) -> &'static str {
        "/{z}/{x}/{y}.png"
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockTileServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn mock_tile(
    State(state): State<MockState>,
    UrlPath((z, x, filename)): UrlPath<(u8, u32, String)>,
) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);

    let Some(Ok(y)) = filename.strip_suffix(".png").map(str::parse::<u32>) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match z {
        3 => StatusCode::NOT_FOUND.into_response(),
        4 => ([("content-type", "image/png")], b"not a png".to_vec()).into_response(),
        _ => (
            [("content-type", "image/png")],
            png_tile(state.tile_size, address_color(z, y, x)),
        )
            .into_response(),
    }
}

// =============================================================================
// Event Helpers
// =============================================================================

/// Forward a manager's events into a channel.
pub fn event_channel<S: TileSource>(manager: &TileManager<S>) -> Receiver<TileEvent> {
    let (tx, rx) = unbounded();
    manager.subscribe(move |event: &TileEvent| {
        let _ = tx.send(*event);
    });
    rx
}

/// Wait until an event concerning `address` arrives.
pub fn wait_for(events: &Receiver<TileEvent>, address: TileAddress) -> TileEvent {
    loop {
        let event = events
            .recv_timeout(EVENT_TIMEOUT)
            .unwrap_or_else(|_| panic!("no event for {address}"));
        match event {
            TileEvent::Ready(a) | TileEvent::Absent(a) | TileEvent::Failed(a) if a == address => {
                return event
            }
            _ => {}
        }
    }
}
