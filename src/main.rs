//! maptile-cache - cached Web Mercator tiles from HTTP, MBTiles or a local
//! pyramid.
//!
//! This binary wires the library components together for the command line.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maptile_cache::{
    config::{
        BuildPyramidConfig, CacheArgs, Cli, Command, FetchConfig, InfoConfig, LocateConfig,
        ServeConfig,
    },
    geo::{TileAddress, WebMercator},
    manager::{TileEvent, TileManager, TileState},
    server::{create_router, InfoResponse, RouterConfig},
    source::{open_source, MbTilesSource, PyramidBuilder, TileSource, TileSourceConfig},
    tile::PngTileEncoder,
};

// The server owns its runtime: the HTTP backend's blocking client must be
// created and dropped outside of it.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.command.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Serve(config) => run_serve(config),
        Command::Fetch(config) => run_fetch(config),
        Command::Info(config) => run_info(config),
        Command::Locate(config) => run_locate(config),
        Command::BuildPyramid(config) => run_build_pyramid(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "maptile_cache=debug,tower_http=debug"
    } else {
        "maptile_cache=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_manager(
    source: &TileSourceConfig,
    cache: &CacheArgs,
) -> Result<TileManager<Box<dyn TileSource>>, String> {
    let source = open_source(source).map_err(|e| format!("Failed to open tile source: {e}"))?;
    let manager_config = cache.manager_config().map_err(|e| e.to_string())?;
    TileManager::with_worker(source, manager_config, cache.poll_interval())
        .map_err(|e| format!("Failed to start dispatch worker: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

// =============================================================================
// Serve Command
// =============================================================================

fn run_serve(config: ServeConfig) -> Result<(), String> {
    let source_config = config.source.to_source_config().map_err(|e| e.to_string())?;
    let manager = Arc::new(open_manager(&source_config, &config.cache)?);

    info!("Configuration:");
    info!("  Source: {}", manager.stats().source);
    let range = manager.zoom_range();
    info!("  Zoom levels: {}..={}", range.min_level, range.max_level);
    info!("  Tile size: {}px", manager.tile_size());
    info!(
        "  Cache: {} tiles ({})",
        config.cache.cache_capacity, config.cache.cache_policy
    );

    let router = create_router(Arc::clone(&manager), build_router_config(&config));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start async runtime: {e}"))?;

    let addr = config.bind.clone();
    let served = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind to {addr}: {e}"))?;

        info!("");
        info!("  Server listening on: http://{}", addr);
        info!("    curl http://{}/info", addr);
        info!("    curl -o tile.png http://{}/tiles/0/0/0.png", addr);
        info!("");

        axum::serve(listener, router)
            .await
            .map_err(|e| format!("Server error: {e}"))
    });

    drop(runtime);
    manager.queue().stop();
    served
}

/// Build RouterConfig from the serve arguments.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Fetch Command
// =============================================================================

fn run_fetch(config: FetchConfig) -> Result<(), String> {
    let source_config = config.source.to_source_config().map_err(|e| e.to_string())?;
    let manager = open_manager(&source_config, &config.cache)?;
    let requested = TileAddress::new(config.zoom, config.row, config.col);
    let address = manager.normalize(requested).ok_or_else(|| {
        let (rows, cols) = manager.data_dimensions(config.zoom);
        format!("Tile {requested} is outside the source grid ({rows}x{cols} at this zoom)")
    })?;

    let (tx, rx) = unbounded();
    let subscription = manager.subscribe(move |event: &TileEvent| {
        let _ = tx.send(*event);
    });

    let tile = manager.get_tile(address);
    if tile.is_none() && manager.tile_state(address) == TileState::Requested {
        let deadline = Instant::now() + Duration::from_secs(config.wait_secs);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(TileEvent::Ready(a) | TileEvent::Absent(a) | TileEvent::Failed(a))
                    if a == address =>
                {
                    break
                }
                Ok(_) => continue,
                Err(_) => {
                    manager.unsubscribe(subscription);
                    return Err(format!(
                        "Timed out after {}s waiting for tile {address}",
                        config.wait_secs
                    ));
                }
            }
        }
    }
    manager.unsubscribe(subscription);
    let tile = tile.or_else(|| manager.get_tile(address));

    let state = manager.tile_state(address);
    let tile = match tile {
        Some(tile) => tile,
        None if config.placeholder => manager.placeholder(),
        None => return Err(format!("Tile {address} is not available ({state})")),
    };

    let png = PngTileEncoder::new()
        .encode(&tile)
        .map_err(|e| e.to_string())?;
    std::fs::write(&config.output, &png)
        .map_err(|e| format!("Failed to write {}: {e}", config.output.display()))?;

    info!(
        tile = %address,
        state = %state,
        output = %config.output.display(),
        bytes = png.len(),
        "Wrote tile"
    );
    Ok(())
}

// =============================================================================
// Info Command
// =============================================================================

fn run_info(config: InfoConfig) -> Result<(), String> {
    let source_config = config.source.to_source_config().map_err(|e| e.to_string())?;

    let value = match &source_config {
        TileSourceConfig::MbTiles(mbtiles) => {
            let source = MbTilesSource::open(mbtiles.clone()).map_err(|e| e.to_string())?;
            let metadata = source.metadata().map_err(|e| e.to_string())?;
            let mut value = serde_json::to_value(InfoResponse::describe(&source))
                .map_err(|e| e.to_string())?;
            value["metadata"] = serde_json::to_value(metadata).map_err(|e| e.to_string())?;
            value
        }
        other => {
            let source = open_source(other).map_err(|e| e.to_string())?;
            serde_json::to_value(InfoResponse::describe(&*source)).map_err(|e| e.to_string())?
        }
    };

    print_json(&value)
}

// =============================================================================
// Locate Command
// =============================================================================

#[derive(Serialize)]
struct Location {
    lat: f64,
    lon: f64,
    zoom: u8,
    pixel_x: f64,
    pixel_y: f64,
    row: Option<u32>,
    col: Option<u32>,
}

fn run_locate(config: LocateConfig) -> Result<(), String> {
    let mercator = WebMercator::new(config.tile_size);
    let (pixel_x, pixel_y) = mercator.geo_to_pixel(config.lat, config.lon, config.zoom);
    let tile = mercator.geo_to_tile(config.lat, config.lon, config.zoom);

    print_json(&Location {
        lat: config.lat,
        lon: config.lon,
        zoom: config.zoom,
        pixel_x,
        pixel_y,
        row: tile.map(|t| t.row),
        col: tile.map(|t| t.col),
    })
}

// =============================================================================
// Build Pyramid Command
// =============================================================================

fn run_build_pyramid(config: BuildPyramidConfig) -> Result<(), String> {
    let summary = PyramidBuilder::new()
        .with_tile_size(config.tile_size)
        .build_file(&config.input, &config.output)
        .map_err(|e| e.to_string())?;

    print_json(&summary)
}
