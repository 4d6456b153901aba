//! HTTP backend tests against a mock remote tile server.
//!
//! These run as plain `#[test]`s: the blocking HTTP client must not live
//! inside an async runtime.

use std::time::Duration;

use maptile_cache::{
    HttpSourceConfig, HttpTileSource, ManagerConfig, RetryPolicy, TileAddress, TileEvent,
    TileManager, TileState, ZoomRange,
};

use super::test_utils::{address_color, event_channel, wait_for, MockTileServer};

const TILE_SIZE: u32 = 8;

fn http_manager(server: &MockTileServer, config: ManagerConfig) -> TileManager<HttpTileSource> {
    let source = HttpTileSource::new(
        HttpSourceConfig::new(server.host(), server.url_template())
            .with_port(server.port())
            .with_zoom_range(ZoomRange::new(0, 6).unwrap())
            .with_tile_size(TILE_SIZE)
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    TileManager::with_worker(source, config, Duration::from_millis(20)).unwrap()
}

#[test]
fn test_miss_then_ready_event() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());
    let events = event_channel(&manager);
    let address = TileAddress::new(2, 1, 3);

    // The first request never blocks on the network.
    assert!(manager.get_tile(address).is_none());
    assert_eq!(manager.tile_state(address), TileState::Requested);

    assert_eq!(wait_for(&events, address), TileEvent::Ready(address));

    let tile = manager.get_tile(address).expect("tile cached after Ready");
    assert_eq!((tile.width(), tile.height()), (TILE_SIZE, TILE_SIZE));
    assert_eq!(tile.pixel(0, 0), Some(&address_color(2, 1, 3)[..]));
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_repeated_misses_request_once() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());
    let events = event_channel(&manager);
    let address = TileAddress::new(1, 0, 1);

    for _ in 0..5 {
        let _ = manager.get_tile(address);
    }
    wait_for(&events, address);

    assert!(manager.get_tile(address).is_some());
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_not_found_marks_tile_failed() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(
        &server,
        ManagerConfig::default().with_retry(RetryPolicy::Never),
    );
    let events = event_channel(&manager);
    let address = TileAddress::new(3, 2, 1);

    assert!(manager.get_tile(address).is_none());
    assert_eq!(wait_for(&events, address), TileEvent::Failed(address));

    // Failures stay memoized until invalidation.
    assert!(manager.get_tile(address).is_none());
    assert_eq!(manager.tile_state(address), TileState::Failed);
    assert_eq!(server.request_count(), 1);

    let placeholder = manager.tile_or_placeholder(address).unwrap();
    assert_eq!(placeholder.width(), TILE_SIZE);
}

#[test]
fn test_undecodable_body_marks_tile_failed() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());
    let events = event_channel(&manager);
    let address = TileAddress::new(4, 0, 0);

    assert!(manager.get_tile(address).is_none());
    assert_eq!(wait_for(&events, address), TileEvent::Failed(address));
    assert_eq!(manager.tile_state(address), TileState::Failed);
    assert!(manager.get_tile(address).is_none());
}

#[test]
fn test_failed_tile_retried_after_window() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(
        &server,
        ManagerConfig::default().with_retry(RetryPolicy::After(Duration::ZERO)),
    );
    let events = event_channel(&manager);
    let address = TileAddress::new(3, 0, 0);

    manager.get_tile(address);
    wait_for(&events, address);

    manager.get_tile(address);
    wait_for(&events, address);
    assert_eq!(server.request_count(), 2);
}

#[test]
fn test_invalidate_refetches() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());
    let events = event_channel(&manager);
    let address = TileAddress::new(1, 1, 1);

    manager.get_tile(address);
    wait_for(&events, address);
    assert!(manager.get_tile(address).is_some());

    manager.invalidate();
    assert_eq!(manager.tile_state(address), TileState::Unknown);
    assert!(manager.get_tile(address).is_none());
    wait_for(&events, address);
    assert!(manager.get_tile(address).is_some());
    assert_eq!(server.request_count(), 2);
}

#[test]
fn test_reconfigure_port_drops_cache() {
    let first = MockTileServer::start(TILE_SIZE);
    let second = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&first, ManagerConfig::default());
    let events = event_channel(&manager);
    let address = TileAddress::new(0, 0, 0);

    manager.get_tile(address);
    wait_for(&events, address);

    manager
        .reconfigure(|source| source.set_port(second.port()))
        .unwrap();
    assert_eq!(events.recv_timeout(Duration::from_secs(5)), Ok(TileEvent::Invalidated));

    manager.get_tile(address);
    wait_for(&events, address);
    assert_eq!(first.request_count(), 1);
    assert_eq!(second.request_count(), 1);
}

#[test]
fn test_rejected_reconfigure_keeps_cache() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());
    let events = event_channel(&manager);
    let address = TileAddress::new(0, 0, 0);

    manager.get_tile(address);
    wait_for(&events, address);

    assert!(manager
        .reconfigure(|source| source.set_url("/tiles/{z}.png"))
        .is_err());
    assert!(manager.get_tile(address).is_some());
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_wrapped_columns_share_cache_entry() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());
    let events = event_channel(&manager);

    // Column 5 at zoom 2 wraps onto column 1.
    manager.get_tile(TileAddress::new(2, 0, 5));
    wait_for(&events, TileAddress::new(2, 0, 1));

    let tile = manager.get_tile(TileAddress::new(2, 0, 1)).unwrap();
    assert_eq!(tile.pixel(0, 0), Some(&address_color(2, 0, 1)[..]));
    assert_eq!(server.request_count(), 1);
}

#[test]
fn test_out_of_range_is_never_requested() {
    let server = MockTileServer::start(TILE_SIZE);
    let manager = http_manager(&server, ManagerConfig::default());

    assert!(manager.get_tile(TileAddress::new(7, 0, 0)).is_none());
    assert!(manager.get_tile(TileAddress::new(2, 4, 0)).is_none());
    assert_eq!(manager.tile_state(TileAddress::new(7, 0, 0)), TileState::Absent);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_tile_larger_than_tile_size_fails() {
    let server = MockTileServer::start(TILE_SIZE);
    let source = HttpTileSource::new(
        HttpSourceConfig::new(server.host(), server.url_template())
            .with_port(server.port())
            .with_tile_size(TILE_SIZE / 2),
    )
    .unwrap();
    let manager =
        TileManager::with_worker(source, ManagerConfig::default(), Duration::from_millis(20))
            .unwrap();
    let events = event_channel(&manager);
    let address = TileAddress::new(1, 0, 0);

    assert!(manager.get_tile(address).is_none());
    assert_eq!(wait_for(&events, address), TileEvent::Failed(address));
    assert_eq!(manager.tile_state(address), TileState::Failed);
}
