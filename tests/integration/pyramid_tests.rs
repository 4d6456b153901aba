//! Pyramid backend tests: level discovery, dimensions and the builder.

use std::fs;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use maptile_cache::{
    ConfigError, ManagerConfig, PyramidBuilder, PyramidSource, TileAddress, TileManager,
    TileSource, TileState, WrapFlags, ZoomQuery, ZoomRange,
};

use super::test_utils::{address_color, create_pyramid};

const TILE_SIZE: u32 = 4;

fn manager(dir: &TempDir) -> TileManager<PyramidSource> {
    let source = PyramidSource::open_path(dir.path()).unwrap();
    TileManager::with_worker(source, ManagerConfig::default(), Duration::from_millis(20)).unwrap()
}

#[test]
fn test_two_level_pyramid_dimensions() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    let manager = manager(&dir);

    assert_eq!(manager.zoom_range(), ZoomRange::new(0, 1).unwrap());
    assert_eq!(manager.data_dimensions(0u8), (1, 1));
    assert_eq!(manager.data_dimensions(1u8), (2, 2));
    assert_eq!(manager.data_dimensions(ZoomQuery::Max), (2, 2));
    assert_eq!(manager.data_dimensions(2u8), (0, 0));
    assert_eq!(manager.wrap_flags(), WrapFlags::NONE);

    assert!(manager.get_tile(TileAddress::new(2, 0, 0)).is_none());
    assert_eq!(
        manager.tile_state(TileAddress::new(2, 0, 0)),
        TileState::Absent
    );
}

#[test]
fn test_tiles_are_read_inline() {
    let dir = create_pyramid(&[(1, 1), (2, 3)], TILE_SIZE);
    let manager = manager(&dir);

    let tile = manager.get_tile(TileAddress::new(1, 1, 2)).unwrap();
    assert_eq!(tile.pixel(0, 0), Some(&address_color(1, 1, 2)[..]));

    // Off the level's grid, and no wrapping for images.
    assert!(manager.get_tile(TileAddress::new(1, 0, 3)).is_none());
    assert!(manager.get_tile(TileAddress::new(1, 2, 0)).is_none());
}

#[test]
fn test_missing_tile_file_is_absent() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    fs::remove_file(dir.path().join("1").join("1.0.png")).unwrap();
    let manager = manager(&dir);

    // The level keeps its extent from the remaining files.
    assert_eq!(manager.data_dimensions(1u8), (2, 2));
    assert!(manager.get_tile(TileAddress::new(1, 1, 0)).is_none());
    assert_eq!(
        manager.tile_state(TileAddress::new(1, 1, 0)),
        TileState::Absent
    );
    assert!(manager.tile_or_placeholder(TileAddress::new(1, 1, 0)).is_some());
}

#[test]
fn test_level_gap_refuses_to_open() {
    let dir = create_pyramid(&[(1, 1), (2, 2), (4, 4)], TILE_SIZE);
    fs::remove_dir_all(dir.path().join("1")).unwrap();

    assert!(matches!(
        PyramidSource::open_path(dir.path()),
        Err(ConfigError::IncompletePyramid { level: 1, .. })
    ));
}

#[test]
fn test_missing_directory_refuses_to_open() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        PyramidSource::open_path(dir.path().join("absent")),
        Err(ConfigError::MissingPyramid(_))
    ));
}

#[test]
fn test_pixel_lookup_uses_level_bounds() {
    let dir = create_pyramid(&[(1, 1), (2, 2)], TILE_SIZE);
    let manager = manager(&dir);

    assert_eq!(
        manager.tile_number_for(5.0, 1.0, 1),
        Some(TileAddress::new(1, 0, 1))
    );
    assert_eq!(manager.tile_number_for(9.0, 1.0, 1), None);
}

#[test]
fn test_built_pyramid_serves_through_manager() {
    let work = TempDir::new().unwrap();
    let input = work.path().join("input.png");
    let output = work.path().join("lod");
    let image = RgbImage::from_pixel(20, 12, Rgb([30, 60, 90]));
    DynamicImage::ImageRgb8(image).save(&input).unwrap();

    let summary = PyramidBuilder::new()
        .with_tile_size(TILE_SIZE)
        .build_file(&input, &output)
        .unwrap();
    // 20 / 4 = 5 -> floor(log2 5) + 1 = 3 deeper levels.
    assert_eq!(summary.levels.len(), 4);
    assert_eq!(summary.levels[3].width, 20);

    let source = PyramidSource::open_path(&output).unwrap();
    assert_eq!(source.zoom_range().max_level, 3);
    let manager =
        TileManager::with_worker(source, ManagerConfig::default(), Duration::from_millis(20))
            .unwrap();

    assert_eq!(manager.data_dimensions(ZoomQuery::Max), (3, 5));
    let tile = manager.get_tile(TileAddress::new(3, 2, 4)).unwrap();
    assert_eq!(tile.pixel(0, 0), Some(&[30u8, 60, 90][..]));
}
