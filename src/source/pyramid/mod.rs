//! Local level-of-detail pyramid backend.
//!
//! # Layout
//!
//! ```text
//! lod_dir/
//! ├── 0/
//! │   └── 0.0.png
//! ├── 1/
//! │   ├── 0.0.png
//! │   ├── 0.1.png
//! │   └── 1.0.png
//! └── ...
//! ```
//!
//! One directory per zoom level, named by integer, with one file per tile
//! named `{row}.{col}.{png|jpg|jpeg}`. Rows count from the top. The size of
//! each level is discovered by scanning file names when the source is opened;
//! there is no manifest. Levels must be numbered without gaps from 0.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{check_tile_size, PyramidConfig, TileLoad, TileSource};
use crate::error::{ConfigError, FetchError};
use crate::geo::{TileAddress, WrapFlags, ZoomRange, MAX_ZOOM};
use crate::tile::decode_tile;

mod builder;

pub use builder::{LevelSummary, PyramidBuilder, PyramidSummary};

/// File extensions recognised as tiles, in lookup order.
pub const TILE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Tile source reading a directory pyramid.
#[derive(Debug, Clone)]
pub struct PyramidSource {
    lod_dir: PathBuf,
    levels: Vec<(u32, u32)>,
    tile_size: u32,
}

impl PyramidSource {
    /// Scan the pyramid described by `config`.
    pub fn open(config: PyramidConfig) -> Result<Self, ConfigError> {
        check_tile_size(config.tile_size)?;
        let levels = scan_levels(&config.lod_dir)?;

        info!(
            lod_dir = %config.lod_dir.display(),
            levels = levels.len(),
            "Opened tile pyramid"
        );
        Ok(Self {
            lod_dir: config.lod_dir,
            levels,
            tile_size: config.tile_size,
        })
    }

    pub fn open_path(lod_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::open(PyramidConfig::new(lod_dir))
    }

    pub fn lod_dir(&self) -> &Path {
        &self.lod_dir
    }

    /// `(rows, cols)` per level, starting at level 0.
    pub fn levels(&self) -> &[(u32, u32)] {
        &self.levels
    }

    /// Switch to another pyramid root and rescan. Leaves the source unchanged
    /// on error.
    pub fn set_lod_dir(&mut self, lod_dir: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let lod_dir = lod_dir.into();
        self.levels = scan_levels(&lod_dir)?;
        self.lod_dir = lod_dir;
        Ok(())
    }

    /// Path of the file holding a tile, if one exists.
    pub fn tile_path(&self, address: TileAddress) -> Option<PathBuf> {
        let (rows, cols) = self.data_dimensions(address.zoom);
        if address.row >= rows || address.col >= cols {
            return None;
        }

        let level_dir = self.lod_dir.join(address.zoom.to_string());
        TILE_EXTENSIONS
            .iter()
            .map(|ext| level_dir.join(format!("{}.{}.{ext}", address.row, address.col)))
            .find(|path| path.is_file())
    }
}

impl TileSource for PyramidSource {
    fn name(&self) -> &'static str {
        "pyramid"
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn zoom_range(&self) -> ZoomRange {
        let deepest = self.levels.len().saturating_sub(1) as u8;
        ZoomRange {
            min_level: 0,
            max_level: deepest,
        }
    }

    /// Levels past the deepest one on disk report `(0, 0)`.
    fn data_dimensions(&self, zoom: u8) -> (u32, u32) {
        self.levels.get(zoom as usize).copied().unwrap_or((0, 0))
    }

    fn wrap_flags(&self) -> WrapFlags {
        WrapFlags::NONE
    }

    fn tile_number_for(&self, x: f64, y: f64, zoom: u8) -> Option<TileAddress> {
        let size = self.tile_size as f64;
        let (col, row) = ((x / size).floor(), (y / size).floor());
        let (rows, cols) = self.data_dimensions(zoom);

        if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
            return None;
        }
        Some(TileAddress::new(zoom, row as u32, col as u32))
    }

    fn load(&self, address: TileAddress) -> Result<TileLoad, FetchError> {
        let Some(path) = self.tile_path(address) else {
            debug!(tile = %address, "Tile not in pyramid");
            return Ok(TileLoad::Ready(None));
        };

        let data = fs::read(&path)
            .map_err(|e| FetchError::Io(format!("{}: {e}", path.display())))?;
        Ok(TileLoad::Ready(Some(decode_tile(&data)?)))
    }
}

fn scan_levels(root: &Path) -> Result<Vec<(u32, u32)>, ConfigError> {
    if !root.is_dir() {
        return Err(ConfigError::MissingPyramid(root.to_path_buf()));
    }

    let mut found = BTreeSet::new();
    for entry in read_dir(root)? {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let level = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u8>().ok())
            .filter(|level| *level <= MAX_ZOOM);

        if let (true, Some(level)) = (is_dir, level) {
            found.insert(level);
        }
    }

    let deepest = found.last().copied().unwrap_or(0);
    if let Some(missing) = (0..=deepest).find(|level| !found.contains(level)) {
        return Err(ConfigError::IncompletePyramid {
            path: root.to_path_buf(),
            level: missing,
        });
    }

    (0..=deepest)
        .map(|level| scan_level(&root.join(level.to_string())))
        .collect()
}

fn scan_level(dir: &Path) -> Result<(u32, u32), ConfigError> {
    let mut extent: Option<(u32, u32)> = None;

    for entry in read_dir(dir)? {
        let name = entry.file_name();
        let Some((row, col)) = name.to_str().and_then(parse_tile_name) else {
            continue;
        };
        extent = Some(match extent {
            Some((rows, cols)) => (rows.max(row), cols.max(col)),
            None => (row, col),
        });
    }

    Ok(extent.map_or((0, 0), |(row, col)| (row + 1, col + 1)))
}

fn read_dir(dir: &Path) -> Result<Vec<fs::DirEntry>, ConfigError> {
    let io = |e: std::io::Error| ConfigError::Io(format!("{}: {e}", dir.display()));
    fs::read_dir(dir)
        .map_err(io)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io)
}

/// Parse `{row}.{col}.{ext}`.
fn parse_tile_name(name: &str) -> Option<(u32, u32)> {
    let mut parts = name.splitn(3, '.');
    let row = parts.next()?.parse().ok()?;
    let col = parts.next()?.parse().ok()?;
    let ext = parts.next()?;
    TILE_EXTENSIONS.contains(&ext).then_some((row, col))
}
