//! MBTiles (SQLite) backend.
//!
//! The database is opened read-only and queried inline. MBTiles stores rows
//! in TMS order, counted from the bottom of the grid, so every lookup flips
//! the row at this boundary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::{check_tile_size, decode_sized, MbTilesConfig, TileLoad, TileSource};
use crate::error::{ConfigError, FetchError};
use crate::geo::{TileAddress, ZoomRange, MAX_ZOOM};

/// Tile source reading an MBTiles file.
#[derive(Debug)]
pub struct MbTilesSource {
    path: PathBuf,
    conn: Mutex<Connection>,
    zoom_range: ZoomRange,
    zoom_override: Option<ZoomRange>,
    tile_size: u32,
}

impl MbTilesSource {
    /// Open the database described by `config`.
    pub fn open(config: MbTilesConfig) -> Result<Self, ConfigError> {
        check_tile_size(config.tile_size)?;
        let (conn, zoom_range) = open_database(&config.filename, config.zoom_range)?;

        Ok(Self {
            path: config.filename,
            conn: Mutex::new(conn),
            zoom_range,
            zoom_override: config.zoom_range,
            tile_size: config.tile_size,
        })
    }

    /// Open a database with default settings.
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::open(MbTilesConfig::new(path))
    }

    pub fn filename(&self) -> &Path {
        &self.path
    }

    /// Switch to another database file. Leaves the source unchanged on error.
    pub fn set_filename(&mut self, path: impl Into<PathBuf>) -> Result<(), ConfigError> {
        let path = path.into();
        let (conn, zoom_range) = open_database(&path, self.zoom_override)?;

        *self.conn.get_mut().unwrap_or_else(PoisonError::into_inner) = conn;
        self.zoom_range = zoom_range;
        self.path = path;
        Ok(())
    }

    /// Key/value pairs from the `metadata` table. Empty if the table is
    /// absent.
    pub fn metadata(&self) -> Result<BTreeMap<String, String>, FetchError> {
        let conn = self.lock();
        read_metadata(&conn).map_err(|e| FetchError::Database(e.to_string()))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw encoded bytes for a tile, if stored.
    pub fn tile_data(&self, address: TileAddress) -> Result<Option<Vec<u8>>, FetchError> {
        if !address.is_within_grid() {
            return Ok(None);
        }

        let conn = self.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT tile_data FROM tiles \
                 WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            )
            .map_err(|e| FetchError::Database(e.to_string()))?;

        stmt.query_row(
            (address.zoom, address.col, address.flipped_row()),
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| FetchError::Database(e.to_string()))
    }
}

impl TileSource for MbTilesSource {
    fn name(&self) -> &'static str {
        "mbtiles"
    }

    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn zoom_range(&self) -> ZoomRange {
        self.zoom_range
    }

    fn load(&self, address: TileAddress) -> Result<TileLoad, FetchError> {
        match self.tile_data(address)? {
            Some(data) if !data.is_empty() => {
                Ok(TileLoad::Ready(Some(decode_sized(&data, self.tile_size)?)))
            }
            _ => {
                debug!(tile = %address, "Tile not in database");
                Ok(TileLoad::Ready(None))
            }
        }
    }
}

fn open_database(
    path: &Path,
    zoom_override: Option<ZoomRange>,
) -> Result<(Connection, ZoomRange), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::MissingDatabase(path.to_path_buf()));
    }

    let db_error = |e: rusqlite::Error| ConfigError::Database(format!("{}: {e}", path.display()));

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(db_error)?;

    // Fails early on files that are not tile databases.
    conn.query_row("SELECT COUNT(*) FROM tiles", [], |row| row.get::<_, i64>(0))
        .map_err(db_error)?;

    let zoom_range = match zoom_override {
        Some(range) => range,
        None => stored_zoom_range(&conn).map_err(db_error)?,
    };

    info!(
        path = %path.display(),
        min_zoom = zoom_range.min_level,
        max_zoom = zoom_range.max_level,
        "Opened MBTiles database"
    );
    Ok((conn, zoom_range))
}

/// Zoom bounds from metadata, falling back to the levels present in `tiles`.
fn stored_zoom_range(conn: &Connection) -> rusqlite::Result<ZoomRange> {
    let metadata = read_metadata(conn)?;
    let parse = |key: &str| metadata.get(key).and_then(|v| v.trim().parse::<u8>().ok());

    let (min, max) = match (parse("minzoom"), parse("maxzoom")) {
        (Some(min), Some(max)) => (Some(min), Some(max)),
        _ => conn.query_row(
            "SELECT MIN(zoom_level), MAX(zoom_level) FROM tiles",
            [],
            |row| Ok((row.get::<_, Option<u8>>(0)?, row.get::<_, Option<u8>>(1)?)),
        )?,
    };

    let range = match (min, max) {
        (Some(min), Some(max)) => ZoomRange::new(min, max.min(MAX_ZOOM)).ok(),
        _ => None,
    };
    Ok(range.unwrap_or_default())
}

fn read_metadata(conn: &Connection) -> rusqlite::Result<BTreeMap<String, String>> {
    let has_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'metadata'",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(BTreeMap::new());
    }

    let mut stmt = conn.prepare("SELECT name, value FROM metadata")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    rows.collect()
}
