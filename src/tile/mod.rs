//! Decoded tile pixels and their encodings.
//!
//! ```text
//!   PNG / JPEG bytes ──decode_tile──▶ DecodedTile ──PngTileEncoder──▶ PNG bytes
//! ```
//!
//! # Components
//!
//! - [`DecodedTile`]: immutable 8-bit pixel buffer with an RGB or RGBA layout
//! - [`decode_tile`]: payload decoding used by every tile source
//! - [`PngTileEncoder`]: output encoding for the server and CLI
//! - [`unavailable_tile`]: placeholder drawn for tiles that failed to load

mod decoded;
mod encoder;
mod placeholder;

pub use decoded::{decode_tile, ChannelLayout, DecodedTile};
pub use encoder::{PngCompression, PngTileEncoder};
pub use placeholder::unavailable_tile;
