//! Tile manager: the composition root.
//!
//! A [`TileManager`] owns one [`TileSource`](crate::source::TileSource) and a
//! bounded cache of per-address [`TileState`]s, and shares a
//! [`DispatchQueue`](crate::dispatch::DispatchQueue) with other managers.
//! Rendering code talks only to the manager:
//!
//! - `get_tile` for pixels (never blocks on the network)
//! - `subscribe` for [`TileEvent`]s telling it when to redraw
//! - `data_dimensions`, `wrap_flags`, `tile_size` and `tile_number_for` for
//!   grid geometry

mod events;
mod request;
mod slot;
mod tile_manager;

pub use events::{SubscriptionId, TileEvent};
pub use slot::{RetryPolicy, TileState, DEFAULT_RETRY_AFTER};
pub use tile_manager::{ManagerConfig, ManagerStats, TileManager};
