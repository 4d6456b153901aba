use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::tile::DecodedTile;

/// Default delay before a failed tile may be fetched again.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// When a failed tile becomes eligible for another fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Keep the failure until the cache is invalidated
    Never,

    /// Refetch on the first request after this much time has passed
    After(Duration),
}

impl RetryPolicy {
    /// Build from seconds, where 0 means [`RetryPolicy::Never`].
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            RetryPolicy::Never
        } else {
            RetryPolicy::After(Duration::from_secs(secs))
        }
    }

    pub(crate) fn allows_retry(&self, failed_at: Instant) -> bool {
        match self {
            RetryPolicy::Never => false,
            RetryPolicy::After(delay) => failed_at.elapsed() >= *delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::After(DEFAULT_RETRY_AFTER)
    }
}

/// Cached state of one tile address.
#[derive(Debug, Clone)]
pub(crate) enum TileSlot {
    Ready(Arc<DecodedTile>),

    /// A fetch is queued; only the request holding `ticket` may publish.
    Pending { ticket: u64 },

    /// The source has no such tile.
    Absent,

    Failed { at: Instant },
}

impl TileSlot {
    pub(crate) fn state(&self) -> TileState {
        match self {
            TileSlot::Ready(_) => TileState::Available,
            TileSlot::Pending { .. } => TileState::Requested,
            TileSlot::Absent => TileState::Absent,
            TileSlot::Failed { .. } => TileState::Failed,
        }
    }

    pub(crate) fn is_pending(&self, ticket: u64) -> bool {
        matches!(self, TileSlot::Pending { ticket: t } if *t == ticket)
    }
}

/// Observable lifecycle of a tile address.
///
/// ```text
///   Unknown ──▶ Requested ──▶ Available
///      │                 └──▶ Failed ──(retry window / invalidate)──▶ Unknown
///      └──▶ Absent
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileState {
    /// Never requested, evicted, or invalidated
    Unknown,

    /// Fetch in flight
    Requested,

    /// Decoded pixels are cached
    Available,

    /// The source has no tile at this address, or it is out of range
    Absent,

    /// The last fetch failed
    Failed,
}

impl TileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileState::Unknown => "unknown",
            TileState::Requested => "requested",
            TileState::Available => "available",
            TileState::Absent => "absent",
            TileState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
