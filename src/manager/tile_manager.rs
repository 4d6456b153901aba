use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{Subscribers, SubscriptionId, TileEvent};
use super::request::FetchRequest;
use super::slot::{RetryPolicy, TileSlot, TileState};
use crate::cache::{BoundedCache, CachePolicy, CacheStats, DEFAULT_CACHE_CAPACITY};
use crate::dispatch::{DispatchConfig, DispatchQueue, DispatchStats};
use crate::error::{ConfigError, DispatchError};
use crate::geo::{TileAddress, WrapFlags, ZoomQuery, ZoomRange};
use crate::source::{TileLoad, TileSource};
use crate::tile::{unavailable_tile, DecodedTile};

// =============================================================================
// Configuration
// =============================================================================

/// Tile manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Maximum number of cached tile slots
    pub cache_capacity: NonZeroUsize,

    pub cache_policy: CachePolicy,

    /// Retry behaviour for failed fetches
    pub retry: RetryPolicy,
}

impl ManagerConfig {
    pub fn with_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            cache_policy: CachePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Snapshot of manager counters.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub source: &'static str,
    pub cache: CacheStats,
    pub dispatch: DispatchStats,
    pub subscribers: usize,
}

/// State shared between the manager and its in-flight requests.
pub(crate) struct Shared {
    pub(crate) cache: BoundedCache<TileAddress, TileSlot>,
    pub(crate) subscribers: Subscribers,
}

// =============================================================================
// Tile Manager
// =============================================================================

/// Binds a [`TileSource`] to a bounded cache and a dispatch queue.
///
/// ```text
///   get_tile(addr)
///        │
///        ▼
///   ┌─────────┐  hit   ┌──────────────────────────┐
///   │  cache  │ ─────▶ │ Ready / Absent / Pending │
///   └────┬────┘        └──────────────────────────┘
///        │ miss
///        ▼
///   Pending(ticket) ──▶ source.load(addr) ── Ready ──▶ cache.update
///                              │
///                              └── Deferred ──▶ DispatchQueue
///                                               │ fetch
///                                               ▼
///                               cache.update(if ticket matches)
///                               notify(TileEvent::Ready | Failed)
/// ```
///
/// `get_tile` never blocks on network I/O, and inline loads run outside the
/// cache lock. Each address has at most one load in flight; further misses
/// while it is pending return `None` without loading again.
pub struct TileManager<S: TileSource> {
    source: RwLock<S>,
    shared: Arc<Shared>,
    queue: Arc<DispatchQueue>,
    retry: RetryPolicy,
    next_ticket: AtomicU64,
    placeholder: OnceLock<Arc<DecodedTile>>,
}

impl<S: TileSource> TileManager<S> {
    /// Create a manager that dispatches deferred fetches onto `queue`.
    pub fn new(source: S, queue: Arc<DispatchQueue>, config: ManagerConfig) -> Self {
        info!(
            source = source.name(),
            capacity = config.cache_capacity.get(),
            policy = %config.cache_policy,
            "Tile manager created"
        );

        Self {
            source: RwLock::new(source),
            shared: Arc::new(Shared {
                cache: BoundedCache::new(config.cache_capacity, config.cache_policy),
                subscribers: Subscribers::default(),
            }),
            queue,
            retry: config.retry,
            next_ticket: AtomicU64::new(0),
            placeholder: OnceLock::new(),
        }
    }

    /// Create a manager with its own started queue, ordered the way the
    /// source prefers.
    pub fn with_worker(
        source: S,
        config: ManagerConfig,
        poll_interval: Duration,
    ) -> Result<Self, DispatchError> {
        let dispatch = DispatchConfig::default()
            .with_poll_interval(poll_interval)
            .with_order(source.drain_order());
        let queue = Arc::new(DispatchQueue::started(dispatch)?);
        Ok(Self::new(source, queue, config))
    }

    fn read_source(&self) -> RwLockReadGuard<'_, S> {
        self.source.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_source(&self) -> RwLockWriteGuard<'_, S> {
        self.source.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    // -------------------------------------------------------------------------
    // Geometry
    // -------------------------------------------------------------------------

    pub fn tile_size(&self) -> u32 {
        self.read_source().tile_size()
    }

    pub fn zoom_range(&self) -> ZoomRange {
        self.read_source().zoom_range()
    }

    /// `(rows, cols)` at a zoom level. [`ZoomQuery::Max`] selects the deepest
    /// configured level.
    pub fn data_dimensions(&self, zoom: impl Into<ZoomQuery>) -> (u32, u32) {
        let source = self.read_source();
        let zoom = zoom.into().resolve(source.zoom_range());
        source.data_dimensions(zoom)
    }

    pub fn wrap_flags(&self) -> WrapFlags {
        self.read_source().wrap_flags()
    }

    /// Tile containing world pixel `(x, y)` at `zoom`.
    pub fn tile_number_for(&self, x: f64, y: f64, zoom: u8) -> Option<TileAddress> {
        self.read_source().tile_number_for(x, y, zoom)
    }

    /// Map an address onto the source's grid, folding wrapping axes.
    /// `None` for zooms outside the range and rows/cols off the grid.
    pub fn normalize(&self, address: TileAddress) -> Option<TileAddress> {
        normalize(&*self.read_source(), address)
    }

    // -------------------------------------------------------------------------
    // Tiles
    // -------------------------------------------------------------------------

    /// Return the tile if it is cached.
    ///
    /// On a miss, synchronous sources are read inline and their result is
    /// returned; deferred sources get one fetch enqueued and `None` comes back
    /// at once. Subscribe to [`TileEvent::Ready`] to learn when to ask again.
    /// An address another caller is still loading also yields `None`.
    pub fn get_tile(&self, address: TileAddress) -> Option<Arc<DecodedTile>> {
        let source = self.read_source();
        let address = normalize(&*source, address)?;

        // Claim the miss with a pending slot; the load itself runs outside
        // the cache lock.
        let mut claimed = None;
        let slot = self.shared.cache.refresh_if(
            address,
            |slot| match slot {
                TileSlot::Failed { at } => self.retry.allows_retry(*at),
                _ => false,
            },
            |_| {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                claimed = Some(ticket);
                TileSlot::Pending { ticket }
            },
        );

        let Some(ticket) = claimed else {
            return match slot {
                TileSlot::Ready(tile) => Some(tile),
                _ => None,
            };
        };

        let job = match source.load(address) {
            Ok(TileLoad::Ready(Some(tile))) => {
                let tile = Arc::new(tile);
                self.shared
                    .publish(address, ticket, TileSlot::Ready(Arc::clone(&tile)));
                return Some(tile);
            }
            Ok(TileLoad::Ready(None)) => {
                self.shared.publish(address, ticket, TileSlot::Absent);
                return None;
            }
            Err(e) => {
                warn!(tile = %address, error = %e, "Tile load failed");
                self.shared
                    .publish(address, ticket, TileSlot::Failed { at: Instant::now() });
                return None;
            }
            Ok(TileLoad::Deferred(job)) => job,
        };
        drop(source);

        let request = FetchRequest {
            address,
            ticket,
            job,
            shared: Arc::clone(&self.shared),
        };
        if let Err(e) = self.queue.enqueue(Box::new(request)) {
            warn!(tile = %address, error = %e, "Could not enqueue tile fetch");
            self.shared
                .complete(address, ticket, TileSlot::Failed { at: Instant::now() });
        }
        None
    }

    /// Current state of an address, without triggering a load.
    pub fn tile_state(&self, address: TileAddress) -> TileState {
        let Some(address) = self.normalize(address) else {
            return TileState::Absent;
        };

        match self.shared.cache.peek(&address) {
            Some(slot) => slot.state(),
            None => TileState::Unknown,
        }
    }

    /// Like [`get_tile`](Self::get_tile), but an address known to be absent
    /// or failed yields the placeholder tile. `None` only while a fetch is in
    /// flight.
    pub fn tile_or_placeholder(&self, address: TileAddress) -> Option<Arc<DecodedTile>> {
        if let Some(tile) = self.get_tile(address) {
            return Some(tile);
        }

        match self.tile_state(address) {
            TileState::Requested | TileState::Unknown => None,
            TileState::Available | TileState::Absent | TileState::Failed => {
                Some(self.placeholder())
            }
        }
    }

    /// Placeholder tile at the source's tile size.
    pub fn placeholder(&self) -> Arc<DecodedTile> {
        Arc::clone(
            self.placeholder
                .get_or_init(|| Arc::new(unavailable_tile(self.tile_size()))),
        )
    }

    // -------------------------------------------------------------------------
    // Invalidation
    // -------------------------------------------------------------------------

    /// Drop every cached tile. Results of fetches already in flight are
    /// discarded when they complete.
    pub fn invalidate(&self) {
        self.shared.cache.invalidate_all();
        debug!("Tile cache invalidated");
        self.shared.subscribers.notify(TileEvent::Invalidated);
    }

    /// Change the source's configuration.
    ///
    /// `f` runs under the source's write lock. On success the cache is
    /// invalidated before the lock is released and subscribers receive
    /// [`TileEvent::Invalidated`]. On error nothing is invalidated.
    pub fn reconfigure<F, R>(&self, f: F) -> Result<R, ConfigError>
    where
        F: FnOnce(&mut S) -> Result<R, ConfigError>,
    {
        let result = {
            let mut source = self.write_source();
            let result = f(&mut *source);
            if result.is_ok() {
                self.shared.cache.invalidate_all();
            }
            result
        };

        match &result {
            Ok(_) => {
                info!("Tile source reconfigured");
                self.shared.subscribers.notify(TileEvent::Invalidated);
            }
            Err(e) => warn!(error = %e, "Tile source reconfiguration rejected"),
        }
        result
    }

    /// Read access to the source.
    pub fn with_source<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&*self.read_source())
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Register a callback for [`TileEvent`]s.
    ///
    /// Callbacks run on the thread that produced the event, usually the
    /// dispatch worker, and must not block. Forward into a channel to get
    /// events onto another thread.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TileEvent) + Send + Sync + 'static,
    {
        self.shared.subscribers.subscribe(Arc::new(callback))
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.subscribers.unsubscribe(id)
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            source: self.read_source().name(),
            cache: self.shared.cache.stats(),
            dispatch: self.queue.stats(),
            subscribers: self.shared.subscribers.len(),
        }
    }
}

impl<S: TileSource> fmt::Debug for TileManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileManager")
            .field("source", &self.read_source().name())
            .field("cache", &self.shared.cache)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn normalize<S: TileSource + ?Sized>(source: &S, address: TileAddress) -> Option<TileAddress> {
    if !source.zoom_range().contains(address.zoom) {
        return None;
    }

    let (rows, cols) = source.data_dimensions(address.zoom);
    let wrap = source.wrap_flags();

    Some(TileAddress {
        zoom: address.zoom,
        row: fold(address.row, rows, wrap.y)?,
        col: fold(address.col, cols, wrap.x)?,
    })
}

fn fold(index: u32, extent: u32, wraps: bool) -> Option<u32> {
    match (index < extent, wraps && extent > 0) {
        (true, _) => Some(index),
        (false, true) => Some(index % extent),
        (false, false) => None,
    }
}
