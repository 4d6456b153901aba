use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

use crate::geo::TileAddress;

/// Notification emitted by a tile manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEvent {
    /// An asynchronously fetched tile is now cached
    Ready(TileAddress),

    /// An asynchronous fetch reported that the source has no such tile
    Absent(TileAddress),

    /// An asynchronous fetch failed
    Failed(TileAddress),

    /// Every cached tile was dropped; redraw everything
    Invalidated,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&TileEvent) + Send + Sync>;

/// Registered event callbacks.
///
/// Callbacks are invoked on whichever thread emits the event, outside of
/// this list's lock, so a callback may subscribe or unsubscribe.
#[derive(Default)]
pub(crate) struct Subscribers {
    callbacks: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
}

impl Subscribers {
    fn lock(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Callback)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, callback));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.lock();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn notify(&self, event: TileEvent) {
        let callbacks: Vec<Callback> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                error!(?event, "Tile event subscriber panicked");
            }
        }
    }
}
