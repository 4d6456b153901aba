use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use super::events::TileEvent;
use super::slot::TileSlot;
use super::tile_manager::Shared;
use crate::dispatch::Request;
use crate::error::FetchError;
use crate::geo::TileAddress;
use crate::source::TileFetch;

/// Deferred fetch bound to the manager state that issued it.
///
/// The request publishes its result only into the `Pending` slot carrying
/// its ticket. If the cache was invalidated or the slot evicted meanwhile,
/// the result is dropped and no event fires.
pub(crate) struct FetchRequest {
    pub(crate) address: TileAddress,
    pub(crate) ticket: u64,
    pub(crate) job: Box<dyn TileFetch>,
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {} ({})", self.address, self.job)
    }
}

impl Request for FetchRequest {
    fn execute(self: Box<Self>) -> Result<(), FetchError> {
        let FetchRequest {
            address,
            ticket,
            job,
            shared,
        } = *self;

        let outcome = match panic::catch_unwind(AssertUnwindSafe(move || job.fetch())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                shared.complete(address, ticket, TileSlot::Failed { at: Instant::now() });
                panic::resume_unwind(payload);
            }
        };

        match outcome {
            Ok(Some(tile)) => {
                shared.complete(address, ticket, TileSlot::Ready(Arc::new(tile)));
                Ok(())
            }
            Ok(None) => {
                shared.complete(address, ticket, TileSlot::Absent);
                Ok(())
            }
            Err(e) => {
                shared.complete(address, ticket, TileSlot::Failed { at: Instant::now() });
                Err(e)
            }
        }
    }
}

impl Shared {
    /// Store a load result if the slot still belongs to `ticket`, without
    /// notifying anyone.
    pub(crate) fn publish(&self, address: TileAddress, ticket: u64, slot: TileSlot) -> bool {
        let published = self
            .cache
            .update(&address, |current| current.is_pending(ticket).then_some(slot));

        if !published {
            debug!(tile = %address, ticket, "Discarded stale fetch result");
        }
        published
    }

    /// Publish a fetch result and notify subscribers if the slot still
    /// belongs to `ticket`.
    pub(crate) fn complete(&self, address: TileAddress, ticket: u64, slot: TileSlot) -> bool {
        let event = match &slot {
            TileSlot::Ready(_) => TileEvent::Ready(address),
            TileSlot::Absent => TileEvent::Absent(address),
            _ => TileEvent::Failed(address),
        };

        let published = self.publish(address, ticket, slot);
        if published {
            self.subscribers.notify(event);
        }
        published
    }
}
