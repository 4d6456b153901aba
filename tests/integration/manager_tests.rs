//! Tile manager tests across components: shared dispatch queues, queue
//! shutdown and subscriber behaviour.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use maptile_cache::{
    ChannelLayout, DecodedTile, DispatchConfig, DispatchQueue, DrainOrder, FetchError,
    ManagerConfig, TileAddress, TileEvent, TileFetch, TileLoad, TileManager, TileSource,
    TileState, ZoomRange,
};

use super::test_utils::{event_channel, wait_for, EVENT_TIMEOUT};

/// Deferred source whose fetches record their order and optionally wait on
/// a gate before completing.
struct RecordingSource {
    label: u8,
    order: Arc<Mutex<Vec<(u8, TileAddress)>>>,
    gate: Option<Receiver<()>>,
}

struct RecordingFetch {
    label: u8,
    address: TileAddress,
    order: Arc<Mutex<Vec<(u8, TileAddress)>>>,
    gate: Option<Receiver<()>>,
}

impl fmt::Display for RecordingFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recording {} {}", self.label, self.address)
    }
}

impl TileFetch for RecordingFetch {
    fn fetch(self: Box<Self>) -> Result<Option<DecodedTile>, FetchError> {
        if let Some(gate) = &self.gate {
            gate.recv_timeout(EVENT_TIMEOUT)
                .map_err(|_| FetchError::Timeout("gate".to_string()))?;
        }
        self.order.lock().unwrap().push((self.label, self.address));
        Ok(Some(
            DecodedTile::new(1, 1, ChannelLayout::Rgb, vec![self.label; 3]).unwrap(),
        ))
    }
}

impl TileSource for RecordingSource {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn tile_size(&self) -> u32 {
        1
    }

    fn zoom_range(&self) -> ZoomRange {
        ZoomRange::new(0, 4).unwrap()
    }

    fn load(&self, address: TileAddress) -> Result<TileLoad, FetchError> {
        Ok(TileLoad::Deferred(Box::new(RecordingFetch {
            label: self.label,
            address,
            order: Arc::clone(&self.order),
            gate: self.gate.clone(),
        })))
    }
}

fn recording(label: u8, order: &Arc<Mutex<Vec<(u8, TileAddress)>>>) -> RecordingSource {
    RecordingSource {
        label,
        order: Arc::clone(order),
        gate: None,
    }
}

#[test]
fn test_managers_share_one_queue() {
    let queue = Arc::new(DispatchQueue::started(DispatchConfig::default()).unwrap());
    let order = Arc::new(Mutex::new(Vec::new()));

    let first = TileManager::new(recording(1, &order), Arc::clone(&queue), ManagerConfig::default());
    let second =
        TileManager::new(recording(2, &order), Arc::clone(&queue), ManagerConfig::default());
    let first_events = event_channel(&first);
    let second_events = event_channel(&second);

    let address = TileAddress::new(1, 0, 0);
    first.get_tile(address);
    second.get_tile(address);
    wait_for(&first_events, address);
    wait_for(&second_events, address);

    // Each manager caches only its own source's tile.
    assert_eq!(first.get_tile(address).unwrap().pixels(), &[1, 1, 1]);
    assert_eq!(second.get_tile(address).unwrap().pixels(), &[2, 2, 2]);
    assert_eq!(order.lock().unwrap().len(), 2);
}

#[test]
fn test_lifo_queue_serves_newest_first() {
    let (release, gate) = bounded::<()>(8);
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(DispatchQueue::new(
        DispatchConfig::default().with_order(DrainOrder::Lifo),
    ));

    let manager = TileManager::new(
        RecordingSource {
            label: 0,
            order: Arc::clone(&order),
            gate: Some(gate),
        },
        Arc::clone(&queue),
        ManagerConfig::default(),
    );
    let events = event_channel(&manager);

    // Queue three requests before the worker runs so they drain as a batch.
    let addresses: Vec<_> = (0..3).map(|col| TileAddress::new(2, 0, col)).collect();
    for address in &addresses {
        manager.get_tile(*address);
    }
    queue.start().unwrap();
    for _ in &addresses {
        release.send(()).unwrap();
    }
    for address in &addresses {
        wait_for(&events, *address);
    }

    let served: Vec<_> = order.lock().unwrap().iter().map(|(_, a)| a.col).collect();
    assert_eq!(served, vec![2, 1, 0]);
}

#[test]
fn test_stopped_queue_fails_new_misses() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let manager = TileManager::with_worker(
        recording(0, &order),
        ManagerConfig::default(),
        Duration::from_millis(20),
    )
    .unwrap();
    let events = event_channel(&manager);

    manager.queue().stop();
    let address = TileAddress::new(0, 0, 0);
    assert!(manager.get_tile(address).is_none());
    assert_eq!(manager.tile_state(address), TileState::Failed);
    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)),
        Ok(TileEvent::Failed(address))
    );
}

#[test]
fn test_stop_with_pending_requests_does_not_hang() {
    let (release, gate) = bounded::<()>(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let manager = TileManager::with_worker(
        RecordingSource {
            label: 0,
            order: Arc::clone(&order),
            gate: Some(gate),
        },
        ManagerConfig::default(),
        Duration::from_millis(20),
    )
    .unwrap();

    for col in 0..4 {
        manager.get_tile(TileAddress::new(2, 1, col));
    }

    // At most the fetch in progress completes; the others are abandoned.
    let (done_tx, done_rx): (Sender<()>, Receiver<()>) = bounded(1);
    let queue = Arc::clone(manager.queue());
    std::thread::spawn(move || {
        queue.stop();
        let _ = done_tx.send(());
    });
    std::thread::sleep(Duration::from_millis(100));
    let _ = release.try_send(());

    assert!(done_rx.recv_timeout(EVENT_TIMEOUT).is_ok());
    assert!(manager.queue().is_stopped());
    assert!(order.lock().unwrap().len() <= 1);
}

#[test]
fn test_subscriber_may_unsubscribe_itself() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let manager = Arc::new(
        TileManager::with_worker(
            recording(0, &order),
            ManagerConfig::default(),
            Duration::from_millis(20),
        )
        .unwrap(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let id_slot = Arc::new(Mutex::new(None));

    let weak = Arc::downgrade(&manager);
    let counter = Arc::clone(&calls);
    let slot = Arc::clone(&id_slot);
    let id = manager.subscribe(move |_event: &TileEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let (Some(manager), Some(id)) = (weak.upgrade(), *slot.lock().unwrap()) {
            manager.unsubscribe(id);
        }
    });
    *id_slot.lock().unwrap() = Some(id);

    let events = event_channel(&manager);
    let first = TileAddress::new(1, 0, 0);
    manager.get_tile(first);
    wait_for(&events, first);

    let second = TileAddress::new(1, 1, 1);
    manager.get_tile(second);
    wait_for(&events, second);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.stats().subscribers, 1);
}

#[test]
fn test_invalidate_discards_in_flight_result() {
    let (release, gate) = bounded::<()>(1);
    let order = Arc::new(Mutex::new(Vec::new()));
    let manager = TileManager::with_worker(
        RecordingSource {
            label: 0,
            order: Arc::clone(&order),
            gate: Some(gate),
        },
        ManagerConfig::default(),
        Duration::from_millis(20),
    )
    .unwrap();
    let events = event_channel(&manager);
    let address = TileAddress::new(0, 0, 0);

    manager.get_tile(address);
    manager.invalidate();
    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)),
        Ok(TileEvent::Invalidated)
    );

    release.send(()).unwrap();
    // The stale result is dropped: no Ready event, state stays Unknown.
    assert!(events.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(manager.tile_state(address), TileState::Unknown);
    assert_eq!(order.lock().unwrap().len(), 1);
}
