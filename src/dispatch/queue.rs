use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, FetchError};

/// Default worker poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

// =============================================================================
// Request
// =============================================================================

/// A unit of blocking work executed on the dispatch worker.
///
/// `Display` is used to label the request in logs.
pub trait Request: Send + fmt::Display {
    /// Run the request, consuming it.
    fn execute(self: Box<Self>) -> Result<(), FetchError>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Order in which a drained batch of requests is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    /// Oldest request first
    #[default]
    Fifo,

    /// Newest request first
    Lifo,
}

/// Dispatch queue settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long the worker blocks waiting for work before re-checking the
    /// stop flag
    pub poll_interval: Duration,

    /// Batch execution order
    pub order: DrainOrder,
}

impl DispatchConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_order(mut self, order: DrainOrder) -> Self {
        self.order = order;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            order: DrainOrder::default(),
        }
    }
}

/// Snapshot of queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub running: bool,
    pub pending: usize,
    pub executed: u64,
    pub failed: u64,
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

enum Lifecycle {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

// =============================================================================
// Dispatch Queue
// =============================================================================

/// Single-worker background queue for blocking requests.
///
/// ```text
///   enqueue() ──▶ [ unbounded channel ] ──▶ worker thread
///                                            recv_timeout(poll_interval)
///                                            drain batch (FIFO | LIFO)
///                                            execute, log errors/panics
/// ```
///
/// Requests may be enqueued before [`start`](Self::start); they run once the
/// worker is up. After [`stop`](Self::stop) the queue rejects new requests and
/// anything still queued is dropped unexecuted.
pub struct DispatchQueue {
    config: DispatchConfig,
    sender: Sender<Box<dyn Request>>,
    receiver: Receiver<Box<dyn Request>>,
    lifecycle: Mutex<Lifecycle>,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl DispatchQueue {
    /// Create an idle queue. Call [`start`](Self::start) to spawn the worker.
    pub fn new(config: DispatchConfig) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            config,
            sender,
            receiver,
            lifecycle: Mutex::new(Lifecycle::Idle),
            stop_flag: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Create a queue and start its worker.
    pub fn started(config: DispatchConfig) -> Result<Self, DispatchError> {
        let queue = Self::new(config);
        queue.start()?;
        Ok(queue)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Spawn the worker thread.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut lifecycle = self.lock_lifecycle();
        match *lifecycle {
            Lifecycle::Running(_) => return Err(DispatchError::AlreadyStarted),
            Lifecycle::Stopped => return Err(DispatchError::Stopped),
            Lifecycle::Idle => {}
        }

        let worker = Worker {
            receiver: self.receiver.clone(),
            stop_flag: Arc::clone(&self.stop_flag),
            counters: Arc::clone(&self.counters),
            config: self.config.clone(),
        };

        let handle = thread::Builder::new()
            .name("tile-dispatch".into())
            .spawn(move || worker.run())
            .map_err(|e| DispatchError::Spawn(e.to_string()))?;

        *lifecycle = Lifecycle::Running(handle);
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            order = ?self.config.order,
            "Dispatch queue started"
        );
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// The worker notices the stop flag within one poll interval, after
    /// finishing the request it is executing. Queued requests are dropped.
    /// Calling `stop` more than once is harmless.
    pub fn stop(&self) {
        let previous = {
            let mut lifecycle = self.lock_lifecycle();
            self.stop_flag.store(true, Ordering::Release);
            std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
        };

        if let Lifecycle::Running(handle) = previous {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside a request; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                error!("Dispatch worker terminated abnormally");
            }
            info!("Dispatch queue stopped");
        }

        let abandoned = self.receiver.try_iter().count();
        if abandoned > 0 {
            warn!(abandoned, "Dropped queued requests on stop");
        }
    }

    /// Queue a request for the worker. Never blocks on the worker.
    ///
    /// The stop check and the send happen under the lifecycle lock, so a
    /// request accepted here is either executed or dropped by `stop`.
    pub fn enqueue(&self, request: Box<dyn Request>) -> Result<(), DispatchError> {
        let _lifecycle = self.lock_lifecycle();
        if self.stop_flag.load(Ordering::Acquire) {
            return Err(DispatchError::Stopped);
        }

        debug!(request = %request, "Enqueued request");
        // The queue owns a receiver, so the channel cannot be disconnected.
        self.sender
            .send(request)
            .map_err(|_| DispatchError::Stopped)
    }

    /// Number of requests waiting for the worker.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lock_lifecycle(), Lifecycle::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            running: self.is_running(),
            pending: self.pending(),
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    receiver: Receiver<Box<dyn Request>>,
    stop_flag: Arc<AtomicBool>,
    counters: Arc<Counters>,
    config: DispatchConfig,
}

impl Worker {
    fn run(self) {
        debug!("Dispatch worker running");

        while !self.stop_flag.load(Ordering::Acquire) {
            let first = match self.receiver.recv_timeout(self.config.poll_interval) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut batch = vec![first];
            batch.extend(self.receiver.try_iter());
            if self.config.order == DrainOrder::Lifo {
                batch.reverse();
            }
            debug!(size = batch.len(), "Draining request batch");

            let mut batch = batch.into_iter();
            for request in batch.by_ref() {
                if self.stop_flag.load(Ordering::Acquire) {
                    // Count this one along with the rest of the batch.
                    let abandoned = 1 + batch.len();
                    warn!(abandoned, "Dropped batched requests on stop");
                    break;
                }
                self.execute(request);
            }
        }

        debug!("Dispatch worker exiting");
    }

    fn execute(&self, request: Box<dyn Request>) {
        let label = request.to_string();

        match panic::catch_unwind(AssertUnwindSafe(move || request.execute())) {
            Ok(Ok(())) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                debug!(request = %label, "Request completed");
            }
            Ok(Err(e)) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(request = %label, error = %e, "Request failed");
            }
            Err(payload) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(
                    request = %label,
                    panic = %panic_message(payload.as_ref()),
                    "Request panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
