//! Controller runtime: work queue, workers, backoff, change notifications,
//! periodic resync and garbage collection.
//!
//! The queue is keyed by device. A key that is being processed is never
//! handed to a second worker, which is what lets [`Engine::reconcile`] run
//! without locks of its own.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Notify};
use tracing::{debug, error, info, warn, Instrument};

use crate::config::ConvergenceMode;
use crate::engine::Engine;
use crate::error::Result;
use crate::meta::ObjectKey;
use crate::selector::Collector;

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

#[derive(Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// De-duplicating queue of device keys.
///
/// - a key queued twice is handed out once;
/// - a key re-added while a worker holds it is deferred until
///   [`WorkQueue::done`] is called for it.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: ObjectKey) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Add `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release `key` after processing, re-queueing it if it was added
    /// meanwhile.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shutdown(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`.
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn failure(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.clone()).or_insert(0);
        let factor = 1u32.checked_shl(*count).unwrap_or(u32::MAX);
        *count = count.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller {
    engine: Engine,
    collector: Collector,
    queue: Arc<WorkQueue>,
    backoff: Arc<Backoff>,
}

impl Controller {
    pub fn new(engine: Engine) -> Self {
        let config = engine.config();
        let collector = Collector::new(
            engine.store().clone(),
            config.request_history_limit,
            config.call_timeout(),
        );
        let backoff = Backoff::new(config.base_backoff(), config.max_backoff());
        Self {
            engine,
            collector,
            queue: Arc::new(WorkQueue::new()),
            backoff: Arc::new(backoff),
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    /// Workers finish the pass they are in before this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = self.engine.config().clone();
        // zero intervals would panic in tokio::time::interval
        config.ensure_valid()?;
        let store = self.engine.store().clone();
        // subscribe before the first listing so no change slips between them
        let mut events = store.subscribe();

        info!(
            workers = config.workers,
            mode = config.mode.as_str(),
            "controller starting"
        );

        let workers: Vec<_> = (0..config.workers)
            .map(|id| {
                let engine = self.engine.clone();
                let queue = self.queue.clone();
                let backoff = self.backoff.clone();
                tokio::spawn(
                    worker(engine, queue, backoff).instrument(tracing::info_span!("worker", id)),
                )
            })
            .collect();

        let mut resync = tokio::time::interval(config.resync_interval());
        let mut gc = tokio::time::interval(config.gc_interval());
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        gc.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        debug!(device = %event.device_key(), "change notification");
                        self.queue.add(event.device_key().clone());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "change notifications dropped, resyncing");
                        self.resync().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("store closed its change stream");
                        break;
                    }
                },
                _ = resync.tick() => self.resync().await,
                _ = gc.tick(), if config.mode == ConvergenceMode::Requests => {
                    if let Err(e) = self.collector.collect(None).await {
                        warn!(error = %e, "garbage collection pass failed");
                    }
                }
            }
        }

        info!("controller shutting down");
        self.queue.shutdown();
        for res in futures::future::join_all(workers).await {
            if let Err(e) = res {
                error!(error = %e, "worker task failed");
            }
        }
        Ok(())
    }

    /// Enqueue every known device.
    async fn resync(&self) {
        match self.engine.store().list_devices(None).await {
            Ok(devices) => {
                debug!(count = devices.len(), "resync");
                for device in devices {
                    self.queue.add(device.key());
                }
            }
            Err(e) => warn!(error = %e, "resync listing failed"),
        }
    }
}

async fn worker(engine: Engine, queue: Arc<WorkQueue>, backoff: Arc<Backoff>) {
    while let Some(key) = queue.next().await {
        match engine.reconcile(&key).await {
            Ok(outcome) => {
                backoff.reset(&key);
                if let Some(after) = outcome.requeue_after {
                    queue.add_after(key.clone(), after);
                }
            }
            Err(e) => {
                let delay = backoff.failure(&key);
                if e.is_retriable() {
                    warn!(device = %key, error = %e, retry_in_ms = delay.as_millis() as u64, "reconcile failed");
                } else {
                    error!(device = %key, error = %e, retry_in_ms = delay.as_millis() as u64, "reconcile failed, needs attention");
                }
                queue.add_after(key.clone(), delay);
            }
        }
        queue.done(&key);
    }
}
