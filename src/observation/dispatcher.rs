//! Observation dispatcher and its delivery worker.
//!
//! This module owns the consumer registry and fans committed batches out to
//! listeners. Synchronous listeners run on the committing thread before
//! `dispatch_events` returns. Asynchronous delivery is queued on an unbounded
//! channel and drained in FIFO order by a single dedicated worker thread, so
//! a slow asynchronous listener delays later batches but never a commit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::error::{ObservationError, ObservationResult};
use crate::item::SessionId;
use crate::node_type::NodeTypeResolver;
use crate::path::PathNormalizer;

use super::consumer::{ConsumerKey, EventConsumer};
use super::event::{EventBatch, SealedBatch};
use super::listener::DeliveryMode;
use super::manager::ObservationManager;
use super::registry::{ConsumerRegistry, ConsumerSnapshot};

/// Dispatcher settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name of the delivery worker thread.
    pub worker_name: String,
    /// Deliveries slower than this are logged. Zero disables the check.
    pub slow_listener_threshold_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_name: "observation-dispatcher".to_string(),
            slow_listener_threshold_ms: 1000,
        }
    }
}

/// Delivery counters, updated by committing threads and the worker.
#[derive(Debug, Default)]
pub struct DispatchStats {
    batches_dispatched: AtomicU64,
    synchronous_deliveries: AtomicU64,
    asynchronous_deliveries: AtomicU64,
    listener_failures: AtomicU64,
    dropped_actions: AtomicU64,
}

impl DispatchStats {
    /// Batches passed to `dispatch_events`.
    #[must_use]
    pub fn batches_dispatched(&self) -> u64 {
        self.batches_dispatched.load(Ordering::Relaxed)
    }

    /// Successful deliveries made inline by the dispatching thread.
    #[must_use]
    pub fn synchronous_deliveries(&self) -> u64 {
        self.synchronous_deliveries.load(Ordering::Relaxed)
    }

    /// Successful deliveries made by the worker.
    #[must_use]
    pub fn asynchronous_deliveries(&self) -> u64 {
        self.asynchronous_deliveries.load(Ordering::Relaxed)
    }

    /// Listener errors and panics, in either phase.
    #[must_use]
    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    /// Asynchronous actions discarded because the dispatcher was disposed.
    #[must_use]
    pub fn dropped_actions(&self) -> u64 {
        self.dropped_actions.load(Ordering::Relaxed)
    }
}

enum DispatchAction {
    Deliver {
        batch: Arc<SealedBatch>,
        consumers: ConsumerSnapshot,
    },
    Terminate,
}

/// Dispatches committed event batches to registered consumers.
///
/// One dispatcher serves every session of a workspace. Sessions reach it
/// through an [`ObservationManager`] that borrows it, so the dispatcher
/// outlives all of them.
#[derive(Debug)]
pub struct ObservationDispatcher {
    cfg: DispatcherConfig,
    registry: ConsumerRegistry,
    queue_tx: Sender<DispatchAction>,
    // Held across the disposed check and the send, so no `Deliver` lands behind `Terminate`.
    enqueue_gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    terminate_sent: AtomicBool,
    sequence: AtomicU64,
    stats: Arc<DispatchStats>,
}

impl std::fmt::Debug for DispatchAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deliver { batch, consumers } => f
                .debug_struct("Deliver")
                .field("sequence", &batch.sequence())
                .field("consumers", &consumers.len())
                .finish(),
            Self::Terminate => f.write_str("Terminate"),
        }
    }
}

impl ObservationDispatcher {
    /// Creates a dispatcher and starts its delivery worker.
    pub fn new(cfg: DispatcherConfig) -> ObservationResult<Self> {
        let (queue_tx, queue_rx) = unbounded::<DispatchAction>();
        let stats = Arc::new(DispatchStats::default());

        let slow_threshold = Duration::from_millis(cfg.slow_listener_threshold_ms);
        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name(cfg.worker_name.clone())
            .spawn(move || worker_loop(&queue_rx, &thread_stats, slow_threshold))
            .map_err(|e| ObservationError::internal(format!("failed to spawn observation worker: {e}")))?;

        Ok(Self {
            worker_id: handle.thread().id(),
            cfg,
            registry: ConsumerRegistry::new(),
            queue_tx,
            enqueue_gate: Mutex::new(()),
            worker: Mutex::new(Some(handle)),
            terminate_sent: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            stats,
        })
    }

    /// Creates the observation manager for one session.
    #[must_use]
    pub fn create_manager(
        &self,
        session: SessionId,
        paths: Arc<dyn PathNormalizer>,
        node_types: Arc<dyn NodeTypeResolver>,
    ) -> ObservationManager<'_> {
        ObservationManager::new(self, session, paths, node_types)
    }

    /// Adds or replaces a consumer.
    pub fn add_consumer(&self, consumer: EventConsumer) {
        let key = consumer.key();
        let mode = consumer.delivery_mode();
        if self.registry.add(consumer).is_some() {
            debug!(consumer = %key, ?mode, "replaced event consumer");
        } else {
            debug!(consumer = %key, ?mode, "added event consumer");
        }
    }

    /// Unregisters a consumer. Unknown keys are ignored.
    pub fn remove_consumer(&self, key: &ConsumerKey) {
        if self.registry.remove(key).is_some() {
            debug!(consumer = %key, "removed event consumer");
        }
    }

    /// Current synchronous consumers.
    #[must_use]
    pub fn synchronous_consumers(&self) -> ConsumerSnapshot {
        self.registry.snapshot(DeliveryMode::Synchronous)
    }

    /// Current asynchronous consumers.
    #[must_use]
    pub fn asynchronous_consumers(&self) -> ConsumerSnapshot {
        self.registry.snapshot(DeliveryMode::Asynchronous)
    }

    /// Synchronous and asynchronous snapshots taken at the same instant.
    #[must_use]
    pub fn consumer_snapshots(&self) -> (ConsumerSnapshot, ConsumerSnapshot) {
        self.registry.snapshots()
    }

    /// Gives every current consumer one chance to precompute its view of
    /// `batch`. Does nothing if the batch is already prepared.
    pub fn prepare_events(&self, batch: &mut EventBatch) {
        if batch.is_prepared() {
            return;
        }
        let (synchronous, asynchronous) = self.registry.snapshots();
        for consumer in synchronous.iter().chain(asynchronous.iter()) {
            consumer.prepare_events(batch);
        }
        batch.mark_prepared();
    }

    /// Delivers `batch` to synchronous consumers inline, then queues it for
    /// the asynchronous consumers registered at this instant.
    ///
    /// Listener failures are logged and never returned.
    pub fn dispatch_events(&self, mut batch: EventBatch) {
        self.prepare_events(&mut batch);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let batch = Arc::new(batch.seal(sequence));
        self.stats.batches_dispatched.fetch_add(1, Ordering::Relaxed);

        let synchronous = self.registry.snapshot(DeliveryMode::Synchronous);
        debug!(sequence, events = batch.len(), consumers = synchronous.len(), "notifying synchronous listeners");
        let slow_threshold = self.slow_threshold();
        for consumer in synchronous.iter() {
            deliver(consumer, &batch, DeliveryMode::Synchronous, &self.stats, slow_threshold);
        }

        let asynchronous = self.registry.snapshot(DeliveryMode::Asynchronous);
        if asynchronous.is_empty() {
            trace!(sequence, "no asynchronous listeners");
            return;
        }
        let _gate = self.enqueue_gate.lock();
        if self.is_disposed() {
            warn!(sequence, "dispatcher disposed; asynchronous delivery skipped");
            self.stats.dropped_actions.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let action = DispatchAction::Deliver {
            batch,
            consumers: asynchronous,
        };
        if self.queue_tx.send(action).is_err() {
            warn!(sequence, "observation worker gone; asynchronous delivery skipped");
            self.stats.dropped_actions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stops the delivery worker after it has drained every action queued
    /// before this call. Later calls return immediately.
    ///
    /// Called from a listener on the worker thread, this only requests
    /// termination; the worker stops once the current batch is finished.
    pub fn dispose(&self) {
        if thread::current().id() == self.worker_id {
            self.request_termination();
            return;
        }

        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };
        self.request_termination();
        if handle.join().is_err() {
            error!(worker = %self.cfg.worker_name, "observation worker panicked");
        }
        info!(worker = %self.cfg.worker_name, "notification of event listeners stopped");
    }

    fn request_termination(&self) {
        let _gate = self.enqueue_gate.lock();
        if !self.terminate_sent.swap(true, Ordering::AcqRel) && self.queue_tx.send(DispatchAction::Terminate).is_err() {
            debug!("observation worker already stopped");
        }
    }

    /// Returns true once `dispose` has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.terminate_sent.load(Ordering::Acquire)
    }

    /// Number of actions waiting for the worker.
    #[must_use]
    pub fn pending_actions(&self) -> usize {
        self.queue_tx.len()
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Configuration this dispatcher was created with.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.cfg.slow_listener_threshold_ms)
    }
}

impl Drop for ObservationDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn deliver(
    consumer: &EventConsumer,
    batch: &SealedBatch,
    phase: DeliveryMode,
    stats: &DispatchStats,
    slow_threshold: Duration,
) {
    let started = Instant::now();
    let result = consumer.consume_events(batch);
    let elapsed = started.elapsed();

    match result {
        Ok(0) => {}
        Ok(delivered) => {
            let counter = match phase {
                DeliveryMode::Synchronous => &stats.synchronous_deliveries,
                DeliveryMode::Asynchronous => &stats.asynchronous_deliveries,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            trace!(consumer = %consumer.key(), sequence = batch.sequence(), delivered, "events delivered");
        }
        Err(err) => {
            stats.listener_failures.fetch_add(1, Ordering::Relaxed);
            match phase {
                DeliveryMode::Synchronous => {
                    error!(consumer = %consumer.key(), sequence = batch.sequence(), error = %err, "synchronous event consumer failed");
                }
                DeliveryMode::Asynchronous => {
                    warn!(consumer = %consumer.key(), sequence = batch.sequence(), error = %err, "event consumer failed");
                }
            }
        }
    }

    if !slow_threshold.is_zero() && elapsed > slow_threshold {
        warn!(
            consumer = %consumer.key(),
            sequence = batch.sequence(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ?phase,
            "slow event listener"
        );
    }
}

fn worker_loop(queue_rx: &Receiver<DispatchAction>, stats: &DispatchStats, slow_threshold: Duration) {
    loop {
        match queue_rx.recv() {
            Ok(DispatchAction::Deliver { batch, consumers }) => {
                debug!(sequence = batch.sequence(), consumers = consumers.len(), "event delivery started");
                for consumer in consumers.iter() {
                    deliver(consumer, &batch, DeliveryMode::Asynchronous, stats, slow_threshold);
                }
                debug!(sequence = batch.sequence(), "event delivery finished");
            }
            Ok(DispatchAction::Terminate) | Err(_) => break,
        }
    }
}
