// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-oracle stream workers.
//!
//! Each registered pair gets one worker owning the subscription for its
//! oracle. A worker computes its resume cursor from the store, drives the
//! stream through the dispatcher, and on recoverable failure restarts the
//! subscription from a freshly computed cursor with capped backoff. Because
//! applied events move the cursor forward, a restart is a replay of at most
//! the events that were in flight.

use crate::dispatcher::EventDispatcher;
use crate::error::IndexerError;
use crate::metrics::IndexerMetrics;
use crate::registry::PairRegistry;
use crate::store::AlarmStore;
use crate::stream::{Cursor, OracleStreamClient, StreamItem};
use crate::types::Pair;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

pub fn subscription_key(oracle: &str) -> String {
    format!("subscribe:{oracle}")
}

struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    stalled: Arc<AtomicBool>,
}

pub struct SubscriptionManager {
    store: Arc<dyn AlarmStore>,
    dispatcher: Arc<EventDispatcher>,
    stream_client: Arc<dyn OracleStreamClient>,
    metrics: Arc<IndexerMetrics>,
    restart_policy: RestartPolicy,
    cancel: CancellationToken,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

enum StreamOutcome {
    Cancelled,
    Recoverable(String),
    Permanent(String),
}

impl SubscriptionManager {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        dispatcher: Arc<EventDispatcher>,
        stream_client: Arc<dyn OracleStreamClient>,
        metrics: Arc<IndexerMetrics>,
        restart_policy: RestartPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            dispatcher,
            stream_client,
            metrics,
            restart_policy,
            cancel,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a worker for `pair`'s oracle. With `replace` false this is an
    /// idempotent no-op when a worker already runs; with `replace` true the
    /// running worker is torn down first. Returns whether a worker started.
    pub async fn ensure_subscription(&self, pair: &Pair, replace: bool) -> bool {
        let key = subscription_key(&pair.oracle_address);
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&key) {
            if !replace {
                debug!(key, "subscription already running");
                return false;
            }
            info!(key, "replacing running subscription");
            if let Some(mut existing) = workers.remove(&key) {
                existing.cancel.cancel();
                let _ = (&mut existing.handle).await;
                self.clear_stalled(&existing);
            }
        }

        let cancel = self.cancel.child_token();
        let stalled = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            pair: pair.clone(),
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            stream_client: self.stream_client.clone(),
            metrics: self.metrics.clone(),
            restart_policy: self.restart_policy,
            stalled: stalled.clone(),
        };
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(worker_cancel).await });
        workers.insert(
            key.clone(),
            WorkerHandle {
                cancel,
                handle,
                stalled,
            },
        );
        self.metrics.active_workers.set(workers.len() as i64);
        info!(key, "subscription started");
        true
    }

    pub async fn cancel_subscription(&self, oracle: &str) -> bool {
        let key = subscription_key(oracle);
        let mut workers = self.workers.lock().await;
        let Some(mut worker) = workers.remove(&key) else {
            return false;
        };
        worker.cancel.cancel();
        let _ = (&mut worker.handle).await;
        self.clear_stalled(&worker);
        self.metrics.active_workers.set(workers.len() as i64);
        info!(key, "subscription cancelled");
        true
    }

    /// A stalled worker that gets torn down is no longer stalled.
    fn clear_stalled(&self, worker: &WorkerHandle) {
        if worker.stalled.swap(false, Ordering::Relaxed) {
            self.metrics.stalled_workers.dec();
        }
    }

    /// Start workers for every registered pair. Returns how many started.
    pub async fn ensure_all(&self, registry: &dyn PairRegistry) -> usize {
        let mut started = 0;
        for pair in registry.list_pairs() {
            if self.ensure_subscription(pair, false).await {
                started += 1;
            }
        }
        started
    }

    pub async fn shutdown(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.values() {
            worker.cancel.cancel();
        }
        for (key, mut worker) in workers.drain() {
            let _ = (&mut worker.handle).await;
            self.clear_stalled(&worker);
            debug!(key, "worker stopped");
        }
        self.metrics.active_workers.set(0);
    }
}

struct Worker {
    pair: Pair,
    store: Arc<dyn AlarmStore>,
    dispatcher: Arc<EventDispatcher>,
    stream_client: Arc<dyn OracleStreamClient>,
    metrics: Arc<IndexerMetrics>,
    restart_policy: RestartPolicy,
    stalled: Arc<AtomicBool>,
}

impl Worker {
    async fn run(&self, cancel: CancellationToken) {
        let oracle = self.pair.oracle_address.clone();
        let mut delay = self.restart_policy.initial_delay;
        let mut attempt: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                return;
            }
            if attempt > 0 {
                self.metrics
                    .worker_restarts
                    .with_label_values(&[oracle.as_str()])
                    .inc();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(self.restart_policy.max_delay);
            }
            attempt += 1;

            let cursor = match self.store.latest_lt(&oracle).await {
                Ok(latest) => Cursor::from_latest_lt(latest),
                Err(e) => {
                    warn!(oracle, error = %e, "cursor lookup failed, will retry");
                    continue;
                }
            };
            let rx = match self
                .stream_client
                .subscribe(&self.pair, cursor, cancel.clone())
                .await
            {
                Ok(rx) => rx,
                Err(e) => {
                    warn!(oracle, error = %e, "subscribe failed, will retry");
                    continue;
                }
            };

            let (outcome, processed) = self.drive_stream(rx, &cancel).await;
            if processed > 0 {
                // The cursor moved, start the backoff ladder over
                delay = self.restart_policy.initial_delay;
            }
            match outcome {
                StreamOutcome::Cancelled => return,
                StreamOutcome::Recoverable(reason) => {
                    warn!(oracle, reason, "stream interrupted, resubscribing");
                }
                StreamOutcome::Permanent(reason) => {
                    error!(oracle, reason, "stream failed permanently, worker stalled");
                    self.stalled.store(true, Ordering::Relaxed);
                    self.metrics.stalled_workers.inc();
                    return;
                }
            }
        }
    }

    async fn drive_stream(
        &self,
        mut rx: mpsc::Receiver<StreamItem>,
        cancel: &CancellationToken,
    ) -> (StreamOutcome, u64) {
        let oracle = &self.pair.oracle_address;
        let mut processed: u64 = 0;

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return (StreamOutcome::Cancelled, processed),
                item = rx.recv() => item,
            };
            let Some(item) = item else {
                return (
                    StreamOutcome::Recoverable("stream closed".to_string()),
                    processed,
                );
            };
            match item {
                StreamItem::Started { oracle, cursor } => {
                    info!(oracle, %cursor, "stream started");
                }
                StreamItem::CaughtUp { oracle } => {
                    debug!(oracle, "stream caught up");
                }
                StreamItem::Event(event) => {
                    match self.dispatcher.apply(&self.pair, &event).await {
                        Ok(_) => processed += 1,
                        Err(e @ IndexerError::Validation(_)) => {
                            self.metrics.validation_errors.inc();
                            error!(
                                oracle,
                                lt = event.lt(),
                                kind = event.kind(),
                                error = %e,
                                "rejected malformed event"
                            );
                        }
                        Err(e) if e.is_consistency() => {
                            self.metrics
                                .consistency_errors
                                .with_label_values(&[e.error_type()])
                                .inc();
                            error!(
                                oracle,
                                lt = event.lt(),
                                kind = event.kind(),
                                payload = ?event,
                                error = %e,
                                "event references alarm state the store disagrees about"
                            );
                        }
                        Err(e) if e.is_transient() => {
                            // The event was not applied; the restarted stream
                            // replays it from the unchanged cursor
                            return (StreamOutcome::Recoverable(e.to_string()), processed);
                        }
                        Err(e) => {
                            return (StreamOutcome::Permanent(e.to_string()), processed);
                        }
                    }
                }
                StreamItem::StreamError { error, recoverable } => {
                    return if recoverable {
                        (StreamOutcome::Recoverable(error), processed)
                    } else {
                        (StreamOutcome::Permanent(error), processed)
                    };
                }
                StreamItem::Stopped { reason } => {
                    debug!(oracle, reason, "stream stopped");
                    return (StreamOutcome::Cancelled, processed);
                }
            }
        }
    }
}
