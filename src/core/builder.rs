use std::sync::Arc;

use tokio::sync::{Mutex, Notify, Semaphore, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::QueueConfig;
use super::dispatcher::{Dispatcher, Shared};
use super::queue::TaskQueue;
use crate::events::Bus;
use crate::storage::{Storage, VolatileStorage};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`TaskQueue`].
pub struct QueueBuilder {
    cfg: QueueConfig,
    storage: Option<Arc<dyn Storage>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl QueueBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: QueueConfig) -> Self {
        Self {
            cfg,
            storage: None,
            subscribers: Vec::new(),
        }
    }

    /// Uses `storage` instead of a fresh [`VolatileStorage`].
    ///
    /// Tasks already waiting in it are dispatched once the queue is built.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive queue events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the queue and starts its dispatch loop and event listener.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Arc<TaskQueue> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let listener_token = CancellationToken::new();
        let listener = spawn_listener(&bus, subs, listener_token.clone());

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(VolatileStorage::new()) as Arc<dyn Storage>);
        let shared = Arc::new(Shared {
            storage,
            bus,
            wake: Notify::new(),
            ops: Mutex::new(()),
            runtime: CancellationToken::new(),
        });

        let semaphore = self
            .cfg
            .concurrency_limit()
            .map(Semaphore::new)
            .map(Arc::new);
        let dispatcher = tokio::spawn(Dispatcher::new(Arc::clone(&shared), semaphore).run());

        Arc::new(TaskQueue::from_parts(
            self.cfg,
            shared,
            dispatcher,
            listener,
            listener_token,
        ))
    }
}

/// Forwards bus events to the subscriber set until `stop`, then flushes and
/// shuts the set down.
fn spawn_listener(bus: &Bus, subs: SubscriberSet, stop: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = stop.cancelled() => break,
            }
        }
        while let Ok(ev) = rx.try_recv() {
            subs.emit(&ev);
        }
        subs.shutdown().await;
    })
}
