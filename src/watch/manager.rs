//! Keyed de-duplicator: multiplexes one [`WatchHandler`] per `ObjectType`
//! onto N subscribers, with slow-consumer eviction. See spec.md §4.7.
use crate::kv::KvEngine;
use crate::model::ObjectType;
use crate::store::{ResourceStore, WatchEvent};
use crate::watch::handler::WatchHandler;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};

const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;
const EVICTION_TIMEOUT: Duration = Duration::from_millis(100);

struct Handler {
    subscribers: Vec<(u64, mpsc::Sender<WatchEvent>)>,
    shutdown: oneshot::Sender<()>,
}

type HandlerMap = Arc<RwLock<HashMap<ObjectType, Handler>>>;

pub struct WatchManager<E: KvEngine> {
    store: Arc<ResourceStore<E>>,
    max_retries: u32,
    buffer: usize,
    handlers: HandlerMap,
    next_id: AtomicU64,
}

impl<E: KvEngine> WatchManager<E> {
    pub fn new(store: Arc<ResourceStore<E>>, max_retries: u32) -> Self {
        Self::with_buffer(store, max_retries, DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(store: Arc<ResourceStore<E>>, max_retries: u32, buffer: usize) -> Self {
        WatchManager {
            store,
            max_retries,
            buffer,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Subscribes to every event for `ty`. If no handler is running for
    /// `ty` yet, starts one; otherwise attaches to the existing fan-out set.
    pub async fn watch(&self, ty: ObjectType) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut handlers = self.handlers.write().await;
        if let Some(handler) = handlers.get_mut(&ty) {
            handler.subscribers.push((id, tx));
        } else {
            let (upstream_tx, upstream_rx) = mpsc::channel(self.buffer);
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            let handler = WatchHandler::new(self.store.clone(), ty.clone(), upstream_tx, self.max_retries);
            tokio::spawn(handler.run(shutdown_rx));
            tokio::spawn(fan_out(upstream_rx, self.handlers.clone(), ty.clone()));
            handlers.insert(
                ty,
                Handler {
                    subscribers: vec![(id, tx)],
                    shutdown: shutdown_tx,
                },
            );
        }
        rx
    }

    #[cfg(test)]
    async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    #[cfg(test)]
    async fn subscriber_count(&self, ty: &ObjectType) -> usize {
        self.handlers.read().await.get(ty).map(|h| h.subscribers.len()).unwrap_or(0)
    }
}

/// Forwards every event off `upstream` to every subscriber currently
/// registered for `ty`. Never holds the handler-map lock across a blocking
/// send: the fan-out list is snapshotted under the read lock first.
async fn fan_out(mut upstream: mpsc::Receiver<WatchEvent>, handlers: HandlerMap, ty: ObjectType) {
    while let Some(event) = upstream.recv().await {
        let subscribers = {
            let guard = handlers.read().await;
            match guard.get(&ty) {
                Some(h) => h.subscribers.clone(),
                None => return,
            }
        };

        let mut evicted = Vec::new();
        for (id, sub) in &subscribers {
            match sub.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    match tokio::time::timeout(EVICTION_TIMEOUT, sub.send(ev)).await {
                        Ok(Ok(())) => {}
                        _ => evicted.push(*id),
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(*id),
            }
        }

        if evicted.is_empty() {
            continue;
        }
        let emptied = {
            let mut guard = handlers.write().await;
            match guard.get_mut(&ty) {
                Some(h) => {
                    h.subscribers.retain(|(id, _)| !evicted.contains(id));
                    h.subscribers.is_empty()
                }
                None => true,
            }
        };
        if emptied && shut_down(&handlers, &ty).await {
            return;
        }
    }
    shut_down(&handlers, &ty).await;
}

async fn shut_down(handlers: &HandlerMap, ty: &ObjectType) -> bool {
    if let Some(h) = handlers.write().await.remove(ty) {
        let _ = h.shutdown.send(());
        true
    } else {
        false
    }
}
