//! The GC worker: a producer/consumer pipeline that acquires deletion
//! batches, filters out objects that aren't yet eligible, and commits the
//! cascade via the Repository. See spec.md §4.8.
use crate::config::WorkerConfig;
use crate::deletion;
use crate::error::{Error, ErrorKind};
use crate::kv::{KvEngine, LeaseId};
use crate::model::ObjectKey;
use crate::repository::Repository;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, warn};

struct GcEvent {
    key: ObjectKey,
    pending: Arc<AtomicUsize>,
}

pub struct GcWorker<E: KvEngine> {
    engine: Arc<E>,
    repository: Arc<Repository<E>>,
    config: WorkerConfig,
}

impl<E: KvEngine> GcWorker<E> {
    pub fn new(engine: Arc<E>, repository: Arc<Repository<E>>, config: WorkerConfig) -> Self {
        GcWorker { engine, repository, config }
    }

    /// Runs the producer and `config.worker_count` consumers until
    /// `shutdown` fires. Returns once every spawned task has exited.
    pub async fn run(self, shutdown: watch::Receiver<()>) {
        let (tx, rx) = mpsc::channel(self.config.batch_limit.max(1) as usize * 4);
        let rx = Arc::new(Mutex::new(rx));

        let mut handles = vec![tokio::spawn(producer(
            self.engine.clone(),
            self.config.clone(),
            tx,
            shutdown.clone(),
        ))];
        for id in 0..self.config.worker_count {
            handles.push(tokio::spawn(consumer_loop(
                id,
                self.repository.clone(),
                self.config.lock_value.clone(),
                rx.clone(),
                shutdown.clone(),
            )));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn producer<E: KvEngine>(
    engine: Arc<E>,
    config: WorkerConfig,
    tx: mpsc::Sender<GcEvent>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                match deletion::acquire_deletions(&*engine, &config.lock_value, config.lock_ttl, config.batch_limit).await {
                    Ok(batch) if batch.object_keys.is_empty() => {}
                    Ok(batch) => {
                        let pending = Arc::new(AtomicUsize::new(batch.object_keys.len()));
                        spawn_keepalive(engine.clone(), batch.lease_id, config.lock_ttl, pending.clone());
                        for key in batch.object_keys {
                            let event = GcEvent { key: key.clone(), pending: pending.clone() };
                            if tx.try_send(event).is_err() {
                                warn!("gc queue full, dropping tombstone {key}; it will be retried next poll");
                                pending.fetch_sub(1, Ordering::SeqCst);
                            }
                        }
                    }
                    Err(e) => warn!("acquire_deletions failed: {e}"),
                }
            }
        }
    }
}

/// Keeps `lease_id` alive for as long as any event from its batch is still
/// pending, then revokes it. If the engine reports the keepalive failing
/// (lease already expired), the task gives up silently: the locks it backed
/// have already auto-released.
fn spawn_keepalive<E: KvEngine>(engine: Arc<E>, lease_id: LeaseId, ttl: Duration, pending: Arc<AtomicUsize>) {
    let interval = (ttl / 3).max(Duration::from_millis(50));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if pending.load(Ordering::SeqCst) == 0 {
                let _ = engine.lease_revoke(lease_id).await;
                return;
            }
            if let Err(e) = engine.lease_keep_alive_once(lease_id).await {
                warn!("lease {lease_id} keepalive failed, abandoning: {e}");
                return;
            }
        }
    });
}

async fn consumer_loop<E: KvEngine>(
    id: usize,
    repository: Arc<Repository<E>>,
    lock_value: String,
    rx: Arc<Mutex<mpsc::Receiver<GcEvent>>>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        let event = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = shutdown.changed() => return,
                e = guard.recv() => e,
            }
        };
        let Some(event) = event else { return };
        if let Err(e) = process(&repository, &lock_value, &event.key).await {
            warn!("gc worker {id} failed to process {}: {e}", event.key);
        }
        event.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn process<E: KvEngine>(repository: &Repository<E>, lock_value: &str, key: &ObjectKey) -> Result<(), Error> {
    let obj = match repository.get(key).await {
        Ok(o) => o,
        Err(e) if e.kind == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !obj.meta.finalizers.is_empty() {
        debug!("skipping {key}: finalizers present");
        return Ok(());
    }
    for owner_ref in obj.blocking_owner_refs() {
        let parent = owner_ref.parent_key();
        match repository.get(&parent).await {
            Ok(_) => {
                debug!("skipping {key}: blocking parent {parent} still exists");
                return Ok(());
            }
            Err(e) if e.kind == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    repository.delete(key, lock_value).await
}
