//! Per-type watcher: consumes the store's raw watch, tracks a per-key
//! version cache, reconciles after history compaction, and retries with
//! backoff. See spec.md §4.6.
use crate::error::{err, Error, ErrorKind};
use crate::keys;
use crate::kv::{KvEngine, Revision};
use crate::model::{ObjectKey, ObjectType, SystemMeta};
use crate::store::{ListOptions, ResourceStore, WatchEvent};
use crate::watch::backoff::BackoffManager;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const RECONCILE_PAGE_SIZE: i64 = 500;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    create_revision: Revision,
    mod_revision: Revision,
}

impl From<&SystemMeta> for CacheEntry {
    fn from(m: &SystemMeta) -> Self {
        CacheEntry {
            create_revision: m.create_revision,
            mod_revision: m.mod_revision,
        }
    }
}

pub struct WatchHandler<E: KvEngine> {
    store: Arc<ResourceStore<E>>,
    ty: ObjectType,
    tx: mpsc::Sender<WatchEvent>,
    last_revision: Revision,
    cache: HashMap<ObjectKey, CacheEntry>,
    retry_count: u32,
    max_retries: u32,
    backoff: BackoffManager,
}

impl<E: KvEngine> WatchHandler<E> {
    pub fn new(store: Arc<ResourceStore<E>>, ty: ObjectType, tx: mpsc::Sender<WatchEvent>, max_retries: u32) -> Self {
        WatchHandler {
            store,
            ty,
            tx,
            last_revision: 0,
            cache: HashMap::new(),
            retry_count: 0,
            max_retries,
            backoff: BackoffManager::default_for_watch(),
        }
    }

    /// Drives the handler until `shutdown` fires or the retry budget is
    /// exhausted. Exits cleanly either way; never panics on a closed
    /// upstream or subscriber channel.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            let start_revision = if self.last_revision > 0 { self.last_revision + 1 } else { 0 };
            let mut rx = tokio::select! {
                _ = &mut shutdown => return,
                res = self.store.watch(&self.ty, start_revision) => {
                    match res {
                        Ok(rx) => {
                            self.retry_count = 0;
                            self.backoff.reset();
                            rx
                        }
                        Err(e) => {
                            warn!("watch open failed for {:?}: {e}", self.ty);
                            if !self.retry(&mut shutdown).await {
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            loop {
                let maybe = tokio::select! {
                    _ = &mut shutdown => return,
                    m = rx.recv() => m,
                };
                match maybe {
                    Some(WatchEvent::Error(e)) if e.kind == ErrorKind::HistoryCompacted => {
                        debug!("watch history compacted for {:?}, reconciling", self.ty);
                        if let Err(e) = self.reconcile().await {
                            warn!("reconciliation failed for {:?}: {e}", self.ty);
                            let _ = self.tx.send(WatchEvent::Error(e)).await;
                            if !self.retry(&mut shutdown).await {
                                return;
                            }
                        }
                        break;
                    }
                    Some(WatchEvent::Error(e)) => {
                        let _ = self.tx.send(WatchEvent::Error(e)).await;
                        if !self.retry(&mut shutdown).await {
                            return;
                        }
                        break;
                    }
                    Some(event) => {
                        self.observe(&event);
                        if self.tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        if !self.retry(&mut shutdown).await {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    }

    /// Sleeps out the current backoff delay and bumps the retry count.
    /// Returns `false` once `max_retries` is exceeded, telling the caller to
    /// shut the handler down.
    async fn retry(&mut self, shutdown: &mut oneshot::Receiver<()>) -> bool {
        self.retry_count += 1;
        if self.retry_count > self.max_retries {
            warn!("watch handler for {:?} exceeded max retries, shutting down", self.ty);
            return false;
        }
        let delay = self.backoff.next_delay();
        tokio::select! {
            _ = &mut *shutdown => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn observe(&mut self, event: &WatchEvent) {
        match event {
            WatchEvent::Added { object, revision } | WatchEvent::Modified { object, revision } => {
                self.cache.insert(object.key(), CacheEntry::from(&object.system));
                self.last_revision = (*revision).max(self.last_revision);
            }
            WatchEvent::Deleted { key, revision } => {
                self.cache.remove(key);
                self.last_revision = (*revision).max(self.last_revision);
            }
            WatchEvent::Error(_) => {}
        }
    }

    async fn emit(&mut self, event: WatchEvent) -> Result<(), Error> {
        self.observe(&event);
        self.tx.send(event).await.map_err(|_| err!(Fatal, "watch subscriber channel closed"))
    }

    /// Replays the current snapshot of `self.ty`, diffing it against the
    /// cache per spec.md §4.6.1, then anchors `last_revision` at the
    /// snapshot and resets the backoff.
    async fn reconcile(&mut self) -> Result<(), Error> {
        let mut last_key: Option<Vec<u8>> = None;
        let mut seen = HashSet::new();
        let mut snapshot_revision = None;

        loop {
            let opts = ListOptions {
                limit: RECONCILE_PAGE_SIZE,
                last_key: last_key.clone(),
                ..Default::default()
            };
            let page = self.store.list(&self.ty, opts).await?;
            if snapshot_revision.is_none() {
                snapshot_revision = Some(page.revision);
            }
            for object in page.objects {
                let key = object.key();
                seen.insert(key.clone());
                match self.cache.get(&key) {
                    None => {
                        self.emit(WatchEvent::Added { object, revision: page.revision }).await?;
                    }
                    Some(cached) if cached.create_revision != object.system.create_revision => {
                        self.emit(WatchEvent::Deleted { key: key.clone(), revision: page.revision }).await?;
                        self.emit(WatchEvent::Added { object, revision: page.revision }).await?;
                    }
                    Some(cached) if cached.mod_revision != object.system.mod_revision => {
                        self.emit(WatchEvent::Modified { object, revision: page.revision }).await?;
                    }
                    _ => {}
                }
                last_key = Some(keys::object_key(&key));
            }
            if !page.more {
                break;
            }
        }

        let stale: Vec<ObjectKey> = self.cache.keys().filter(|k| !seen.contains(*k)).cloned().collect();
        let revision = snapshot_revision.unwrap_or(self.last_revision);
        for key in stale {
            self.emit(WatchEvent::Deleted { key, revision }).await?;
        }

        self.last_revision = revision;
        self.backoff.reset();
        Ok(())
    }
}
