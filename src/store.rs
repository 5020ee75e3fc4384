//! Serialization of domain objects onto the KV engine: typed get/put/delete,
//! a build-put-tx-op for composing multi-op transactions, paginated list,
//! and a typed prefix watch. See spec.md §4.2.
use crate::error::{not_found, Error};
use crate::keys;
use crate::kv::{KvEngine, KvEntry, RangeOptions, RawWatchEvent, Revision, SortOrder, TxOp};
use crate::model::{Object, ObjectKey, ObjectType};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Paging options for [`ResourceStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: i64,
    pub last_key: Option<Vec<u8>>,
    pub include_last_key: bool,
    pub sort: Option<SortOrder>,
    pub min_mod_revision: Option<Revision>,
}

/// One page of a [`ResourceStore::list`] read, plus the KV engine's revision
/// at read time (the snapshot anchor reconciliation pages from).
#[derive(Debug, Clone)]
pub struct ListPage {
    pub objects: Vec<Object>,
    pub revision: Revision,
    pub more: bool,
}

/// A typed watch event. `Deleted` carries only the key and revision: the raw
/// KV delete event does not include the object's last value.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added { object: Object, revision: Revision },
    Modified { object: Object, revision: Revision },
    Deleted { key: ObjectKey, revision: Revision },
    Error(Error),
}

fn decode_entry(entry: &KvEntry) -> Result<Object, Error> {
    let mut obj: Object = serde_json::from_slice(&entry.value)?;
    obj.system.create_revision = entry.create_revision;
    obj.system.mod_revision = entry.mod_revision;
    obj.system.version = entry.version;
    Ok(obj)
}

pub struct ResourceStore<E: KvEngine> {
    engine: Arc<E>,
}

impl<E: KvEngine> ResourceStore<E> {
    pub fn new(engine: Arc<E>) -> Self {
        ResourceStore { engine }
    }

    pub async fn put(&self, obj: &Object) -> Result<Revision, Error> {
        let key = keys::object_key(&obj.key());
        let bytes = serde_json::to_vec(obj)?;
        self.engine.put(&key, bytes, None).await
    }

    /// An un-committed put operation over `obj`, for composing into a larger
    /// transaction (the Repository's write path never calls `put` directly).
    pub fn build_put_tx_op(&self, obj: &Object) -> Result<TxOp, Error> {
        let key = keys::object_key(&obj.key());
        let bytes = serde_json::to_vec(obj)?;
        Ok(TxOp::put(key, bytes))
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<Object, Error> {
        let raw_key = keys::object_key(key);
        let entry = self
            .engine
            .get(&raw_key)
            .await?
            .ok_or_else(|| not_found(format!("object {key} not found")))?;
        decode_entry(&entry)
    }

    pub async fn delete(&self, key: &ObjectKey) -> Result<(), Error> {
        let raw_key = keys::object_key(key);
        self.engine.delete(&raw_key).await
    }

    pub async fn list(&self, ty: &ObjectType, opts: ListOptions) -> Result<ListPage, Error> {
        let prefix = keys::type_prefix(ty).into_bytes();
        let mut range = RangeOptions::new(prefix).limit(opts.limit);
        if let Some(last) = opts.last_key {
            range = range.after(last);
        }
        range.include_last_key = opts.include_last_key;
        if let Some(sort) = opts.sort {
            range = range.sort(sort);
        }
        if let Some(rev) = opts.min_mod_revision {
            range = range.min_mod_revision(rev);
        }
        let result = self.engine.range(range).await?;
        let mut objects = Vec::with_capacity(result.entries.len());
        for entry in &result.entries {
            objects.push(decode_entry(entry)?);
        }
        Ok(ListPage {
            objects,
            revision: result.revision,
            more: result.more,
        })
    }

    /// Opens a prefix watch over every object of `ty`, translating raw KV
    /// events into typed [`WatchEvent`]s. `start_revision = 0` means "from
    /// now". The returned channel closes when the upstream watch ends.
    pub async fn watch(&self, ty: &ObjectType, start_revision: Revision) -> Result<mpsc::Receiver<WatchEvent>, Error> {
        let prefix = keys::type_prefix(ty).into_bytes();
        let mut handle = self.engine.watch(prefix, start_revision).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(msg) = handle.rx.recv().await {
                let events = match msg {
                    Ok(wm) => wm
                        .events
                        .into_iter()
                        .map(|raw| to_watch_event(raw, wm.revision))
                        .collect::<Vec<_>>(),
                    Err(e) => vec![WatchEvent::Error(e)],
                };
                for event in events {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

fn to_watch_event(raw: RawWatchEvent, revision: Revision) -> WatchEvent {
    match raw {
        RawWatchEvent::Put(entry) => match decode_entry(&entry) {
            Ok(object) => {
                if entry.create_revision == entry.mod_revision {
                    WatchEvent::Added { object, revision }
                } else {
                    WatchEvent::Modified { object, revision }
                }
            }
            Err(e) => WatchEvent::Error(e),
        },
        RawWatchEvent::Delete { key, mod_revision } => {
            let path = String::from_utf8_lossy(&key);
            match keys::parse_okey(&path) {
                Ok(key) => WatchEvent::Deleted {
                    key,
                    revision: mod_revision,
                },
                Err(e) => {
                    warn!("dropping delete event with unparseable key {path}: {e}");
                    WatchEvent::Error(e)
                }
            }
        }
    }
}
