//! The central orchestrator: composes the Store, the two index builders and
//! the deletion builder inside single atomic transactions. See spec.md
//! §4.5. Holds no mutable state of its own; every invariant is enforced by
//! the KV engine's compare-and-put.
use crate::deletion;
use crate::error::{conflict, Error, ErrorKind};
use crate::index;
use crate::keys;
use crate::kv::{Compare, CompareOp, KvEngine, KvTxn, Revision, TxOp};
use crate::model::{Object, ObjectKey, ObjectType};
use crate::store::{ListOptions, ListPage, ResourceStore, WatchEvent};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct Repository<E: KvEngine> {
    engine: Arc<E>,
    store: ResourceStore<E>,
}

impl<E: KvEngine> Repository<E> {
    pub fn new(engine: Arc<E>) -> Self {
        let store = ResourceStore::new(engine.clone());
        Repository { engine, store }
    }

    pub async fn get(&self, key: &ObjectKey) -> Result<Object, Error> {
        self.store.get(key).await
    }

    pub async fn list(&self, ty: &ObjectType, opts: ListOptions) -> Result<ListPage, Error> {
        self.store.list(ty, opts).await
    }

    pub async fn watch(&self, ty: &ObjectType, start_revision: Revision) -> Result<mpsc::Receiver<WatchEvent>, Error> {
        self.store.watch(ty, start_revision).await
    }

    /// Creates `obj` if absent, else replaces it in place. Preserves UID and
    /// creation timestamp across replacement; when `optimistic_lock` is
    /// true, the write is guarded by a compare on the existing mod-revision
    /// and a stale caller sees `Conflict`.
    pub async fn replace(&self, mut obj: Object, optimistic_lock: bool) -> Result<Object, Error> {
        let key = obj.key();
        let existing = match self.store.get(&key).await {
            Ok(o) => Some(o),
            Err(e) if e.kind == ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        match &existing {
            Some(prev) => {
                obj.system.uid = prev.system.uid.clone();
                obj.system.creation_timestamp = prev.system.creation_timestamp;
                obj.system.deletion_timestamp = prev.system.deletion_timestamp;
            }
            None => {
                obj.system.uid = Uuid::new_v4().to_string();
                obj.system.creation_timestamp = Some(now);
                obj.system.deletion_timestamp = None;
            }
        }

        let old_refs = existing.as_ref().map(|o| o.meta.owner_references.clone()).unwrap_or_default();
        let old_labels = existing.as_ref().map(|o| o.meta.labels.clone()).unwrap_or_default();

        let mut ops = index::build_owner_ref_update_ops(&key, &old_refs, &obj.meta.owner_references);
        ops.extend(index::build_label_update_ops(&key.ty, &key.name, &old_labels, &obj.meta.labels, now));
        ops.push(self.store.build_put_tx_op(&obj)?);

        let mut compares = Vec::new();
        if optimistic_lock {
            let mod_revision = existing.as_ref().map(|e| e.system.mod_revision).unwrap_or(0);
            compares.push(Compare::mod_revision(keys::object_key(&key), CompareOp::Equal, mod_revision));
        }

        let txn = KvTxn::new().when(compares).and_then(ops);
        let result = self.engine.txn(txn).await?;
        if !result.succeeded {
            return Err(conflict(format!("optimistic lock failed replacing {key}")));
        }
        self.store.get(&key).await
    }

    /// Idempotent: a second call on an already-marked object is a no-op.
    pub async fn mark_deleted(&self, key: &ObjectKey) -> Result<(), Error> {
        let mut obj = self.store.get(key).await?;
        if obj.is_marked_for_deletion() {
            return Ok(());
        }
        let now = Utc::now();
        obj.system.deletion_timestamp = Some(now);
        let ops = vec![self.store.build_put_tx_op(&obj)?, deletion::build_tombstone_put(key, now)];
        self.engine.txn(KvTxn::new().and_then(ops)).await?;
        Ok(())
    }

    /// The cascading delete. Callable only while holding the current
    /// deletion lock; `lock_value` must match its current value or this
    /// fails with `LockLost`. See spec.md §4.5 `Delete`.
    pub async fn delete(&self, key: &ObjectKey, lock_value: &str) -> Result<(), Error> {
        let obj = self.store.get(key).await?;
        let lock_key = keys::deletion_lock_key(key);
        let held = match self.engine.get(&lock_key).await? {
            Some(entry) => entry.value == lock_value.as_bytes(),
            None => false,
        };
        if !held {
            return Err(Error::new(
                ErrorKind::LockLost,
                format!("deletion lock for {key} is not held by {lock_value}"),
            ));
        }

        let children = index::query_children(&*self.engine, &self.store, key).await?;

        let mut ops = vec![
            TxOp::delete(keys::object_key(key)),
            deletion::build_tombstone_delete(key),
            deletion::build_lock_delete(key),
        ];
        ops.extend(index::build_owner_ref_cleanup_ops(key, &obj.meta.owner_references));
        ops.extend(index::build_label_cleanup_ops(&key.ty, &key.name, &obj.meta.labels));

        for child in children {
            let child_key = child.key();
            let has_other_blocker = child.blocking_owner_refs().any(|r| r.parent_key() != *key);
            if has_other_blocker {
                let mut updated = child.clone();
                updated.meta.owner_references.retain(|r| !(r.block_owner_deletion && r.parent_key() == *key));
                ops.push(self.store.build_put_tx_op(&updated)?);
                ops.push(TxOp::delete(keys::owner_ref_index_key(key, &child_key)));
            } else if !child.is_marked_for_deletion() {
                let now = Utc::now();
                let mut updated = child.clone();
                updated.system.deletion_timestamp = Some(now);
                ops.push(self.store.build_put_tx_op(&updated)?);
                ops.push(deletion::build_tombstone_put(&child_key, now));
            }
        }

        let compares = vec![Compare::value(lock_key, CompareOp::Equal, lock_value.as_bytes().to_vec())];
        let result = self.engine.txn(KvTxn::new().when(compares).and_then(ops)).await?;
        if !result.succeeded {
            return Err(Error::new(
                ErrorKind::LockLost,
                format!("deletion lock for {key} was lost before the cascade committed"),
            ));
        }
        Ok(())
    }
}
