//! Tombstones and the distributed deletion lock. See spec.md §4.8.
use crate::error::Error;
use crate::keys;
use crate::kv::{Compare, CompareOp, KvEngine, KvTxn, LeaseId, RangeOptions, TxOp};
use crate::model::ObjectKey;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

pub fn build_tombstone_put(key: &ObjectKey, now: DateTime<Utc>) -> TxOp {
    TxOp::put(keys::deletion_key(key), now.to_rfc3339().into_bytes())
}

pub fn build_tombstone_delete(key: &ObjectKey) -> TxOp {
    TxOp::delete(keys::deletion_key(key))
}

pub fn build_lock_delete(key: &ObjectKey) -> TxOp {
    TxOp::delete(keys::deletion_lock_key(key))
}

/// The result of [`acquire_deletions`]: the objects this call won the
/// cascade lock for, and the lease those locks are bound to. The caller owns
/// the lease and must keep it alive for as long as cascade work is pending.
#[derive(Debug, Clone)]
pub struct DeletionBatch {
    pub object_keys: Vec<ObjectKey>,
    pub lease_id: LeaseId,
}

/// Grants a fresh lease and attempts to lock up to `batch_limit` tombstoned
/// objects under that lease. See spec.md §4.8 step 3 for the two-try lock
/// protocol (first-claim, then same-owner renewal).
pub async fn acquire_deletions<E: KvEngine>(
    engine: &E,
    lock_value: &str,
    lease_ttl: Duration,
    batch_limit: i64,
) -> Result<DeletionBatch, Error> {
    let lease_id = engine.lease_grant(lease_ttl.as_secs() as i64).await?;
    let prefix = keys::deletion_prefix();
    let result = engine
        .range(RangeOptions::new(prefix).limit(batch_limit))
        .await?;

    let mut acquired = Vec::new();
    for entry in result.entries {
        let path = String::from_utf8_lossy(&entry.key).into_owned();
        let Some(suffix) = keys::strip_prefix(&path, "/deletion/") else {
            warn!("dropping tombstone with unexpected key shape: {path}");
            continue;
        };
        let key = match keys::parse_okey(suffix) {
            Ok(k) => k,
            Err(e) => {
                warn!("dropping unparseable tombstone key {path}: {e}");
                continue;
            }
        };
        if try_lock(engine, &key, lock_value, lease_id).await? {
            acquired.push(key);
        }
    }
    Ok(DeletionBatch {
        object_keys: acquired,
        lease_id,
    })
}

async fn try_lock<E: KvEngine>(engine: &E, key: &ObjectKey, lock_value: &str, lease_id: LeaseId) -> Result<bool, Error> {
    let lock_key = keys::deletion_lock_key(key);
    let first = KvTxn::new()
        .when(vec![Compare::version(lock_key.clone(), CompareOp::Equal, 0)])
        .and_then(vec![TxOp::put_with_lease(
            lock_key.clone(),
            lock_value.as_bytes().to_vec(),
            lease_id,
        )]);
    if engine.txn(first).await?.succeeded {
        return Ok(true);
    }
    let renewal = KvTxn::new()
        .when(vec![Compare::value(
            lock_key.clone(),
            CompareOp::Equal,
            lock_value.as_bytes().to_vec(),
        )])
        .and_then(vec![TxOp::put_with_lease(
            lock_key,
            lock_value.as_bytes().to_vec(),
            lease_id,
        )]);
    Ok(engine.txn(renewal).await?.succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObjectType;
    use crate::testing::MemoryEngine;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(ObjectType::cluster_scoped("apps", "v1", "Widget"), name)
    }

    #[tokio::test]
    async fn acquires_a_fresh_tombstone() {
        let engine = MemoryEngine::new();
        let txn = KvTxn::new().and_then(vec![build_tombstone_put(&key("a"), Utc::now())]);
        engine.txn(txn).await.unwrap();

        let batch = acquire_deletions(&engine, "worker-1", Duration::from_secs(300), 10)
            .await
            .unwrap();
        assert_eq!(batch.object_keys, vec![key("a")]);
    }

    #[tokio::test]
    async fn second_worker_cannot_steal_an_active_lock() {
        let engine = MemoryEngine::new();
        let txn = KvTxn::new().and_then(vec![build_tombstone_put(&key("a"), Utc::now())]);
        engine.txn(txn).await.unwrap();

        acquire_deletions(&engine, "worker-1", Duration::from_secs(300), 10)
            .await
            .unwrap();
        let batch2 = acquire_deletions(&engine, "worker-2", Duration::from_secs(300), 10)
            .await
            .unwrap();
        assert!(batch2.object_keys.is_empty());
    }

    #[tokio::test]
    async fn same_worker_renews_its_own_lock_after_restart() {
        let engine = MemoryEngine::new();
        let txn = KvTxn::new().and_then(vec![build_tombstone_put(&key("a"), Utc::now())]);
        engine.txn(txn).await.unwrap();

        acquire_deletions(&engine, "worker-1", Duration::from_secs(300), 10)
            .await
            .unwrap();
        let batch2 = acquire_deletions(&engine, "worker-1", Duration::from_secs(300), 10)
            .await
            .unwrap();
        assert_eq!(batch2.object_keys, vec![key("a")]);
    }
}
