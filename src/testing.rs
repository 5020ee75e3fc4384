//! An in-memory [`KvEngine`] implementation. This is the crate's equivalent
//! of the teacher's Cloud Simulator: a lightweight stand-in for a real
//! deployment, used exclusively by tests in this crate and by integration
//! tests of crates built on top of it.
use crate::error::{Error, ErrorKind};
use crate::kv::{
    Compare, CompareOp, CompareTarget, KvEngine, KvEntry, KvTxn, KvTxnResult, LeaseId,
    RangeOptions, RangeResult, RawWatchEvent, Revision, SortOrder, TxOp, WatchHandle,
    WatchMessage,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};

struct Watcher {
    prefix: Vec<u8>,
    tx: mpsc::Sender<Result<WatchMessage, Error>>,
}

struct Inner {
    data: BTreeMap<Vec<u8>, KvEntry>,
    revision: Revision,
    next_lease: LeaseId,
    leases: std::collections::HashSet<LeaseId>,
    watchers: Vec<Watcher>,
    /// Revisions at or below this value have been "compacted": a watch
    /// requesting one of them fails with `HistoryCompacted`. Set via
    /// [`MemoryEngine::compact`] to exercise reconciliation in tests.
    compacted_through: Revision,
}

/// An in-memory stand-in for a real KV engine, satisfying spec.md §6.4's
/// contract: multi-op transactions with compare predicates, leases, prefix
/// range reads, prefix watch from a revision, and a simulatable
/// history-compaction signal.
#[derive(Clone)]
pub struct MemoryEngine {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        MemoryEngine {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                data: BTreeMap::new(),
                revision: 0,
                next_lease: 1,
                leases: std::collections::HashSet::new(),
                watchers: Vec::new(),
                compacted_through: 0,
            })),
        }
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks all revisions up to and including `revision` as compacted;
    /// any watch subsequently started at or below that revision observes
    /// `HistoryCompacted` instead of resuming.
    pub fn compact(&self, revision: Revision) {
        self.inner.lock().unwrap().compacted_through = revision;
    }

    pub fn current_revision(&self) -> Revision {
        self.inner.lock().unwrap().revision
    }

    fn apply_op(inner: &mut Inner, op: &TxOp, revision: Revision, events: &mut Vec<(Vec<u8>, RawWatchEvent)>) {
        match op {
            TxOp::Put { key, value, lease } => {
                let existing = inner.data.get(key);
                let create_revision = existing.map(|e| e.create_revision).unwrap_or(revision);
                let version = existing.map(|e| e.version + 1).unwrap_or(1);
                let entry = KvEntry {
                    key: key.clone(),
                    value: value.clone(),
                    create_revision,
                    mod_revision: revision,
                    version,
                    lease: lease.unwrap_or(0),
                };
                inner.data.insert(key.clone(), entry.clone());
                events.push((key.clone(), RawWatchEvent::Put(entry)));
            }
            TxOp::Delete { key } => {
                if inner.data.remove(key).is_some() {
                    events.push((
                        key.clone(),
                        RawWatchEvent::Delete {
                            key: key.clone(),
                            mod_revision: revision,
                        },
                    ));
                }
            }
        }
    }

    fn compare_matches(inner: &Inner, c: &Compare) -> bool {
        let entry = inner.data.get(&c.key);
        match &c.target {
            CompareTarget::ModRevision(want) => {
                let got = entry.map(|e| e.mod_revision).unwrap_or(0);
                cmp(got, *want, c.op)
            }
            CompareTarget::Version(want) => {
                let got = entry.map(|e| e.version).unwrap_or(0);
                cmp(got, *want, c.op)
            }
            CompareTarget::Value(want) => {
                let got = entry.map(|e| e.value.as_slice()).unwrap_or(&[]);
                match c.op {
                    CompareOp::Equal => got == want.as_slice(),
                    CompareOp::NotEqual => got != want.as_slice(),
                    _ => false,
                }
            }
        }
    }

    fn broadcast(inner: &mut Inner, revision: Revision, events: Vec<(Vec<u8>, RawWatchEvent)>) {
        if events.is_empty() {
            return;
        }
        inner.watchers.retain(|w| {
            let matching: Vec<RawWatchEvent> = events
                .iter()
                .filter(|(k, _)| k.starts_with(&w.prefix))
                .map(|(_, e)| e.clone())
                .collect();
            if matching.is_empty() {
                return true;
            }
            let msg = Ok(WatchMessage {
                events: matching,
                revision,
            });
            w.tx.try_send(msg).is_ok()
        });
    }
}

fn cmp<T: PartialOrd>(got: T, want: T, op: CompareOp) -> bool {
    match op {
        CompareOp::Equal => got == want,
        CompareOp::NotEqual => got != want,
        CompareOp::Greater => got > want,
        CompareOp::Less => got < want,
    }
}

#[async_trait]
impl KvEngine for MemoryEngine {
    async fn get(&self, key: &[u8]) -> Result<Option<KvEntry>, Error> {
        Ok(self.inner.lock().unwrap().data.get(key).cloned())
    }

    async fn range(&self, opts: RangeOptions) -> Result<RangeResult, Error> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<KvEntry> = inner
            .data
            .range(opts.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&opts.prefix))
            .map(|(_, v)| v.clone())
            .filter(|e| {
                if let Some(min_rev) = opts.min_mod_revision {
                    if e.mod_revision < min_rev {
                        return false;
                    }
                }
                if let Some(last) = &opts.last_key {
                    if opts.include_last_key {
                        return e.key.as_slice() >= last.as_slice();
                    }
                    return e.key.as_slice() > last.as_slice();
                }
                true
            })
            .collect();
        if matches!(opts.sort, Some(SortOrder::Descending)) {
            entries.reverse();
        }
        let more = opts.limit > 0 && entries.len() as i64 > opts.limit;
        if opts.limit > 0 {
            entries.truncate(opts.limit as usize);
        }
        Ok(RangeResult {
            entries,
            revision: inner.revision,
            more,
        })
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision, Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.revision += 1;
        let revision = inner.revision;
        let mut events = Vec::new();
        Self::apply_op(
            &mut inner,
            &TxOp::Put {
                key: key.to_vec(),
                value,
                lease,
            },
            revision,
            &mut events,
        );
        Self::broadcast(&mut inner, revision, events);
        Ok(revision)
    }

    async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.revision += 1;
        let revision = inner.revision;
        let mut events = Vec::new();
        Self::apply_op(&mut inner, &TxOp::Delete { key: key.to_vec() }, revision, &mut events);
        Self::broadcast(&mut inner, revision, events);
        Ok(())
    }

    async fn txn(&self, txn: KvTxn) -> Result<KvTxnResult, Error> {
        let mut inner = self.inner.lock().unwrap();
        let succeeded = txn.compares.iter().all(|c| Self::compare_matches(&inner, c));
        let ops = if succeeded { &txn.success } else { &txn.failure };
        inner.revision += 1;
        let revision = inner.revision;
        let mut events = Vec::new();
        for op in ops {
            Self::apply_op(&mut inner, op, revision, &mut events);
        }
        Self::broadcast(&mut inner, revision, events);
        Ok(KvTxnResult { succeeded, revision })
    }

    async fn lease_grant(&self, _ttl_secs: i64) -> Result<LeaseId, Error> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_lease;
        inner.next_lease += 1;
        inner.leases.insert(id);
        Ok(id)
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        inner.leases.remove(&lease);
        let keys: Vec<Vec<u8>> = inner
            .data
            .iter()
            .filter(|(_, e)| e.lease == lease)
            .map(|(k, _)| k.clone())
            .collect();
        inner.revision += 1;
        let revision = inner.revision;
        let mut events = Vec::new();
        for key in keys {
            inner.data.remove(&key);
            events.push((
                key.clone(),
                RawWatchEvent::Delete {
                    key,
                    mod_revision: revision,
                },
            ));
        }
        Self::broadcast(&mut inner, revision, events);
        Ok(())
    }

    async fn lease_keep_alive_once(&self, lease: LeaseId) -> Result<(), Error> {
        let inner = self.inner.lock().unwrap();
        if inner.leases.contains(&lease) {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Upstream, format!("lease {lease} not found")))
        }
    }

    async fn watch(&self, prefix: Vec<u8>, start_revision: Revision) -> Result<WatchHandle, Error> {
        let (tx, rx) = mpsc::channel(256);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            if start_revision > 0 && start_revision <= inner.compacted_through {
                let _ = tx.try_send(Err(Error::new(
                    ErrorKind::HistoryCompacted,
                    format!("requested revision {start_revision} has been compacted"),
                )));
            }
            inner.watchers.push(Watcher {
                prefix,
                tx: tx.clone(),
            });
        }
        // The memory engine has no background connection to tear down; the
        // cancel receiver just needs to be held so `WatchHandle::cancel`
        // doesn't error on send.
        tokio::spawn(async move {
            let _ = cancel_rx.await;
        });
        Ok(WatchHandle::new(rx, cancel_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::TxOp;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let engine = MemoryEngine::new();
        engine.put(b"/a/b", b"v1".to_vec(), None).await.unwrap();
        let got = engine.get(b"/a/b").await.unwrap().unwrap();
        assert_eq!(got.value, b"v1");
        assert_eq!(got.version, 1);
    }

    #[tokio::test]
    async fn txn_compare_miss_runs_failure_branch() {
        let engine = MemoryEngine::new();
        engine.put(b"/k", b"v1".to_vec(), None).await.unwrap();
        let txn = KvTxn::new()
            .when(vec![Compare::mod_revision(b"/k".to_vec(), CompareOp::Equal, 999)])
            .and_then(vec![TxOp::put(b"/k".to_vec(), b"v2".to_vec())])
            .or_else(vec![TxOp::put(b"/fallback".to_vec(), b"x".to_vec())]);
        let result = engine.txn(txn).await.unwrap();
        assert!(!result.succeeded);
        assert!(engine.get(b"/fallback").await.unwrap().is_some());
        assert_eq!(engine.get(b"/k").await.unwrap().unwrap().value, b"v1");
    }

    #[tokio::test]
    async fn watch_below_compacted_revision_errors() {
        let engine = MemoryEngine::new();
        engine.put(b"/k", b"v1".to_vec(), None).await.unwrap();
        engine.compact(engine.current_revision());
        let mut handle = engine.watch(b"/".to_vec(), 1).await.unwrap();
        let msg = handle.rx.recv().await.unwrap();
        assert!(matches!(msg, Err(e) if e.kind == ErrorKind::HistoryCompacted));
    }

    #[tokio::test]
    async fn range_paginates_with_last_key() {
        let engine = MemoryEngine::new();
        for k in ["/t/a", "/t/b", "/t/c"] {
            engine.put(k.as_bytes(), b"v".to_vec(), None).await.unwrap();
        }
        let first = engine
            .range(RangeOptions::new(b"/t/".to_vec()).limit(2))
            .await
            .unwrap();
        assert_eq!(first.entries.len(), 2);
        assert!(first.more);
        let last_key = first.entries.last().unwrap().key.clone();
        let second = engine
            .range(RangeOptions::new(b"/t/".to_vec()).after(last_key))
            .await
            .unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.entries[0].key, b"/t/c");
    }
}
