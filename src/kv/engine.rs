//! The typed facade the rest of the crate programs against: get, put,
//! delete, prefix range (with paging), multi-op transactions (with compare
//! predicates), lease management and prefix watch. Any KV engine satisfying
//! spec.md §6.4's contract (etcd or a compatible store) implements this
//! trait; see [`crate::kv::etcd::EtcdEngine`] for the real backend and
//! [`crate::testing::MemoryEngine`] for the in-memory test stand-in.
use crate::error::Error;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

pub type LeaseId = i64;
pub type Revision = i64;

/// A single KV record as returned from the engine, carrying MVCC metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub create_revision: Revision,
    pub mod_revision: Revision,
    pub version: i64,
    pub lease: LeaseId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Paging options for a prefix range read. `last_key`/`include_last_key`
/// implement continuation paging; `min_mod_revision` supports the
/// incremental-replay read pattern used by reconciliation.
#[derive(Debug, Clone, Default)]
pub struct RangeOptions {
    pub prefix: Vec<u8>,
    pub limit: i64,
    pub last_key: Option<Vec<u8>>,
    pub include_last_key: bool,
    pub sort: Option<SortOrder>,
    pub min_mod_revision: Option<Revision>,
}

impl RangeOptions {
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        RangeOptions {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn after(mut self, last_key: Vec<u8>) -> Self {
        self.last_key = Some(last_key);
        self
    }

    pub fn min_mod_revision(mut self, rev: Revision) -> Self {
        self.min_mod_revision = Some(rev);
        self
    }

    pub fn sort(mut self, order: SortOrder) -> Self {
        self.sort = Some(order);
        self
    }
}

/// Result of a prefix range read: the entries plus the engine's revision at
/// the time of the read (used to snapshot-anchor reconciliation) and
/// whether more entries remain beyond `limit`.
#[derive(Debug, Clone, Default)]
pub struct RangeResult {
    pub entries: Vec<KvEntry>,
    pub revision: Revision,
    pub more: bool,
}

#[derive(Debug, Clone)]
pub enum CompareTarget {
    ModRevision(Revision),
    Version(i64),
    Value(Vec<u8>),
}

#[derive(Debug, Clone, Copy)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

#[derive(Debug, Clone)]
pub struct Compare {
    pub key: Vec<u8>,
    pub op: CompareOp,
    pub target: CompareTarget,
}

impl Compare {
    pub fn mod_revision(key: impl Into<Vec<u8>>, op: CompareOp, rev: Revision) -> Self {
        Compare {
            key: key.into(),
            op,
            target: CompareTarget::ModRevision(rev),
        }
    }

    pub fn version(key: impl Into<Vec<u8>>, op: CompareOp, version: i64) -> Self {
        Compare {
            key: key.into(),
            op,
            target: CompareTarget::Version(version),
        }
    }

    pub fn value(key: impl Into<Vec<u8>>, op: CompareOp, value: impl Into<Vec<u8>>) -> Self {
        Compare {
            key: key.into(),
            op,
            target: CompareTarget::Value(value.into()),
        }
    }
}

/// One operation within a multi-op transaction.
#[derive(Debug, Clone)]
pub enum TxOp {
    Put {
        key: Vec<u8>,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    },
    Delete {
        key: Vec<u8>,
    },
}

impl TxOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        TxOp::Put {
            key: key.into(),
            value: value.into(),
            lease: None,
        }
    }

    pub fn put_with_lease(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, lease: LeaseId) -> Self {
        TxOp::Put {
            key: key.into(),
            value: value.into(),
            lease: Some(lease),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        TxOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            TxOp::Put { key, .. } => key,
            TxOp::Delete { key } => key,
        }
    }
}

/// A multi-op transaction: when every compare predicate in `compares`
/// matches, `success` is applied atomically; otherwise `failure` is.
#[derive(Debug, Clone, Default)]
pub struct KvTxn {
    pub compares: Vec<Compare>,
    pub success: Vec<TxOp>,
    pub failure: Vec<TxOp>,
}

impl KvTxn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when(mut self, compares: Vec<Compare>) -> Self {
        self.compares = compares;
        self
    }

    pub fn and_then(mut self, ops: Vec<TxOp>) -> Self {
        self.success = ops;
        self
    }

    pub fn or_else(mut self, ops: Vec<TxOp>) -> Self {
        self.failure = ops;
        self
    }
}

#[derive(Debug, Clone)]
pub struct KvTxnResult {
    pub succeeded: bool,
    pub revision: Revision,
}

/// A single event off a prefix watch, before it has been interpreted as a
/// domain-typed `WatchEvent` (that translation happens in
/// [`crate::store::ResourceStore`]).
#[derive(Debug, Clone)]
pub enum RawWatchEvent {
    Put(KvEntry),
    Delete { key: Vec<u8>, mod_revision: Revision },
}

#[derive(Debug, Clone)]
pub struct WatchMessage {
    pub events: Vec<RawWatchEvent>,
    pub revision: Revision,
}

/// A live prefix watch. Drop (or call [`WatchHandle::cancel`]) to release
/// the upstream watcher promptly rather than waiting for the channel to be
/// garbage collected.
pub struct WatchHandle {
    pub rx: mpsc::Receiver<Result<WatchMessage, Error>>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl WatchHandle {
    pub fn new(rx: mpsc::Receiver<Result<WatchMessage, Error>>, cancel_tx: oneshot::Sender<()>) -> Self {
        WatchHandle {
            rx,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
pub trait KvEngine: Send + Sync + 'static {
    async fn get(&self, key: &[u8]) -> Result<Option<KvEntry>, Error>;
    async fn range(&self, opts: RangeOptions) -> Result<RangeResult, Error>;
    async fn put(&self, key: &[u8], value: Vec<u8>, lease: Option<LeaseId>) -> Result<Revision, Error>;
    async fn delete(&self, key: &[u8]) -> Result<(), Error>;
    async fn txn(&self, txn: KvTxn) -> Result<KvTxnResult, Error>;
    async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId, Error>;
    async fn lease_revoke(&self, lease: LeaseId) -> Result<(), Error>;
    /// Sends a single keepalive ping for `lease`. The caller (the GC worker)
    /// is responsible for calling this on a timer for as long as the lease
    /// must stay alive; see spec.md §4.8.
    async fn lease_keep_alive_once(&self, lease: LeaseId) -> Result<(), Error>;
    async fn watch(&self, prefix: Vec<u8>, start_revision: Revision) -> Result<WatchHandle, Error>;
}
