pub(crate) mod engine;
pub use engine::{
    Compare, CompareOp, CompareTarget, KvEngine, KvEntry, KvTxn, KvTxnResult, LeaseId,
    RangeOptions, RangeResult, RawWatchEvent, Revision, SortOrder, TxOp, WatchHandle,
    WatchMessage,
};

pub(crate) mod etcd;
pub use etcd::EtcdEngine;
