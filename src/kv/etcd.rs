//! The production [`KvEngine`] backend: a thin wrapper over `etcd-client`.
use crate::config::{EtcdConfig, TlsConfig};
use crate::error::{Error, ErrorKind};
use crate::kv::engine::{
    Compare, CompareOp, CompareTarget, KvEngine, KvEntry, KvTxn, KvTxnResult, RangeOptions,
    RangeResult, RawWatchEvent, SortOrder, TxOp, WatchHandle, WatchMessage,
};
use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, DeleteOptions, GetOptions, PutOptions, SortOrder as EtcdSortOrder,
    SortTarget, TlsOptions, Txn, TxnOp, TxnOpResponse,
};
use etcd_client::{Compare as EtcdCompare, CompareOp as EtcdCompareOp};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

#[derive(Clone)]
pub struct EtcdEngine {
    client: Client,
}

impl EtcdEngine {
    pub async fn connect(config: &EtcdConfig) -> Result<Self, Error> {
        let mut options = ConnectOptions::new();
        if let Some(timeout) = config.connect_timeout {
            options = options.with_connect_timeout(timeout);
        }
        if let Some(tls) = &config.tls {
            options = options.with_tls(build_tls_options(tls)?);
        }
        let client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(Error::from)?;
        Ok(EtcdEngine { client })
    }

    fn client(&self) -> Client {
        // etcd_client::Client wraps an Arc internally; cloning is cheap.
        self.client.clone()
    }
}

/// Builds the TLS transport options from [`TlsConfig`].
///
/// Per spec.md §9 Open Questions, certificate *loading* off disk is left
/// unimplemented here: a real deployment must read the PEM bytes named by
/// `TlsConfig` and wire them into `TlsOptions` below.
fn build_tls_options(tls: &TlsConfig) -> Result<TlsOptions, Error> {
    let mut opts = TlsOptions::new();
    if tls.danger_accept_invalid_certs {
        warn!("connecting to the KV engine with certificate verification disabled");
    }
    if tls.ca_cert_path.is_some() || tls.client_cert_path.is_some() {
        // TODO: read `ca_cert_path`/`client_cert_path`/`client_key_path` off
        // disk and attach via `TlsOptions::ca_certificate`/`identity`. Not
        // implemented in this SDK; see DESIGN.md.
        return Err(Error::new(
            ErrorKind::Fatal,
            "TLS certificate loading is not yet implemented; connect without \
             ca_cert_path/client_cert_path or use danger_accept_invalid_certs",
        ));
    }
    Ok(opts)
}

fn to_etcd_compare(c: &Compare) -> EtcdCompare {
    match &c.target {
        CompareTarget::ModRevision(rev) => {
            EtcdCompare::mod_revision(c.key.clone(), to_etcd_op(c.op), *rev)
        }
        CompareTarget::Version(v) => EtcdCompare::version(c.key.clone(), to_etcd_op(c.op), *v),
        CompareTarget::Value(v) => EtcdCompare::value(c.key.clone(), to_etcd_op(c.op), v.clone()),
    }
}

fn to_etcd_op(op: CompareOp) -> EtcdCompareOp {
    match op {
        CompareOp::Equal => EtcdCompareOp::Equal,
        CompareOp::NotEqual => EtcdCompareOp::NotEqual,
        CompareOp::Greater => EtcdCompareOp::Greater,
        CompareOp::Less => EtcdCompareOp::Less,
    }
}

fn to_etcd_txn_op(op: &TxOp) -> TxnOp {
    match op {
        TxOp::Put { key, value, lease } => {
            let mut opts = PutOptions::new();
            if let Some(lease) = lease {
                opts = opts.with_lease(*lease);
            }
            TxnOp::put(key.clone(), value.clone(), Some(opts))
        }
        TxOp::Delete { key } => TxnOp::delete(key.clone(), None),
    }
}

fn kv_entry_from(kv: &etcd_client::KeyValue) -> KvEntry {
    KvEntry {
        key: kv.key().to_vec(),
        value: kv.value().to_vec(),
        create_revision: kv.create_revision(),
        mod_revision: kv.mod_revision(),
        version: kv.version(),
        lease: kv.lease(),
    }
}

/// Computes the exclusive end of the range starting at `prefix`, the
/// standard etcd trick for prefix scans (the successor of the last byte,
/// carrying as needed).
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    for i in (0..end.len()).rev() {
        if end[i] < 0xff {
            end[i] += 1;
            end.truncate(i + 1);
            return end;
        }
    }
    // All 0xff: there is no bounded end; scan to the end of the keyspace.
    vec![0x00]
}

#[async_trait]
impl KvEngine for EtcdEngine {
    async fn get(&self, key: &[u8]) -> Result<Option<KvEntry>, Error> {
        let resp = self.client().get(key.to_vec(), None).await?;
        Ok(resp.kvs().first().map(kv_entry_from))
    }

    async fn range(&self, opts: RangeOptions) -> Result<RangeResult, Error> {
        let mut get_opts = GetOptions::new();
        let start = opts.last_key.clone().unwrap_or_else(|| opts.prefix.clone());
        get_opts = get_opts.with_range_end(prefix_range_end(&opts.prefix));
        if opts.limit > 0 {
            // request one extra row so we can tell whether more remain
            get_opts = get_opts.with_limit(opts.limit + 1);
        }
        if let Some(min_rev) = opts.min_mod_revision {
            get_opts = get_opts.with_min_mod_revision(min_rev);
        }
        match opts.sort {
            Some(SortOrder::Ascending) => {
                get_opts = get_opts.with_sort(SortTarget::Key, EtcdSortOrder::Ascend)
            }
            Some(SortOrder::Descending) => {
                get_opts = get_opts.with_sort(SortTarget::Key, EtcdSortOrder::Descend)
            }
            None => {}
        }
        let resp = self.client().get(start, Some(get_opts)).await?;
        let mut entries: Vec<KvEntry> = resp.kvs().iter().map(kv_entry_from).collect();
        if !opts.include_last_key {
            if let Some(last) = &opts.last_key {
                entries.retain(|e| &e.key != last);
            }
        }
        let more = opts.limit > 0 && entries.len() as i64 > opts.limit;
        if more {
            entries.truncate(opts.limit as usize);
        }
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        Ok(RangeResult {
            entries,
            revision,
            more,
        })
    }

    async fn put(&self, key: &[u8], value: Vec<u8>, lease: Option<i64>) -> Result<i64, Error> {
        let mut opts = PutOptions::new();
        if let Some(lease) = lease {
            opts = opts.with_lease(lease);
        }
        let resp = self.client().put(key.to_vec(), value, Some(opts)).await?;
        Ok(resp.header().map(|h| h.revision()).unwrap_or(0))
    }

    async fn delete(&self, key: &[u8]) -> Result<(), Error> {
        self.client()
            .delete(key.to_vec(), Some(DeleteOptions::new()))
            .await?;
        Ok(())
    }

    async fn txn(&self, txn: KvTxn) -> Result<KvTxnResult, Error> {
        let compares: Vec<EtcdCompare> = txn.compares.iter().map(to_etcd_compare).collect();
        let success: Vec<TxnOp> = txn.success.iter().map(to_etcd_txn_op).collect();
        let failure: Vec<TxnOp> = txn.failure.iter().map(to_etcd_txn_op).collect();
        let etcd_txn = Txn::new().when(compares).and_then(success).or_else(failure);
        let resp = self.client().txn(etcd_txn).await?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
        Ok(KvTxnResult {
            succeeded: resp.succeeded(),
            revision,
        })
    }

    async fn lease_grant(&self, ttl_secs: i64) -> Result<i64, Error> {
        let resp = self.client().lease_grant(ttl_secs, None).await?;
        Ok(resp.id())
    }

    async fn lease_revoke(&self, lease: i64) -> Result<(), Error> {
        self.client().lease_revoke(lease).await?;
        Ok(())
    }

    async fn lease_keep_alive_once(&self, lease: i64) -> Result<(), Error> {
        let (mut keeper, mut stream) = self.client().lease_keep_alive(lease).await?;
        keeper.keep_alive().await?;
        if stream.message().await?.is_none() {
            return Err(Error::new(
                ErrorKind::Upstream,
                format!("lease {lease} keepalive stream closed unexpectedly"),
            ));
        }
        Ok(())
    }

    async fn watch(&self, prefix: Vec<u8>, start_revision: i64) -> Result<WatchHandle, Error> {
        let mut opts = etcd_client::WatchOptions::new().with_prefix();
        if start_revision > 0 {
            opts = opts.with_start_revision(start_revision);
        }
        let (mut watcher, mut stream) = self.client().watch(prefix, Some(opts)).await?;
        let (tx, rx) = mpsc::channel(256);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        let _ = watcher.cancel().await;
                        break;
                    }
                    msg = stream.message() => {
                        match msg {
                            Ok(Some(resp)) => {
                                if resp.canceled() {
                                    let kind = if resp.compact_revision() > 0 {
                                        ErrorKind::HistoryCompacted
                                    } else {
                                        ErrorKind::Upstream
                                    };
                                    let reason = resp.cancel_reason().to_string();
                                    let _ = tx.send(Err(Error::new(kind, reason))).await;
                                    break;
                                }
                                let events = resp
                                    .events()
                                    .iter()
                                    .filter_map(|ev| {
                                        let kv = ev.kv()?;
                                        Some(match ev.event_type() {
                                            etcd_client::EventType::Put => {
                                                RawWatchEvent::Put(kv_entry_from(kv))
                                            }
                                            etcd_client::EventType::Delete => {
                                                RawWatchEvent::Delete {
                                                    key: kv.key().to_vec(),
                                                    mod_revision: kv.mod_revision(),
                                                }
                                            }
                                        })
                                    })
                                    .collect();
                                let revision = resp.header().map(|h| h.revision()).unwrap_or(0);
                                if tx.send(Ok(WatchMessage { events, revision })).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {
                                trace!("watch stream closed by server");
                                break;
                            }
                            Err(e) => {
                                let _ = tx.send(Err(Error::from(e))).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!("watch task exiting");
        });

        Ok(WatchHandle::new(rx, cancel_tx))
    }
}
