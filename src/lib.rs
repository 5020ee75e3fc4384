//! Themelio core: a Kubernetes-style generic object store backed by a
//! strongly-consistent, etcd-like key/value engine.
//!
//! This crate owns the resource repository, the owner-reference and label
//! indexes, the deletion/GC lifecycle, and the watch subsystem described in
//! the Themelio design. It does not own the HTTP surface; callers wire a
//! [`Repository`] and [`WatchManager`] into their own API layer.
//!
//! The [`kv`] module abstracts over the underlying KV engine behind the
//! [`kv::KvEngine`] trait. [`kv::EtcdEngine`] is the production
//! implementation, backed by [etcd](https://crates.io/crates/etcd-client).
//! [`testing::MemoryEngine`] is an in-memory double for tests.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use themelio_core::{Repository, WatchManager};
//! use themelio_core::kv::EtcdEngine;
//!
//! # async fn run() -> Result<(), themelio_core::Error> {
//! let engine = Arc::new(EtcdEngine::connect(&themelio_core::config::EtcdConfig::from_environment()).await?);
//! let repository = Repository::new(engine.clone());
//! let watches = WatchManager::new(Arc::new(themelio_core::store::ResourceStore::new(engine)), 5);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod deletion;
pub mod error;
pub mod gc;
pub mod index;
pub mod keys;
pub mod kv;
pub mod model;
pub mod repository;
pub mod schema_repo;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod validation;
pub mod watch;

pub use crate::error::{Error, ErrorKind};
pub use crate::gc::GcWorker;
pub use crate::model::{Object, ObjectKey, ObjectMeta, ObjectType, OwnerReference, Schema, SystemMeta};
pub use crate::repository::Repository;
pub use crate::store::{ListOptions, ListPage, ResourceStore, WatchEvent};
pub use crate::watch::WatchManager;
