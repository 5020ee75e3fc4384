use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies a collection of objects: a group/version/kind, optionally
/// scoped to a namespace. `namespace` is `None` for cluster-scoped types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectType {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: Option<String>,
}

impl ObjectType {
    pub fn cluster_scoped(group: &str, version: &str, kind: &str) -> Self {
        ObjectType {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            namespace: None,
        }
    }

    pub fn namespaced(group: &str, version: &str, kind: &str, namespace: &str) -> Self {
        ObjectType {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn is_namespaced(&self) -> bool {
        self.namespace.is_some()
    }
}

/// A single object's identity: its type plus a name unique within that type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub ty: ObjectType,
    pub name: String,
}

impl ObjectKey {
    pub fn new(ty: ObjectType, name: impl Into<String>) -> Self {
        ObjectKey {
            ty,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.ty.namespace {
            Some(ns) => write!(
                f,
                "{}/{}/{}/{}/{}",
                self.ty.group, self.ty.version, self.ty.kind, ns, self.name
            ),
            None => write!(f, "{}/{}/{}/{}", self.ty.group, self.ty.version, self.ty.kind, self.name),
        }
    }
}

/// A declared parent to child link. Only references with
/// `block_owner_deletion = true` participate in cascade deletion and are
/// mirrored in the owner-reference index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub parent_type: ObjectType,
    pub parent_name: String,
    pub parent_uid: String,
    pub block_owner_deletion: bool,
}

impl OwnerReference {
    /// Two owner references are "the same" for diffing purposes iff their
    /// (parent-kind, parent-name) pair matches; see
    /// `index::owner_ref::diff_refs`.
    fn identity(&self) -> (&str, &str) {
        (self.parent_type.kind.as_str(), self.parent_name.as_str())
    }

    pub fn same_parent(&self, other: &OwnerReference) -> bool {
        self.identity() == other.identity()
    }

    pub fn parent_key(&self) -> ObjectKey {
        ObjectKey::new(self.parent_type.clone(), self.parent_name.clone())
    }
}

/// Server-assigned, monotonically increasing bookkeeping fields. `uid` is
/// assigned once, on first write; `create_revision`/`mod_revision`/`version`
/// are populated from the KV record on every read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMeta {
    pub uid: String,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    pub creation_timestamp: Option<DateTime<Utc>>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

/// User-declared metadata: labels, annotations, owner references and
/// finalizers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub finalizers: Vec<String>,
}

/// A single resource instance: identity, system/user metadata, and an
/// arbitrary spec/status pair validated against the registered schema.
///
/// `spec` and `status` are opaque JSON trees (an algebraic value: object,
/// array, string, number, bool or null) so they survive a Replace/Get
/// round-trip without any coupling to a concrete schema type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    #[serde(rename = "type")]
    pub ty: ObjectType,
    pub name: String,
    #[serde(rename = "systemMeta")]
    pub system: SystemMeta,
    #[serde(rename = "metadata")]
    pub meta: ObjectMeta,
    pub spec: serde_json::Value,
    #[serde(default = "default_status")]
    pub status: serde_json::Value,
}

fn default_status() -> serde_json::Value {
    serde_json::Value::Null
}

impl Object {
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.ty.clone(), self.name.clone())
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.system.deletion_timestamp.is_some()
    }

    /// References that participate in cascade deletion (§4.3: non-blocking
    /// refs generate no index ops and are not treated as blockers).
    pub fn blocking_owner_refs(&self) -> impl Iterator<Item = &OwnerReference> {
        self.meta
            .owner_references
            .iter()
            .filter(|r| r.block_owner_deletion)
    }
}
