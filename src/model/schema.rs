use serde::{Deserialize, Serialize};

/// Whether a kind's instances are scoped to a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    Cluster,
    Namespaced,
}

/// A single version of a schema's JSON Schema document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub name: String,
    pub json_schema: serde_json::Value,
}

/// A registered type: all versions of a (group, kind) pair coexist under one
/// record, keyed by `/schema/{group}/{kind}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub group: String,
    pub kind: String,
    pub scope: Scope,
    pub versions: Vec<SchemaVersion>,
}

impl Schema {
    pub fn version(&self, name: &str) -> Option<&SchemaVersion> {
        self.versions.iter().find(|v| v.name == name)
    }
}
