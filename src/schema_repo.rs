//! CRUD over registered type schemas. See spec.md §4.9. The JSON-schema
//! validator itself is an external collaborator; this only stores and
//! retrieves the documents.
use crate::error::{not_found, Error};
use crate::keys;
use crate::kv::{KvEngine, RangeOptions};
use crate::model::Schema;
use std::sync::Arc;

pub struct SchemaRepository<E: KvEngine> {
    engine: Arc<E>,
}

impl<E: KvEngine> SchemaRepository<E> {
    pub fn new(engine: Arc<E>) -> Self {
        SchemaRepository { engine }
    }

    pub async fn put(&self, schema: &Schema) -> Result<(), Error> {
        let key = keys::schema_key(&schema.group, &schema.kind);
        let bytes = serde_json::to_vec(schema)?;
        self.engine.put(&key, bytes, None).await?;
        Ok(())
    }

    pub async fn get(&self, group: &str, kind: &str) -> Result<Schema, Error> {
        let key = keys::schema_key(group, kind);
        let entry = self
            .engine
            .get(&key)
            .await?
            .ok_or_else(|| not_found(format!("no schema registered for {group}/{kind}")))?;
        Ok(serde_json::from_slice(&entry.value)?)
    }

    /// Deletes a registered schema. Per spec.md §9, this does not check for
    /// live objects of the kind; that referential-integrity question is an
    /// open one left to the caller (or a future admission layer).
    pub async fn delete(&self, group: &str, kind: &str) -> Result<(), Error> {
        let key = keys::schema_key(group, kind);
        self.engine.delete(&key).await
    }

    pub async fn list(&self) -> Result<Vec<Schema>, Error> {
        let result = self.engine.range(RangeOptions::new(keys::schema_prefix())).await?;
        result
            .entries
            .iter()
            .map(|e| serde_json::from_slice(&e.value).map_err(Error::from))
            .collect()
    }
}
