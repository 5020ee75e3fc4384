//! The label index. See spec.md §4.4. Index entry values carry the write
//! timestamp for debugging only; nothing reads them back.
use crate::keys;
use crate::kv::TxOp;
use crate::model::ObjectType;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Diffs `old` against `new` labels and returns the ops needed to keep the
/// label index in sync: a changed or removed `(key, value)` pair is
/// deleted, a new or changed pair is put, an unchanged pair generates no op.
pub fn build_update_ops(
    ty: &ObjectType,
    name: &str,
    old: &HashMap<String, String>,
    new: &HashMap<String, String>,
    now: DateTime<Utc>,
) -> Vec<TxOp> {
    let mut ops = Vec::new();
    for (k, v) in old {
        if new.get(k) != Some(v) {
            ops.push(TxOp::delete(keys::label_index_key(ty, k, v, name)));
        }
    }
    let stamp = now.to_rfc3339().into_bytes();
    for (k, v) in new {
        if old.get(k) != Some(v) {
            ops.push(TxOp::put(keys::label_index_key(ty, k, v, name), stamp.clone()));
        }
    }
    ops
}

/// One delete op per label currently on the object, for removing its
/// outgoing label-index entries entirely on object delete.
pub fn build_cleanup_ops(ty: &ObjectType, name: &str, labels: &HashMap<String, String>) -> Vec<TxOp> {
    labels
        .iter()
        .map(|(k, v)| TxOp::delete(keys::label_index_key(ty, k, v, name)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty() -> ObjectType {
        ObjectType::cluster_scoped("apps", "v1", "Widget")
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn changed_value_deletes_old_and_puts_new() {
        let old = map(&[("app", "web")]);
        let new = map(&[("app", "api")]);
        let ops = build_update_ops(&ty(), "n1", &old, &new, Utc::now());
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().any(|o| matches!(o, TxOp::Delete { .. })));
        assert!(ops.iter().any(|o| matches!(o, TxOp::Put { .. })));
    }

    #[test]
    fn unchanged_label_produces_no_ops() {
        let labels = map(&[("app", "web")]);
        let ops = build_update_ops(&ty(), "n1", &labels, &labels, Utc::now());
        assert!(ops.is_empty());
    }

    #[test]
    fn create_then_update_scenario_converges() {
        // spec.md §8 scenario 1: {app:web,env:dev} -> {app:web,tier:front}
        let old = map(&[("app", "web"), ("env", "dev")]);
        let new = map(&[("app", "web"), ("tier", "front")]);
        let ops = build_update_ops(&ty(), "n1", &old, &new, Utc::now());
        // env:dev deleted, tier:front put; app:web untouched
        assert_eq!(ops.len(), 2);
        let deletes: Vec<&[u8]> = ops
            .iter()
            .filter_map(|o| match o {
                TxOp::Delete { key } => Some(key.as_slice()),
                _ => None,
            })
            .collect();
        assert!(deletes[0].ends_with(b"/env/dev/n1"));
    }
}
