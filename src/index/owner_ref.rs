//! The reverse index enabling O(children-of-P) lookups without scanning.
//! See spec.md §4.3.
use crate::error::{err, Error, ErrorKind};
use crate::keys;
use crate::kv::{KvEngine, RangeOptions, TxOp};
use crate::model::{ObjectKey, OwnerReference};
use crate::store::ResourceStore;
use tracing::warn;

/// Diffs `old_refs` against `new_refs` and returns the ops needed to bring
/// the owner-reference index in sync. Only blocking refs participate; a
/// non-blocking ref generates no ops either way.
pub fn build_update_ops(child: &ObjectKey, old_refs: &[OwnerReference], new_refs: &[OwnerReference]) -> Vec<TxOp> {
    let mut ops = Vec::new();
    for old in old_refs.iter().filter(|r| r.block_owner_deletion) {
        let still_present = new_refs.iter().any(|n| n.block_owner_deletion && n.same_parent(old));
        if !still_present {
            ops.push(TxOp::delete(keys::owner_ref_index_key(&old.parent_key(), child)));
        }
    }
    for new in new_refs.iter().filter(|r| r.block_owner_deletion) {
        let already_present = old_refs.iter().any(|o| o.block_owner_deletion && o.same_parent(new));
        if !already_present {
            ops.push(TxOp::put(keys::owner_ref_index_key(&new.parent_key(), child), Vec::new()));
        }
    }
    ops
}

/// One delete op per blocking ref in `refs`, for removing an object's
/// outgoing index entries entirely (object delete, or ref-stripping on a
/// keep-alive child).
pub fn build_cleanup_ops(child: &ObjectKey, refs: &[OwnerReference]) -> Vec<TxOp> {
    refs.iter()
        .filter(|r| r.block_owner_deletion)
        .map(|r| TxOp::delete(keys::owner_ref_index_key(&r.parent_key(), child)))
        .collect()
}

/// Lists every child key referencing `parent` via a blocking owner
/// reference.
///
/// `parent` is already known (it's the argument, not something we're
/// recovering from the key), so the child is read back by stripping the
/// fixed-length `owner_ref_index_prefix(parent)` rather than by guessing
/// where a combined `parent/child` suffix splits: that guess is ambiguous
/// whenever parent and child have different segment counts (one
/// namespaced, one cluster-scoped).
pub async fn get_children_keys<E: KvEngine>(engine: &E, parent: &ObjectKey) -> Result<Vec<ObjectKey>, Error> {
    let prefix = keys::owner_ref_index_prefix(parent);
    let prefix_str = String::from_utf8(prefix.clone()).map_err(|_| err!(Marshaling, "non-utf8 index prefix"))?;
    let result = engine.range(RangeOptions::new(prefix)).await?;
    let mut out = Vec::with_capacity(result.entries.len());
    for entry in result.entries {
        let key_str = String::from_utf8_lossy(&entry.key).into_owned();
        let child_suffix = keys::strip_prefix(&key_str, &prefix_str)
            .ok_or_else(|| err!(Marshaling, "owner-reference index key missing expected prefix: {key_str}"))?;
        out.push(keys::parse_okey(child_suffix)?);
    }
    Ok(out)
}

/// As [`get_children_keys`], but also fetches each child object. A child
/// present in the index but missing from the store (crash between index
/// write and object write) is logged and skipped, not treated as an error:
/// the system is only eventually consistent across that gap.
pub async fn query_children<E: KvEngine>(
    engine: &E,
    store: &ResourceStore<E>,
    parent: &ObjectKey,
) -> Result<Vec<crate::model::Object>, Error> {
    let keys = get_children_keys(engine, parent).await?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        match store.get(&key).await {
            Ok(obj) => out.push(obj),
            Err(e) if e.kind == ErrorKind::NotFound => {
                warn!("child {key} is indexed under parent {parent} but missing from the store");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}
