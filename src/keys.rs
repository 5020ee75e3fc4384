//! Deterministic mapping from domain identity to KV keys. See spec.md §4.1.
//!
//! All keys are slash-separated byte strings. `{type}` is
//! `group/version/kind` with an optional trailing `/namespace`; `{okey}` is
//! `{type}/name`.
use crate::error::{invalid_input, Error};
use crate::model::{ObjectKey, ObjectType};

const OBJECT_PREFIX: &str = "";
const SCHEMA_PREFIX: &str = "/schema";
const DELETION_PREFIX: &str = "/deletion";
const DELETION_LOCK_PREFIX: &str = "/deletion-lock";
const OWNER_REF_INDEX_PREFIX: &str = "/index/owner-reference";
const LABEL_INDEX_PREFIX: &str = "/index/label";

/// `group/version/kind[/namespace]`, with no leading or trailing slash.
pub fn type_path(ty: &ObjectType) -> String {
    match &ty.namespace {
        Some(ns) => format!("{}/{}/{}/{}", ty.group, ty.version, ty.kind, ns),
        None => format!("{}/{}/{}", ty.group, ty.version, ty.kind),
    }
}

/// `{type}/name`, with no leading or trailing slash.
pub fn okey_path(key: &ObjectKey) -> String {
    format!("{}/{}", type_path(&key.ty), key.name)
}

/// The prefix under which all objects of `ty` live, suitable for a prefix
/// range/watch (includes a trailing slash so it does not match a
/// differently-named type sharing the same string prefix).
pub fn type_prefix(ty: &ObjectType) -> String {
    format!("{OBJECT_PREFIX}/{}/", type_path(ty))
}

pub fn object_key(key: &ObjectKey) -> Vec<u8> {
    format!("{OBJECT_PREFIX}/{}", okey_path(key)).into_bytes()
}

pub fn schema_key(group: &str, kind: &str) -> Vec<u8> {
    format!("{SCHEMA_PREFIX}/{group}/{kind}").into_bytes()
}

pub fn schema_prefix() -> Vec<u8> {
    format!("{SCHEMA_PREFIX}/").into_bytes()
}

pub fn deletion_key(key: &ObjectKey) -> Vec<u8> {
    format!("{DELETION_PREFIX}/{}", okey_path(key)).into_bytes()
}

pub fn deletion_prefix() -> Vec<u8> {
    format!("{DELETION_PREFIX}/").into_bytes()
}

pub fn deletion_lock_key(key: &ObjectKey) -> Vec<u8> {
    format!("{DELETION_LOCK_PREFIX}/{}", okey_path(key)).into_bytes()
}

pub fn owner_ref_index_key(parent: &ObjectKey, child: &ObjectKey) -> Vec<u8> {
    format!(
        "{OWNER_REF_INDEX_PREFIX}/{}/{}",
        okey_path(parent),
        okey_path(child)
    )
    .into_bytes()
}

/// Prefix listing all children of `parent` (§4.3 `GetChildrenKeys`).
pub fn owner_ref_index_prefix(parent: &ObjectKey) -> Vec<u8> {
    format!("{OWNER_REF_INDEX_PREFIX}/{}/", okey_path(parent)).into_bytes()
}

pub fn label_index_key(ty: &ObjectType, label_key: &str, label_value: &str, name: &str) -> Vec<u8> {
    format!(
        "{LABEL_INDEX_PREFIX}/{}/{label_key}/{label_value}/{name}",
        type_path(ty)
    )
    .into_bytes()
}

/// Prefix listing all label-index entries for a type (debugging / cleanup
/// scans); not used on the object write hot path.
pub fn label_index_type_prefix(ty: &ObjectType) -> Vec<u8> {
    format!("{LABEL_INDEX_PREFIX}/{}/", type_path(ty)).into_bytes()
}

/// Parses an object/resource key path of the form `group/version/kind/name`
/// (cluster-scoped, 4 segments) or `group/version/kind/namespace/name`
/// (namespaced, 5 segments). Any other segment count is rejected.
pub fn parse_okey(path: &str) -> Result<ObjectKey, Error> {
    let path = path.trim_start_matches('/');
    let segs: Vec<&str> = path.split('/').collect();
    match segs.as_slice() {
        [group, version, kind, name] => Ok(ObjectKey::new(
            ObjectType::cluster_scoped(group, version, kind),
            (*name).to_string(),
        )),
        [group, version, kind, namespace, name] => Ok(ObjectKey::new(
            ObjectType::namespaced(group, version, kind, namespace),
            (*name).to_string(),
        )),
        _ => Err(invalid_input(format!(
            "object key must decompose into 4 or 5 segments, got {}: {path}",
            segs.len()
        ))),
    }
}

pub fn strip_prefix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_scoped_key_accepts_four_segments() {
        let k = parse_okey("apps/v1/Widget/my-widget").unwrap();
        assert!(!k.ty.is_namespaced());
        assert_eq!(k.name, "my-widget");
    }

    #[test]
    fn namespaced_key_accepts_five_segments() {
        let k = parse_okey("apps/v1/Widget/default/my-widget").unwrap();
        assert!(k.ty.is_namespaced());
        assert_eq!(k.ty.namespace.as_deref(), Some("default"));
        assert_eq!(k.name, "my-widget");
    }

    #[test]
    fn other_segment_counts_are_rejected() {
        assert!(parse_okey("apps/v1/Widget").is_err());
        assert!(parse_okey("apps/v1/Widget/ns/extra/name").is_err());
    }

    #[test]
    fn owner_ref_index_key_strips_to_the_child_suffix() {
        // The parent is known up front (it's the range prefix being scanned),
        // so the child is recovered by stripping that fixed-length prefix,
        // not by guessing a split point in the combined suffix.
        let parent = ObjectKey::new(ObjectType::cluster_scoped("g", "v1", "Parent"), "p1");
        let child = ObjectKey::new(ObjectType::namespaced("g", "v1", "Child", "ns1"), "c1");
        let key = owner_ref_index_key(&parent, &child);
        let key = String::from_utf8(key).unwrap();
        let prefix = String::from_utf8(owner_ref_index_prefix(&parent)).unwrap();
        let child_suffix = strip_prefix(&key, &prefix).unwrap();
        assert_eq!(parse_okey(child_suffix).unwrap(), child);
    }

    #[test]
    fn owner_ref_index_key_strips_correctly_across_mixed_scopes() {
        // parent namespaced (5 segs), child cluster-scoped (4 segs): a
        // naive guess-the-split approach can find a spurious valid split
        // before the real one; stripping the known parent prefix cannot.
        let parent = ObjectKey::new(ObjectType::namespaced("g", "v1", "Parent", "ns"), "p1");
        let child = ObjectKey::new(ObjectType::cluster_scoped("g2", "v2", "Child"), "c1");
        let key = owner_ref_index_key(&parent, &child);
        let key = String::from_utf8(key).unwrap();
        let prefix = String::from_utf8(owner_ref_index_prefix(&parent)).unwrap();
        let child_suffix = strip_prefix(&key, &prefix).unwrap();
        assert_eq!(parse_okey(child_suffix).unwrap(), child);
    }

    #[test]
    fn type_prefix_has_trailing_slash() {
        let ty = ObjectType::cluster_scoped("g", "v1", "Widget");
        assert_eq!(type_prefix(&ty), "/g/v1/Widget/");
    }
}
