//! Path-param and patch validation contracts consumed by the HTTP layer.
//! See spec.md §6.1. The handlers themselves are external; only the rules
//! they must enforce live here.
use crate::error::{invalid_input, Error};

/// Fields a PatchResource caller may never touch.
const SENSITIVE_PATCH_PATHS: &[&str] = &[
    "/metadata/uid",
    "/metadata/creationTimestamp",
    "/metadata/generation",
    "/metadata/resourceVersion",
];

fn touches_sensitive_path(path: &str) -> bool {
    SENSITIVE_PATCH_PATHS
        .iter()
        .any(|sensitive| path == *sensitive || path.starts_with(&format!("{sensitive}/")))
}

/// Rejects a patch that touches any field in [`SENSITIVE_PATCH_PATHS`],
/// whether as the op's target (`path`) or, for `move`/`copy`, its source
/// (`from`).
pub fn validate_patch(patch: &json_patch::Patch) -> Result<(), Error> {
    for op in patch.0.iter() {
        let touched = match op {
            json_patch::PatchOperation::Add(o) => vec![o.path.to_string()],
            json_patch::PatchOperation::Remove(o) => vec![o.path.to_string()],
            json_patch::PatchOperation::Replace(o) => vec![o.path.to_string()],
            json_patch::PatchOperation::Move(o) => vec![o.path.to_string(), o.from.to_string()],
            json_patch::PatchOperation::Copy(o) => vec![o.path.to_string(), o.from.to_string()],
            json_patch::PatchOperation::Test(o) => vec![o.path.to_string()],
        };
        if let Some(path) = touched.iter().find(|p| touches_sensitive_path(p)) {
            return Err(invalid_input(format!("patch may not modify {path}")));
        }
    }
    Ok(())
}

/// The shared rule for group/version/kind/name/namespace path params:
/// non-empty, at most 20 characters, starts alphanumeric, and consists
/// entirely of `[A-Za-z0-9_]`.
pub fn validate_path_segment(value: &str) -> Result<(), Error> {
    if value.is_empty() || value.chars().count() > 20 {
        return Err(invalid_input(format!("path segment must be 1-20 characters: {value:?}")));
    }
    if !value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid_input(format!("path segment must start with a letter or digit: {value:?}")));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid_input(format!(
            "path segment must match [A-Za-z0-9_]+: {value:?}"
        )));
    }
    Ok(())
}

/// Group must additionally be a DNS-1123 subdomain of at most 53 characters:
/// dot-separated lowercase labels, each starting and ending alphanumeric.
pub fn validate_group(group: &str) -> Result<(), Error> {
    if group.is_empty() || group.chars().count() > 53 {
        return Err(invalid_input(format!("group must be 1-53 characters: {group:?}")));
    }
    let is_dns1123 = group.split('.').all(|label| {
        !label.is_empty()
            && label.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
            && label.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
            && label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    if !is_dns1123 {
        return Err(invalid_input(format!("group must be a DNS-1123 subdomain: {group:?}")));
    }
    Ok(())
}

/// Kind must additionally be CamelCase starting with an uppercase letter.
pub fn validate_kind(kind: &str) -> Result<(), Error> {
    validate_path_segment(kind)?;
    if !kind.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        return Err(invalid_input(format!("kind must be CamelCase starting uppercase: {kind:?}")));
    }
    Ok(())
}

/// Version must match `v[0-9]+((alpha|beta)[0-9]+)?`.
pub fn validate_version(version: &str) -> Result<(), Error> {
    let malformed = || invalid_input(format!("version must match v[0-9]+((alpha|beta)[0-9]+)?: {version:?}"));

    let rest = version.strip_prefix('v').ok_or_else(malformed)?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return Err(malformed());
    }
    let tail = &rest[digits_end..];
    if tail.is_empty() {
        return Ok(());
    }
    for prerelease in ["alpha", "beta"] {
        if let Some(suffix) = tail.strip_prefix(prerelease) {
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                return Ok(());
            }
        }
    }
    Err(malformed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segment_rejects_empty_and_overlong() {
        assert!(validate_path_segment("").is_err());
        assert!(validate_path_segment(&"a".repeat(21)).is_err());
        assert!(validate_path_segment(&"a".repeat(20)).is_ok());
    }

    #[test]
    fn path_segment_rejects_non_alnum_start_and_symbols() {
        assert!(validate_path_segment("_widget").is_err());
        assert!(validate_path_segment("widget-1").is_err());
        assert!(validate_path_segment("widget_1").is_ok());
    }

    #[test]
    fn group_accepts_dns1123_subdomains() {
        assert!(validate_group("apps.example.com").is_ok());
        assert!(validate_group("Apps").is_err());
        assert!(validate_group("-apps").is_err());
    }

    #[test]
    fn kind_requires_leading_uppercase() {
        assert!(validate_kind("Widget").is_ok());
        assert!(validate_kind("widget").is_err());
    }

    #[test]
    fn version_matches_the_spec_grammar() {
        assert!(validate_version("v1").is_ok());
        assert!(validate_version("v1alpha2").is_ok());
        assert!(validate_version("v2beta10").is_ok());
        assert!(validate_version("v1alpha").is_err());
        assert!(validate_version("1").is_err());
        assert!(validate_version("valpha1").is_err());
    }

    #[test]
    fn patch_rejects_sensitive_fields() {
        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            { "op": "replace", "path": "/metadata/uid", "value": "x" }
        ]))
        .unwrap();
        assert!(validate_patch(&patch).is_err());
    }

    #[test]
    fn patch_allows_ordinary_fields() {
        let patch: json_patch::Patch = serde_json::from_value(serde_json::json!([
            { "op": "replace", "path": "/spec/color", "value": "blue" }
        ]))
        .unwrap();
        assert!(validate_patch(&patch).is_ok());
    }
}
