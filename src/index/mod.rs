pub(crate) mod label;
pub(crate) mod owner_ref;

pub use label::{build_cleanup_ops as build_label_cleanup_ops, build_update_ops as build_label_update_ops};
pub use owner_ref::{
    build_cleanup_ops as build_owner_ref_cleanup_ops, build_update_ops as build_owner_ref_update_ops,
    get_children_keys, query_children,
};
