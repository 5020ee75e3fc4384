pub(crate) mod object;
pub use object::{Object, ObjectKey, ObjectMeta, ObjectType, OwnerReference, SystemMeta};

pub(crate) mod schema;
pub use schema::{Schema, SchemaVersion, Scope};
