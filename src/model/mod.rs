//! Data model: values, attribute types, entities and relationships.

pub mod errors;
pub mod meta;
pub mod value;

pub use errors::{ModelError, ModelResult};
pub use meta::{AttributeDef, Catalog, CatalogBuilder, DeletePolicy, EntityDef, Relationship, ID_ATTR};
pub use value::{Value, ValueType};
