//! # Model Errors
//!
//! Error types for catalog construction and validation.

use thiserror::Error;

/// Result type for catalog operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while assembling or validating a [`Catalog`](super::Catalog).
///
/// All of these are setup-time failures: a catalog either builds
/// completely or the process configuring it must stop.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    // ==================
    // Entity Errors
    // ==================
    /// Two entity definitions share a name
    #[error("Duplicate entity definition: {0}")]
    DuplicateEntity(String),

    /// A relationship or lookup referenced an entity the catalog does not define
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// An entity was declared with no attributes at all
    #[error("Entity {0} declares no attributes")]
    EmptyEntity(String),

    // ==================
    // Attribute Errors
    // ==================
    /// Two attribute definitions on one entity share a name
    #[error("Duplicate attribute {attr} on entity {entity}")]
    DuplicateAttribute { entity: String, attr: String },

    /// Referenced attribute does not exist on the entity
    #[error("Unknown attribute {attr} on entity {entity}")]
    UnknownAttribute { entity: String, attr: String },

    /// `id` is assigned by the store and may not be declared
    #[error("Attribute name 'id' is reserved (entity {0})")]
    ReservedAttribute(String),

    // ==================
    // Relationship Errors
    // ==================
    /// Two relationships on one child entity share a name
    #[error("Duplicate relationship {rel} on entity {entity}")]
    DuplicateRelationship { entity: String, rel: String },

    /// The foreign key attribute must exist on the child and be Int
    #[error("Relationship {rel} on {entity}: foreign key {fk_attr} must be a declared Int attribute")]
    BadForeignKey {
        entity: String,
        rel: String,
        fk_attr: String,
    },

    /// One foreign key attribute may back at most one relationship
    #[error("Attribute {fk_attr} on {entity} backs more than one relationship")]
    SharedForeignKey { entity: String, fk_attr: String },

    /// Reverse accessor names must be unique per parent entity and
    /// must not shadow one of the parent's attributes
    #[error("Reverse accessor {reverse} conflicts on parent entity {parent}")]
    ReverseConflict { parent: String, reverse: String },

    /// A relationship name may not shadow an attribute of the child
    #[error("Relationship {rel} on {entity} shadows an attribute of the same name")]
    RelationshipShadowsAttribute { entity: String, rel: String },
}
