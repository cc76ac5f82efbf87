//! # Store Errors
//!
//! Error types for entity storage and transaction control.

use thiserror::Error;

use crate::model::ValueType;
use crate::store::row::RowId;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by [`EntityStore`](super::EntityStore) operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    // ==================
    // Transaction Errors
    // ==================
    /// Mutation attempted outside begin/commit
    #[error("No active transaction")]
    NoActiveTransaction,

    /// begin() while a transaction is already open
    #[error("A transaction is already active")]
    TransactionActive,

    // ==================
    // Addressing Errors
    // ==================
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown attribute {attr} on entity {entity}")]
    UnknownAttribute { entity: String, attr: String },

    #[error("Unknown relationship {rel} on entity {entity}")]
    UnknownRelationship { entity: String, rel: String },

    #[error("Row not found: {0}")]
    RowNotFound(RowId),

    // ==================
    // Write Errors
    // ==================
    /// Stored values must match the declared attribute type exactly
    #[error("Type mismatch on {entity}.{attr}: expected {expected}, got {actual}")]
    TypeMismatch {
        entity: String,
        attr: String,
        expected: ValueType,
        actual: String,
    },

    /// The id attribute is assigned by the store and never written
    #[error("Attribute 'id' on entity {0} is store-assigned and immutable")]
    IdImmutable(String),

    /// A foreign key value must address an existing parent row
    #[error("Foreign key violation: {entity}.{fk_attr} = {parent_id} but no {parent} row has that id")]
    ForeignKeyViolation {
        entity: String,
        fk_attr: String,
        parent: String,
        parent_id: i64,
    },
}
