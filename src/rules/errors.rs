//! # Registration Errors
//!
//! Error types raised while compiling declared rules into a rule
//! book. Every one of them is fatal at setup time: a system with a
//! rejected rule set must not start taking transactions.

use thiserror::Error;

use crate::audit::ShapeError;
use crate::graph::GraphError;

use super::fallback::ParseFallbackError;

/// Result type for rule registration
pub type RegistrationResult<T> = Result<T, RegistrationError>;

/// Errors raised while building a [`RuleBook`](super::RuleBook)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    // ==================
    // Target Errors
    // ==================
    /// The rule names an entity the catalog does not define
    #[error("Rule targets unknown entity: {0}")]
    UnknownEntity(String),

    /// The rule's target attribute is not declared on its entity
    #[error("Rule targets unknown attribute {entity}.{attr}")]
    UnknownTarget { entity: String, attr: String },

    /// At most one rule may derive a given attribute
    #[error("Duplicate rule for {0}")]
    DuplicateRule(String),

    /// Derived attributes are computed, so callers cannot be required
    /// to supply them
    #[error("Derived attribute {0} must be declared optional")]
    DerivedRequired(String),

    /// Rules and constraints may not live on an audit entity
    #[error("Entity {0} is audit-owned and may not carry rules or constraints")]
    RuleOnAuditEntity(String),

    // ==================
    // Read Errors
    // ==================
    /// An expression reads an attribute that does not exist
    #[error("Rule for {target} reads unknown attribute {entity}.{attr}")]
    UnknownReadAttribute {
        target: String,
        entity: String,
        attr: String,
    },

    /// An expression walks a relationship that does not exist
    #[error("Rule for {target} uses unknown relationship {rel} on {entity}")]
    UnknownRelationship {
        target: String,
        entity: String,
        rel: String,
    },

    /// An aggregate names a reverse accessor the parent does not have
    #[error("Rule for {target} uses unknown collection {reverse} on {parent}")]
    UnknownReverse {
        target: String,
        parent: String,
        reverse: String,
    },

    /// Aggregate filters may read only the child row's own attributes
    #[error("Rule for {target}: aggregate filters may not read parent attributes")]
    FilterReadsParent { target: String },

    // ==================
    // Typing Errors
    // ==================
    /// Target/source types of an aggregate or copy disagree
    #[error("Rule for {target}: {detail}")]
    TypeMismatch { target: String, detail: String },

    // ==================
    // Delegation Errors
    // ==================
    /// A delegated rule declared an empty candidate path
    #[error("Rule for {0} has an empty candidate path")]
    EmptyCandidatePath(String),

    /// A candidate path step did not resolve
    #[error("Rule for {target}: candidate path step {step:?} {detail}")]
    BadCandidatePath {
        target: String,
        step: String,
        detail: String,
    },

    /// The selection criteria text is blank
    #[error("Rule for {0} has blank selection criteria")]
    BlankCriteria(String),

    /// The named candidate field is not declared
    #[error("Rule for {target}: candidate entity {candidate} has no field {field}")]
    UnknownCandidateField {
        target: String,
        candidate: String,
        field: String,
    },

    /// Delegated rules must declare a deterministic fallback
    #[error("Rule for {0} declares no fallback policy")]
    MissingFallback(String),

    /// The fallback spec did not parse
    #[error("Rule for {target}: {source}")]
    InvalidFallback {
        target: String,
        source: ParseFallbackError,
    },

    /// A guard was declared without an alternative expression
    #[error("Rule for {0} declares a guard without an otherwise expression")]
    GuardWithoutOtherwise(String),

    // ==================
    // Structural Errors
    // ==================
    /// Two constraints on one entity share a name
    #[error("Duplicate constraint {name} on {entity}")]
    DuplicateConstraint { entity: String, name: String },

    /// The audit entity does not have the required shape
    #[error(transparent)]
    AuditShape(#[from] ShapeError),

    /// The rules form a dependency cycle
    #[error(transparent)]
    Graph(#[from] GraphError),
}
