//! Engine error types.

use thiserror::Error;

use crate::compute::ComputeError;
use crate::rules::EvalError;
use crate::store::{RowId, StoreError};

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors returned by engine mutations. Constraint and delegation
/// failures are per-transaction and recoverable; the transaction they
/// reject leaves no trace in the store.
#[derive(Debug, Error)]
pub enum EngineError {
    // ==================
    // Write Validation
    // ==================
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Audit entities are written only by the engine itself.
    #[error("{0} is an audit entity and cannot be written directly")]
    AuditEntityWrite(String),

    /// Rule targets are owned by their rules.
    #[error("{entity}.{attr} is derived by a rule and cannot be written")]
    DerivedAttribute { entity: String, attr: String },

    // ==================
    // Settlement
    // ==================
    #[error("{message}")]
    Constraint { name: String, message: String },

    /// A required attribute was still null after evaluation settled.
    #[error("Missing required attribute {attr} on {row}")]
    MissingRequired { row: RowId, attr: String },

    #[error("Delegation failed for {attribute}: {reason}")]
    DelegationFailed { attribute: String, reason: String },

    #[error("Cannot delete {row}: {count} {child_entity} rows reference it through {rel}")]
    DeleteRestricted {
        row: RowId,
        child_entity: String,
        rel: String,
        count: usize,
    },

    // ==================
    // Internal
    // ==================
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ComputeError> for EngineError {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::Eval(e) => EngineError::Eval(e),
            ComputeError::Store(e) => EngineError::Store(e),
            ComputeError::Delegation { attribute, reason } => {
                EngineError::DelegationFailed { attribute, reason }
            }
        }
    }
}

/// How an engine error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Caller misuse: wrong entity, attribute or write target.
    Setup,
    /// Business rejection of a well-formed write. The transaction
    /// rolled back; the engine remains usable.
    Reject,
    /// Internal evaluation or store failure.
    Fatal,
}

impl EngineError {
    /// Name of the constraint that rejected the transaction, if any.
    pub fn constraint_name(&self) -> Option<&str> {
        match self {
            EngineError::Constraint { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            EngineError::UnknownEntity(_)
            | EngineError::AuditEntityWrite(_)
            | EngineError::DerivedAttribute { .. } => Severity::Setup,
            EngineError::Constraint { .. }
            | EngineError::MissingRequired { .. }
            | EngineError::DelegationFailed { .. }
            | EngineError::DeleteRestricted { .. } => Severity::Reject,
            EngineError::Eval(_) | EngineError::Store(_) => Severity::Fatal,
        }
    }

    /// Whether this is a business rejection of a well-formed write,
    /// as opposed to a caller or internal error.
    pub fn is_rejection(&self) -> bool {
        self.severity() == Severity::Reject
    }
}
