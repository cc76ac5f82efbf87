//! Decision audit: shape validation, in-transaction recording, and
//! post-commit export.

pub mod recorder;
pub mod shape;
pub mod sink;

pub use shape::{AuditBinding, FkSource, ShapeError, ShapeResult};
pub use sink::{AuditSink, DecisionRecord, FileAuditSink, MemoryAuditSink};
