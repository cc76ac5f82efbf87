//! Transactional entity storage.

pub mod errors;
pub mod row;
pub mod store;

pub use errors::{StoreError, StoreResult};
pub use row::{Row, RowId};
pub use store::{EntityStore, TxSummary};
