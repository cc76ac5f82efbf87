//! Populates audit records inside the owning transaction.
//!
//! A record is opened with the request payload and context keys
//! before the decision call, then completed with the chosen values
//! and rationale afterwards. Both writes go through the normal store
//! journal, so a rejected transaction discards the record with
//! everything else.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::model::Value;
use crate::store::{EntityStore, RowId, StoreResult};

use super::shape::{AuditBinding, FkSource, CREATED_ON_ATTR, REASON_ATTR, REQUEST_ATTR};

/// Insert the audit row for one delegation, carrying the request and
/// the context foreign keys. Chosen columns stay `Null` until
/// [`complete_record`] runs.
pub fn open_record(
    store: &mut EntityStore,
    binding: &AuditBinding,
    owner: &RowId,
    step_rows: &[RowId],
    request: &str,
    created_on: DateTime<Utc>,
) -> StoreResult<RowId> {
    let mut values = BTreeMap::new();
    values.insert(REQUEST_ATTR.to_string(), Value::Str(request.to_string()));
    values.insert(CREATED_ON_ATTR.to_string(), Value::Timestamp(created_on));
    for (rel, source) in &binding.context {
        let row = match source {
            FkSource::Owner => Some(owner),
            FkSource::PathStep(step) => step_rows.get(*step),
        };
        if let (Some(row), Some(rel)) = (row, store.catalog().relationship(&binding.entity, rel)) {
            values.insert(rel.fk_attr.clone(), Value::Int(row.num));
        }
    }
    store.insert(&binding.entity, values)
}

/// Fill in the chosen columns and the rationale once a candidate has
/// been selected. `chosen` holds the winning candidate's fields keyed
/// by candidate attribute name, row id included.
pub fn complete_record(
    store: &mut EntityStore,
    binding: &AuditBinding,
    record: &RowId,
    chosen: &BTreeMap<String, Value>,
    reason: &str,
) -> StoreResult<()> {
    for (audit_attr, field) in &binding.chosen {
        let value = chosen.get(field).cloned().unwrap_or(Value::Null);
        store.set(record, audit_attr, value)?;
    }
    store.set(record, REASON_ATTR, Value::Str(reason.to_string()))?;
    Ok(())
}
