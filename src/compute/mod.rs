//! # Value Derivation
//!
//! Computes the value a rule assigns to one attribute of one row:
//! formulas evaluate against the live row, aggregates fold over the
//! link index, copies read through to-one relationships, and
//! delegated rules gather candidates, call the decision function and
//! fall back to the declared policy when the call cannot produce a
//! usable selection.
//!
//! All reads go through the store, so a derivation always sees the
//! transaction's current state.

use std::collections::BTreeMap;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::audit::recorder::{complete_record, open_record};
use crate::config::EngineConfig;
use crate::decision::{DecisionError, DecisionFunction, DecisionOutcome, DecisionRequest};
use crate::graph::AttrRef;
use crate::model::{Value, ValueType, ID_ATTR};
use crate::rules::{
    AiValueRule, Derivation, EvalError, EvalResult, Expr, FallbackPolicy, RowView, Rule, RuleBook,
};
use crate::store::{EntityStore, RowId, StoreError};

/// Appended to a stored request that exceeded the configured bound.
const TRUNCATION_MARKER: &str = "...[truncated]";

pub type ComputeResult<T> = Result<T, ComputeError>;

#[derive(Debug, Error)]
pub enum ComputeError {
    /// Expression evaluation failed. The transaction cannot settle.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Store rejected a read or the audit record write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Delegation could not produce a value, not even by fallback.
    #[error("delegation for {attribute} failed: {reason}")]
    Delegation { attribute: String, reason: String },
}

/// Expression view over a live store row.
pub struct StoreRowView<'a> {
    store: &'a EntityStore,
    row: &'a RowId,
}

impl<'a> StoreRowView<'a> {
    pub fn new(store: &'a EntityStore, row: &'a RowId) -> Self {
        Self { store, row }
    }
}

fn read_error(e: StoreError) -> EvalError {
    match e {
        StoreError::UnknownAttribute { attr, .. } => EvalError::UnknownAttribute(attr),
        StoreError::UnknownRelationship { rel, .. } => EvalError::UnknownRelationship(rel),
        StoreError::RowNotFound(id) => EvalError::MissingRow(id.to_string()),
        other => EvalError::MissingRow(other.to_string()),
    }
}

impl RowView for StoreRowView<'_> {
    fn value(&self, attr: &str) -> EvalResult<Value> {
        self.store.value(self.row, attr).map_err(read_error)
    }

    fn parent_value(&self, rel: &str, attr: &str) -> EvalResult<Value> {
        match self.store.parent_of(self.row, rel).map_err(read_error)? {
            Some(parent) => self.store.value(&parent, attr).map_err(read_error),
            None => Ok(Value::Null),
        }
    }
}

/// One candidate row, snapshotted for a delegation request.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub row: i64,
    pub fields: BTreeMap<String, Value>,
}

impl Candidate {
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }

    fn field(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }
}

/// Outcome of deriving one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
    pub value: Value,
    /// Present for delegated rules: why this value was chosen.
    pub rationale: Option<String>,
    /// Audit record opened for this derivation, if any.
    pub audit_row: Option<RowId>,
}

impl Derived {
    fn plain(value: Value) -> Self {
        Derived {
            value,
            rationale: None,
            audit_row: None,
        }
    }
}

/// Derives attribute values during a transaction.
pub struct ValueComputer<'a> {
    store: &'a mut EntityStore,
    book: &'a RuleBook,
    decision: &'a dyn DecisionFunction,
    config: &'a EngineConfig,
}

impl<'a> ValueComputer<'a> {
    pub fn new(
        store: &'a mut EntityStore,
        book: &'a RuleBook,
        decision: &'a dyn DecisionFunction,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            store,
            book,
            decision,
            config,
        }
    }

    /// Compute the value `rule` assigns to `row`. Does not write the
    /// target attribute; delegated rules do write their audit record.
    pub fn derive(&mut self, rule: &Rule, row: &RowId) -> ComputeResult<Derived> {
        match &rule.derivation {
            Derivation::Formula { expr } => {
                let view = StoreRowView::new(self.store, row);
                Ok(Derived::plain(expr.eval(&view)?))
            }
            Derivation::Sum {
                child_entity,
                rel,
                source,
                filter,
            } => self.derive_sum(child_entity, rel, source, filter.as_ref(), row),
            Derivation::Count {
                child_entity,
                rel,
                filter,
            } => self.derive_count(child_entity, rel, filter.as_ref(), row),
            Derivation::Copy { rel, source } => self.derive_copy(rel, source, row),
            Derivation::AiValue(ai) => self.derive_ai(&rule.target, ai, row),
        }
    }

    fn derive_sum(
        &mut self,
        child_entity: &str,
        rel: &str,
        source: &str,
        filter: Option<&Expr>,
        row: &RowId,
    ) -> ComputeResult<Derived> {
        let source_type = self
            .store
            .catalog()
            .entity(child_entity)
            .and_then(|def| def.attribute(source))
            .map(|attr| attr.value_type)
            .ok_or_else(|| StoreError::UnknownAttribute {
                entity: child_entity.to_string(),
                attr: source.to_string(),
            })?;

        let children = self.store.children_of(row, child_entity, rel);
        match source_type {
            ValueType::Int => {
                let mut total: i64 = 0;
                for child in &children {
                    if !self.filter_admits(filter, child)? {
                        continue;
                    }
                    if let Value::Int(n) = self.store.value(child, source)? {
                        total = total
                            .checked_add(n)
                            .ok_or(EvalError::NumericOverflow("sum"))?;
                    }
                }
                Ok(Derived::plain(Value::Int(total)))
            }
            _ => {
                let mut total = 0.0;
                for child in &children {
                    if !self.filter_admits(filter, child)? {
                        continue;
                    }
                    if let Value::Float(x) = self.store.value(child, source)? {
                        total += x;
                    }
                }
                Ok(Derived::plain(Value::Float(total)))
            }
        }
    }

    fn derive_count(
        &mut self,
        child_entity: &str,
        rel: &str,
        filter: Option<&Expr>,
        row: &RowId,
    ) -> ComputeResult<Derived> {
        let children = self.store.children_of(row, child_entity, rel);
        let mut count: i64 = 0;
        for child in &children {
            if self.filter_admits(filter, child)? {
                count += 1;
            }
        }
        Ok(Derived::plain(Value::Int(count)))
    }

    fn filter_admits(&self, filter: Option<&Expr>, child: &RowId) -> ComputeResult<bool> {
        match filter {
            Some(filter) => {
                let view = StoreRowView::new(self.store, child);
                Ok(filter.eval_bool(&view)?)
            }
            None => Ok(true),
        }
    }

    fn derive_copy(&mut self, rel: &str, source: &str, row: &RowId) -> ComputeResult<Derived> {
        match self.store.parent_of(row, rel)? {
            Some(parent) => Ok(Derived::plain(self.store.value(&parent, source)?)),
            None => Ok(Derived::plain(Value::Null)),
        }
    }

    fn derive_ai(
        &mut self,
        target: &AttrRef,
        rule: &AiValueRule,
        row: &RowId,
    ) -> ComputeResult<Derived> {
        if let Some(guard) = &rule.guard {
            let view = StoreRowView::new(self.store, row);
            if !guard.when.eval_bool(&view)? {
                let value = guard.otherwise.eval(&view)?;
                return Ok(Derived::plain(value));
            }
        }

        // Walk the to-one prefix of the path.
        let mut step_rows = Vec::new();
        let mut current = row.clone();
        for step in &rule.path.steps {
            match self.store.parent_of(&current, &step.rel)? {
                Some(parent) => {
                    step_rows.push(parent.clone());
                    current = parent;
                }
                None => {
                    return Err(ComputeError::Delegation {
                        attribute: target.to_string(),
                        reason: format!("{} has no {} linked", current, step.rel),
                    });
                }
            }
        }

        let candidate_ids =
            self.store
                .children_of(&current, &rule.path.candidate_entity, &rule.path.rel);
        if candidate_ids.is_empty() {
            return Err(ComputeError::Delegation {
                attribute: target.to_string(),
                reason: format!("{} has no {} candidates", current, rule.path.reverse),
            });
        }
        let candidates = self.snapshot_candidates(&candidate_ids)?;
        let (request, encoded) = self.build_request(target, rule, &candidates)?;

        let record = open_record(
            self.store,
            &rule.audit,
            row,
            &step_rows,
            &encoded,
            Utc::now(),
        )?;

        let (index, reason) = self.select(target, rule, &request, &candidates)?;
        let chosen = &candidates[index];
        debug!(target_attr = %target, row = %row, chosen_row = chosen.row, "delegated selection settled");

        complete_record(self.store, &rule.audit, &record, &chosen.fields, &reason)?;

        Ok(Derived {
            value: chosen.field(&rule.value_field),
            rationale: Some(reason),
            audit_row: Some(record),
        })
    }

    /// Snapshot one candidate: every own attribute plus `id`, and the
    /// attributes of each to-one parent flattened as `<rel>_<attr>`.
    /// The snapshot is complete before any external call, so the
    /// decision function never reads live state.
    fn snapshot_candidates(&self, ids: &[RowId]) -> ComputeResult<Vec<Candidate>> {
        let mut candidates = Vec::with_capacity(ids.len());
        for id in ids {
            let mut fields = BTreeMap::new();
            {
                let row = self.store.get(id)?;
                fields.insert(ID_ATTR.to_string(), Value::Int(row.id()));
                for (name, value) in row.values() {
                    fields.insert(name.to_string(), value.clone());
                }
            }
            if let Some(def) = self.store.catalog().entity(&id.entity) {
                for rel in def.relationships() {
                    let Some(parent) = self.store.parent_of(id, &rel.name)? else {
                        continue;
                    };
                    let parent_row = self.store.get(&parent)?;
                    for (name, value) in parent_row.values() {
                        fields.insert(format!("{}_{}", rel.name, name), value.clone());
                    }
                }
            }
            candidates.push(Candidate {
                row: id.num,
                fields,
            });
        }
        Ok(candidates)
    }

    /// Build the request and the serialized form stored in the audit
    /// trail. The stored copy is clipped to the configured bound with
    /// a marker; the request itself always carries every candidate.
    fn build_request(
        &self,
        target: &AttrRef,
        rule: &AiValueRule,
        candidates: &[Candidate],
    ) -> ComputeResult<(DecisionRequest, String)> {
        let request = DecisionRequest {
            conditions: self.config.conditions().to_string(),
            optimize_for: rule.optimize_for.clone(),
            candidates: candidates.iter().map(Candidate::to_json).collect(),
        };
        let mut encoded = serde_json::to_string(&request).map_err(|e| ComputeError::Delegation {
            attribute: target.to_string(),
            reason: format!("request serialization failed: {}", e),
        })?;
        if encoded.len() > self.config.max_request_len {
            warn!(
                target_attr = %target,
                len = encoded.len(),
                bound = self.config.max_request_len,
                "stored request clipped"
            );
            let keep = self
                .config
                .max_request_len
                .saturating_sub(TRUNCATION_MARKER.len());
            let cut = encoded
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|i| *i <= keep)
                .last()
                .unwrap_or(0);
            encoded.truncate(cut);
            encoded.push_str(TRUNCATION_MARKER);
        }
        Ok((request, encoded))
    }

    /// Run the delegated call with retries, then the fallback policy.
    /// The returned index is within `candidates`.
    fn select(
        &self,
        target: &AttrRef,
        rule: &AiValueRule,
        request: &DecisionRequest,
        candidates: &[Candidate],
    ) -> ComputeResult<(usize, String)> {
        let attempts = 1 + self.config.decision_retries;
        let mut last_err = DecisionError::Unavailable("no attempt made".to_string());
        for attempt in 0..attempts {
            match self.decision.decide(request) {
                Ok(DecisionOutcome {
                    chosen_index,
                    reason,
                }) if chosen_index < candidates.len() => {
                    return Ok((chosen_index, self.clip_reason(reason)));
                }
                Ok(DecisionOutcome { chosen_index, .. }) => {
                    last_err = DecisionError::InvalidResponse(format!(
                        "chosen_index {} out of range for {} candidates",
                        chosen_index,
                        candidates.len()
                    ));
                }
                Err(e) => {
                    let transient = e.is_transient();
                    last_err = e;
                    if !transient {
                        break;
                    }
                }
            }
            debug!(target_attr = %target, attempt, error = %last_err, "delegated call failed");
        }

        let index = fallback_index(&rule.fallback, candidates).ok_or_else(|| {
            ComputeError::Delegation {
                attribute: target.to_string(),
                reason: format!(
                    "{}; fallback {} found no orderable candidate",
                    last_err, rule.fallback
                ),
            }
        })?;
        let reason = format!("Fallback: {}, using {}", last_err, rule.fallback);
        Ok((index, self.clip_reason(reason)))
    }

    fn clip_reason(&self, reason: String) -> String {
        if reason.chars().count() <= self.config.max_reason_len {
            reason
        } else {
            reason.chars().take(self.config.max_reason_len).collect()
        }
    }
}

/// Deterministic local choice. Null policy fields lose to any value;
/// ties keep the earliest candidate, which has the lowest row id.
/// `None` when no candidate has an orderable policy value.
fn fallback_index(policy: &FallbackPolicy, candidates: &[Candidate]) -> Option<usize> {
    let (field, want_greater) = match policy {
        FallbackPolicy::First => return candidates.first().map(|_| 0),
        FallbackPolicy::Min(field) => (field, false),
        FallbackPolicy::Max(field) => (field, true),
    };
    let mut best: Option<(usize, Value)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let value = candidate.field(field);
        if value.is_null() {
            continue;
        }
        best = match best {
            None => Some((index, value)),
            Some((best_index, best_value)) => {
                let replaces = match value.compare(&best_value) {
                    Some(std::cmp::Ordering::Greater) => want_greater,
                    Some(std::cmp::Ordering::Less) => !want_greater,
                    _ => false,
                };
                if replaces {
                    Some((index, value))
                } else {
                    Some((best_index, best_value))
                }
            }
        };
    }
    best.map(|(index, _)| index)
}
