//! # Rule Evaluation Engine
//!
//! The engine owns the store and turns each caller mutation into a
//! settled transaction: apply the write, propagate every affected
//! derivation in dependency-rank order, enforce constraints, then
//! commit and export the audit trail. Any failure rolls the store
//! back to its exact pre-transaction state.

pub mod errors;

pub use errors::{EngineError, EngineResult, Severity};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditSink, DecisionRecord};
use crate::compute::{StoreRowView, ValueComputer};
use crate::config::EngineConfig;
use crate::decision::DecisionFunction;
use crate::graph::{AttrRef, Crossing};
use crate::model::{DeletePolicy, Value, ID_ATTR};
use crate::rules::RuleBook;
use crate::store::{EntityStore, RowId};

/// Lifecycle of a row inside one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowPhase {
    /// Touched, not yet evaluated.
    Dirty,
    /// A rule is currently computing one of its attributes.
    Evaluating,
    /// All affected derivations are done.
    Settled,
    /// The transaction was rolled back.
    Rejected,
}

/// One rule execution, in firing order.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFiring {
    /// Evaluation rank of the derived attribute.
    pub depth: u32,
    pub row: RowId,
    pub attribute: String,
    pub rule_kind: &'static str,
    pub old: Value,
    pub new: Value,
    /// Present for delegated firings: why this value was chosen.
    pub rationale: Option<String>,
}

/// Receipt for a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxReceipt {
    pub tx_id: Uuid,
    /// The row the caller inserted, updated or deleted.
    pub row: RowId,
    pub firings: Vec<RuleFiring>,
    /// Audit rows created by delegated rules, committed with the
    /// transaction.
    pub audit_rows: Vec<RowId>,
    pub phases: BTreeMap<RowId, RowPhase>,
}

type Pending = BTreeSet<(u32, AttrRef, i64)>;

/// The single-writer rule engine. `&mut self` on every mutation is
/// the transaction model; there is never more than one in flight.
pub struct Engine {
    book: Arc<RuleBook>,
    store: EntityStore,
    decision: Arc<dyn DecisionFunction>,
    config: EngineConfig,
    sink: Option<Arc<dyn AuditSink>>,
}

impl Engine {
    pub fn new(book: Arc<RuleBook>, decision: Arc<dyn DecisionFunction>, config: EngineConfig) -> Self {
        let store = EntityStore::new(Arc::clone(book.catalog()));
        Engine {
            book,
            store,
            decision,
            config,
            sink: None,
        }
    }

    /// Export committed decision records to this sink.
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[inline]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    #[inline]
    pub fn book(&self) -> &RuleBook {
        &self.book
    }

    /// Deterministic JSON dump of the committed state.
    pub fn state(&self) -> serde_json::Value {
        self.store.to_json()
    }

    // ==================
    // Mutations
    // ==================

    /// Insert a row and settle every derivation it affects.
    pub fn insert(&mut self, entity: &str, values: BTreeMap<String, Value>) -> EngineResult<TxReceipt> {
        self.check_writable(entity)?;
        for attr in values.keys() {
            if self.book.is_derived(entity, attr) {
                return Err(EngineError::DerivedAttribute {
                    entity: entity.to_string(),
                    attr: attr.clone(),
                });
            }
        }
        self.store.begin()?;
        let tx_id = Uuid::new_v4();
        match self.insert_tx(tx_id, entity, values) {
            Ok(receipt) => self.finish(receipt),
            Err(e) => self.abort(tx_id, e),
        }
    }

    /// Apply attribute changes to a row and settle the consequences.
    pub fn update(&mut self, row: &RowId, changes: BTreeMap<String, Value>) -> EngineResult<TxReceipt> {
        self.check_writable(&row.entity)?;
        for attr in changes.keys() {
            if self.book.is_derived(&row.entity, attr) {
                return Err(EngineError::DerivedAttribute {
                    entity: row.entity.clone(),
                    attr: attr.clone(),
                });
            }
        }
        self.store.get(row)?;
        self.store.begin()?;
        let tx_id = Uuid::new_v4();
        match self.update_tx(tx_id, row, changes) {
            Ok(receipt) => self.finish(receipt),
            Err(e) => self.abort(tx_id, e),
        }
    }

    /// Delete a row, cascading per the catalog's delete policies, and
    /// settle the surviving parents' aggregates.
    pub fn delete(&mut self, row: &RowId) -> EngineResult<TxReceipt> {
        self.check_writable(&row.entity)?;
        self.store.get(row)?;
        self.store.begin()?;
        let tx_id = Uuid::new_v4();
        match self.delete_tx(tx_id, row) {
            Ok(receipt) => self.finish(receipt),
            Err(e) => self.abort(tx_id, e),
        }
    }

    fn check_writable(&self, entity: &str) -> EngineResult<()> {
        if self.book.catalog().entity(entity).is_none() {
            return Err(EngineError::UnknownEntity(entity.to_string()));
        }
        if self.book.is_audit_entity(entity) {
            return Err(EngineError::AuditEntityWrite(entity.to_string()));
        }
        Ok(())
    }

    // ==================
    // Transaction bodies
    // ==================

    fn insert_tx(
        &mut self,
        tx_id: Uuid,
        entity: &str,
        values: BTreeMap<String, Value>,
    ) -> EngineResult<TxReceipt> {
        let row = self.store.insert(entity, values)?;
        info!(%tx_id, row = %row, "insert opened");

        let mut pending = Pending::new();
        let mut phases = BTreeMap::new();
        phases.insert(row.clone(), RowPhase::Dirty);

        for attr in self.book.derived_attrs(entity) {
            let target = AttrRef::new(entity, attr);
            pending.insert((self.book.graph().rank(&target), target, row.num));
        }
        let mut attrs: Vec<String> = vec![ID_ATTR.to_string()];
        if let Some(def) = self.book.catalog().entity(entity) {
            attrs.extend(def.attributes().iter().map(|a| a.name.clone()));
        }
        for attr in &attrs {
            self.schedule_dependents(&mut pending, &AttrRef::new(entity, attr), &row)?;
        }

        let (firings, audit_rows) = self.settle(&mut pending, &mut phases)?;
        self.verify()?;
        settle_phases(&mut phases);
        Ok(TxReceipt {
            tx_id,
            row,
            firings,
            audit_rows,
            phases,
        })
    }

    fn update_tx(
        &mut self,
        tx_id: Uuid,
        row: &RowId,
        changes: BTreeMap<String, Value>,
    ) -> EngineResult<TxReceipt> {
        info!(%tx_id, row = %row, changes = changes.len(), "update opened");

        // Parents about to be unlinked must re-aggregate too, so
        // capture them before the foreign keys change.
        let mut old_parents: Vec<(AttrRef, RowId)> = Vec::new();
        if let Some(def) = self.book.catalog().entity(&row.entity) {
            for attr in changes.keys() {
                if let Some(rel) = def.relationship_for_fk(attr) {
                    if let Some(parent) = self.store.parent_of(row, &rel.name)? {
                        old_parents.push((AttrRef::new(&row.entity, attr), parent));
                    }
                }
            }
        }

        let mut pending = Pending::new();
        let mut phases = BTreeMap::new();
        phases.insert(row.clone(), RowPhase::Dirty);

        let mut changed: Vec<String> = Vec::new();
        for (attr, value) in changes {
            if self.store.set(row, &attr, value)? {
                changed.push(attr);
            }
        }
        for attr in &changed {
            let source = AttrRef::new(&row.entity, attr);
            self.schedule_dependents(&mut pending, &source, row)?;
            for (fk, old_parent) in &old_parents {
                if fk == &source {
                    self.schedule_for_parent(&mut pending, &source, old_parent);
                }
            }
        }

        let (firings, audit_rows) = self.settle(&mut pending, &mut phases)?;
        self.verify()?;
        settle_phases(&mut phases);
        Ok(TxReceipt {
            tx_id,
            row: row.clone(),
            firings,
            audit_rows,
            phases,
        })
    }

    fn delete_tx(&mut self, tx_id: Uuid, root: &RowId) -> EngineResult<TxReceipt> {
        info!(%tx_id, row = %root, "delete opened");

        let mut victims: Vec<RowId> = Vec::new();
        let mut doomed: BTreeSet<RowId> = BTreeSet::new();
        self.collect_victims(root, &mut victims, &mut doomed)?;

        // Surviving parents lose these rows' contributions. Read the
        // foreign keys before anything is removed.
        let mut pending = Pending::new();
        let mut phases = BTreeMap::new();
        for victim in &victims {
            let mut attrs: Vec<String> = vec![ID_ATTR.to_string()];
            if let Some(def) = self.book.catalog().entity(&victim.entity) {
                attrs.extend(def.attributes().iter().map(|a| a.name.clone()));
            }
            for attr in &attrs {
                let source = AttrRef::new(&victim.entity, attr);
                for edge in self.book.graph().edges_from(&source) {
                    let Crossing::ToParent { rel } = &edge.crossing else {
                        continue;
                    };
                    let Some(parent) = self.store.parent_of(victim, rel)? else {
                        continue;
                    };
                    if !doomed.contains(&parent) {
                        let rank = self.book.graph().rank(&edge.target);
                        pending.insert((rank, edge.target.clone(), parent.num));
                    }
                }
            }
        }

        for victim in &victims {
            self.store.delete(victim)?;
            debug!(row = %victim, "row removed");
        }

        let (firings, audit_rows) = self.settle(&mut pending, &mut phases)?;
        self.verify()?;
        settle_phases(&mut phases);
        Ok(TxReceipt {
            tx_id,
            row: root.clone(),
            firings,
            audit_rows,
            phases,
        })
    }

    /// Depth-first closure of a delete, children pushed before their
    /// parent so removal can proceed front to back.
    fn collect_victims(
        &self,
        row: &RowId,
        victims: &mut Vec<RowId>,
        doomed: &mut BTreeSet<RowId>,
    ) -> EngineResult<()> {
        if !doomed.insert(row.clone()) {
            return Ok(());
        }
        let child_rels: Vec<(String, String)> = self.book.catalog().children_of(&row.entity).to_vec();
        for (child_entity, rel) in child_rels {
            let children = self.store.children_of(row, &child_entity, &rel);
            if children.is_empty() {
                continue;
            }
            let policy = self
                .book
                .catalog()
                .entity(&child_entity)
                .and_then(|def| def.relationship_named(&rel))
                .map(|r| r.on_delete);
            match policy {
                Some(DeletePolicy::Restrict) => {
                    return Err(EngineError::DeleteRestricted {
                        row: row.clone(),
                        child_entity,
                        rel,
                        count: children.len(),
                    });
                }
                Some(DeletePolicy::Cascade) => {
                    for child in children {
                        self.collect_victims(&child, victims, doomed)?;
                    }
                }
                None => continue,
            }
        }
        victims.push(row.clone());
        Ok(())
    }

    // ==================
    // Settlement
    // ==================

    /// Drain the pending set in ascending (rank, attribute, row)
    /// order. Each (attribute, row) pair computes at most once per
    /// transaction; only writes that change a value propagate.
    fn settle(
        &mut self,
        pending: &mut Pending,
        phases: &mut BTreeMap<RowId, RowPhase>,
    ) -> EngineResult<(Vec<RuleFiring>, Vec<RowId>)> {
        let mut done: BTreeSet<(AttrRef, i64)> = BTreeSet::new();
        let mut firings = Vec::new();
        let mut audit_rows = Vec::new();

        while let Some((rank, target, num)) = pending.pop_first() {
            if !done.insert((target.clone(), num)) {
                continue;
            }
            let row = RowId::new(&target.entity, num);
            if !self.store.row_exists(&row) {
                continue;
            }
            let Some(rule) = self.book.rule(&target) else {
                continue;
            };
            phases.insert(row.clone(), RowPhase::Evaluating);

            let derived = {
                let mut computer = ValueComputer::new(
                    &mut self.store,
                    self.book.as_ref(),
                    self.decision.as_ref(),
                    &self.config,
                );
                computer.derive(rule, &row)?
            };
            if let Some(record) = &derived.audit_row {
                audit_rows.push(record.clone());
            }

            let old = self.store.value(&row, &target.attr)?;
            let changed = self.store.set(&row, &target.attr, derived.value.clone())?;
            debug!(
                attribute = %target,
                row = %row,
                old = %old,
                new = %derived.value,
                changed,
                "rule fired"
            );
            firings.push(RuleFiring {
                depth: rank,
                row: row.clone(),
                attribute: target.attr.clone(),
                rule_kind: rule.derivation.kind(),
                old,
                new: derived.value,
                rationale: derived.rationale,
            });
            if changed {
                self.schedule_dependents(pending, &target, &row)?;
            }
            phases.insert(row, RowPhase::Settled);
        }
        Ok((firings, audit_rows))
    }

    fn schedule_dependents(
        &self,
        pending: &mut Pending,
        source: &AttrRef,
        row: &RowId,
    ) -> EngineResult<()> {
        for edge in self.book.graph().edges_from(source) {
            let rank = self.book.graph().rank(&edge.target);
            match &edge.crossing {
                Crossing::Local => {
                    pending.insert((rank, edge.target.clone(), row.num));
                }
                Crossing::ToParent { rel } => {
                    if let Some(parent) = self.store.parent_of(row, rel)? {
                        pending.insert((rank, edge.target.clone(), parent.num));
                    }
                }
                Crossing::ToChildren { child_entity, rel } => {
                    for child in self.store.children_of(row, child_entity, rel) {
                        pending.insert((rank, edge.target.clone(), child.num));
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-aggregate a specific parent row after its child was moved
    /// away. Only parent-crossing edges apply.
    fn schedule_for_parent(&self, pending: &mut Pending, source: &AttrRef, parent: &RowId) {
        for edge in self.book.graph().edges_from(source) {
            if matches!(edge.crossing, Crossing::ToParent { .. }) {
                let rank = self.book.graph().rank(&edge.target);
                pending.insert((rank, edge.target.clone(), parent.num));
            }
        }
    }

    /// Post-settlement checks: required attributes are non-null and
    /// every constraint holds on every touched row.
    fn verify(&self) -> EngineResult<()> {
        let touched: Vec<RowId> = self.store.touched().to_vec();
        for row in &touched {
            if !self.store.row_exists(row) {
                continue;
            }
            let Some(def) = self.book.catalog().entity(&row.entity) else {
                continue;
            };
            for attr in def.attributes() {
                if attr.required && self.store.value(row, &attr.name)?.is_null() {
                    return Err(EngineError::MissingRequired {
                        row: row.clone(),
                        attr: attr.name.clone(),
                    });
                }
            }
            for constraint in self.book.constraints_for(&row.entity) {
                let view = StoreRowView::new(&self.store, row);
                if !constraint.condition.eval_bool(&view)? {
                    let message = constraint.render(|attr| self.store.value(row, attr).ok());
                    warn!(constraint = %constraint.name, row = %row, "constraint rejected transaction");
                    return Err(EngineError::Constraint {
                        name: constraint.name.clone(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    // ==================
    // Commit / rollback
    // ==================

    fn finish(&mut self, receipt: TxReceipt) -> EngineResult<TxReceipt> {
        let records: Vec<DecisionRecord> = receipt
            .audit_rows
            .iter()
            .filter_map(|row| {
                self.store
                    .get(row)
                    .ok()
                    .map(|r| DecisionRecord::new(receipt.tx_id, &row.entity, row.num, r.to_json()))
            })
            .collect();
        let summary = self.store.commit()?;
        if let Some(sink) = &self.sink {
            for record in &records {
                if let Err(e) = sink.append(record) {
                    warn!(error = %e, "audit export failed");
                }
            }
        }
        info!(
            tx_id = %receipt.tx_id,
            rows_touched = summary.touched.len(),
            rows_created = summary.created.len(),
            firings = receipt.firings.len(),
            audit_rows = receipt.audit_rows.len(),
            "transaction committed"
        );
        Ok(receipt)
    }

    fn abort(&mut self, tx_id: Uuid, e: EngineError) -> EngineResult<TxReceipt> {
        if let Err(rollback_err) = self.store.rollback() {
            error!(%tx_id, error = %rollback_err, "rollback failed");
        }
        info!(%tx_id, error = %e, "transaction rejected");
        Err(e)
    }
}

fn settle_phases(phases: &mut BTreeMap<RowId, RowPhase>) {
    for phase in phases.values_mut() {
        *phase = RowPhase::Settled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::UnavailableDecision;
    use crate::model::{AttributeDef, CatalogBuilder, EntityDef, Relationship, ValueType};
    use crate::rules::{Expr, RuleBookBuilder};

    fn engine() -> Engine {
        let customer = EntityDef::new("customer")
            .attr(AttributeDef::required("name", ValueType::Str))
            .attr(AttributeDef::optional("balance", ValueType::Float))
            .attr(AttributeDef::required("credit_limit", ValueType::Float));
        let order = EntityDef::new("order")
            .attr(AttributeDef::required("customer_id", ValueType::Int))
            .attr(AttributeDef::optional("amount_total", ValueType::Float))
            .relationship(
                Relationship::new("customer", "customer", "customer_id", "orders")
                    .on_delete(DeletePolicy::Cascade),
            );
        let item = EntityDef::new("item")
            .attr(AttributeDef::required("order_id", ValueType::Int))
            .attr(AttributeDef::required("quantity", ValueType::Int))
            .attr(AttributeDef::optional("unit_price", ValueType::Float))
            .attr(AttributeDef::optional("amount", ValueType::Float))
            .relationship(
                Relationship::new("order", "order", "order_id", "items")
                    .on_delete(DeletePolicy::Cascade),
            );
        let catalog = Arc::new(
            CatalogBuilder::new()
                .entity(customer)
                .entity(order)
                .entity(item)
                .build()
                .unwrap(),
        );
        let book = Arc::new(
            RuleBookBuilder::new()
                .sum("customer", "balance", "orders", "amount_total")
                .sum("order", "amount_total", "items", "amount")
                .formula(
                    "item",
                    "amount",
                    Expr::attr("quantity").mul(Expr::attr("unit_price").coalesce(Expr::float(0.0))),
                )
                .constraint(
                    "customer",
                    "credit_limit",
                    Expr::attr("balance")
                        .is_null()
                        .or(Expr::attr("balance").le(Expr::attr("credit_limit"))),
                    "Customer balance ({balance}) exceeds credit limit ({credit_limit})",
                )
                .build(&catalog)
                .unwrap(),
        );
        Engine::new(book, Arc::new(UnavailableDecision), EngineConfig::default())
    }

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn seed(engine: &mut Engine) -> (RowId, RowId) {
        let customer = engine
            .insert(
                "customer",
                values(&[
                    ("name", Value::Str("Alice".into())),
                    ("credit_limit", Value::Float(1000.0)),
                ]),
            )
            .unwrap()
            .row;
        let order = engine
            .insert("order", values(&[("customer_id", Value::Int(customer.num))]))
            .unwrap()
            .row;
        (customer, order)
    }

    #[test]
    fn test_insert_cascades_to_ancestors() {
        let mut engine = engine();
        let (customer, order) = seed(&mut engine);

        let receipt = engine
            .insert(
                "item",
                values(&[
                    ("order_id", Value::Int(order.num)),
                    ("quantity", Value::Int(5)),
                    ("unit_price", Value::Float(100.0)),
                ]),
            )
            .unwrap();

        let store = engine.store();
        assert_eq!(store.value(&receipt.row, "amount").unwrap(), Value::Float(500.0));
        assert_eq!(store.value(&order, "amount_total").unwrap(), Value::Float(500.0));
        assert_eq!(store.value(&customer, "balance").unwrap(), Value::Float(500.0));

        // depth order is ascending and each attribute fired once
        let depths: Vec<u32> = receipt.firings.iter().map(|f| f.depth).collect();
        let mut sorted = depths.clone();
        sorted.sort();
        assert_eq!(depths, sorted);
        assert!(receipt.phases.values().all(|p| *p == RowPhase::Settled));
    }

    #[test]
    fn test_constraint_rejection_restores_prior_state() {
        let mut engine = engine();
        let (_, order) = seed(&mut engine);
        engine
            .insert(
                "item",
                values(&[
                    ("order_id", Value::Int(order.num)),
                    ("quantity", Value::Int(5)),
                    ("unit_price", Value::Float(100.0)),
                ]),
            )
            .unwrap();
        let before = engine.state();

        let err = engine
            .insert(
                "item",
                values(&[
                    ("order_id", Value::Int(order.num)),
                    ("quantity", Value::Int(6)),
                    ("unit_price", Value::Float(100.0)),
                ]),
            )
            .unwrap_err();

        assert_eq!(err.constraint_name(), Some("credit_limit"));
        assert_eq!(
            err.to_string(),
            "Customer balance (1100) exceeds credit limit (1000)"
        );
        assert_eq!(engine.state(), before);
    }

    #[test]
    fn test_unchanged_write_prunes_propagation() {
        let mut engine = engine();
        let (_, order) = seed(&mut engine);
        let item = engine
            .insert(
                "item",
                values(&[
                    ("order_id", Value::Int(order.num)),
                    ("quantity", Value::Int(5)),
                    ("unit_price", Value::Float(100.0)),
                ]),
            )
            .unwrap()
            .row;

        let receipt = engine
            .update(&item, values(&[("quantity", Value::Int(5))]))
            .unwrap();
        assert!(receipt.firings.is_empty());
    }

    #[test]
    fn test_reparenting_recomputes_both_parents() {
        let mut engine = engine();
        let (_, first) = seed(&mut engine);
        let customer = engine.store().rows("customer").unwrap()[0].clone();
        let second = engine
            .insert("order", values(&[("customer_id", Value::Int(customer.num))]))
            .unwrap()
            .row;
        let item = engine
            .insert(
                "item",
                values(&[
                    ("order_id", Value::Int(first.num)),
                    ("quantity", Value::Int(2)),
                    ("unit_price", Value::Float(10.0)),
                ]),
            )
            .unwrap()
            .row;

        engine
            .update(&item, values(&[("order_id", Value::Int(second.num))]))
            .unwrap();

        let store = engine.store();
        assert_eq!(store.value(&first, "amount_total").unwrap(), Value::Float(0.0));
        assert_eq!(store.value(&second, "amount_total").unwrap(), Value::Float(20.0));
    }

    #[test]
    fn test_copy_tracks_the_parent_value() {
        let region = EntityDef::new("region")
            .attr(AttributeDef::required("name", ValueType::Str))
            .attr(AttributeDef::required("tax_rate", ValueType::Float));
        let shop = EntityDef::new("shop")
            .attr(AttributeDef::required("region_id", ValueType::Int))
            .attr(AttributeDef::optional("tax_rate", ValueType::Float))
            .relationship(Relationship::new("region", "region", "region_id", "shops"));
        let catalog = Arc::new(
            CatalogBuilder::new()
                .entity(region)
                .entity(shop)
                .build()
                .unwrap(),
        );
        let book = Arc::new(
            RuleBookBuilder::new()
                .copy("shop", "tax_rate", "region", "tax_rate")
                .build(&catalog)
                .unwrap(),
        );
        let mut engine = Engine::new(book, Arc::new(UnavailableDecision), EngineConfig::default());

        let region = engine
            .insert(
                "region",
                values(&[
                    ("name", Value::Str("west".into())),
                    ("tax_rate", Value::Float(0.07)),
                ]),
            )
            .unwrap()
            .row;
        let shop = engine
            .insert("shop", values(&[("region_id", Value::Int(region.num))]))
            .unwrap()
            .row;
        assert_eq!(engine.store().value(&shop, "tax_rate").unwrap(), Value::Float(0.07));

        engine
            .update(&region, values(&[("tax_rate", Value::Float(0.09))]))
            .unwrap();
        assert_eq!(engine.store().value(&shop, "tax_rate").unwrap(), Value::Float(0.09));
    }

    #[test]
    fn test_delete_cascades_and_reaggregates() {
        let mut engine = engine();
        let (customer, order) = seed(&mut engine);
        engine
            .insert(
                "item",
                values(&[
                    ("order_id", Value::Int(order.num)),
                    ("quantity", Value::Int(5)),
                    ("unit_price", Value::Float(100.0)),
                ]),
            )
            .unwrap();

        engine.delete(&order).unwrap();

        let store = engine.store();
        assert!(!store.row_exists(&order));
        assert!(store.rows("item").unwrap().is_empty());
        assert_eq!(store.value(&customer, "balance").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn test_writes_to_derived_attributes_rejected() {
        let mut engine = engine();
        let (_, order) = seed(&mut engine);
        let err = engine
            .update(&order, values(&[("amount_total", Value::Float(9.0))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::DerivedAttribute { .. }));
    }

    #[test]
    fn test_missing_required_attribute_rejected_after_settlement() {
        let mut engine = engine();
        let err = engine
            .insert("customer", values(&[("name", Value::Str("Bob".into()))]))
            .unwrap_err();
        assert!(
            matches!(&err, EngineError::MissingRequired { attr, .. } if attr == "credit_limit")
        );
    }
}
