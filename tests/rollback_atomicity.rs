//! Transaction Atomicity Tests
//!
//! A rejected transaction must leave nothing behind: no row changes,
//! no consumed ids, no audit rows, no sink exports. A committed one
//! must export its audit records exactly once, and a failing export
//! must never un-commit the transaction.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use rulecast::audit::{AuditSink, DecisionRecord, MemoryAuditSink};
use rulecast::config::EngineConfig;
use rulecast::decision::UnavailableDecision;
use rulecast::demo::{self, SeedRows};
use rulecast::engine::{Engine, EngineError};
use rulecast::model::Value;

// =============================================================================
// Helper Functions
// =============================================================================

fn engine_with_sink() -> (Engine, Arc<MemoryAuditSink>) {
    let catalog = demo::catalog().unwrap();
    let book = demo::rule_book(&catalog).unwrap();
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = Engine::new(book, Arc::new(UnavailableDecision), EngineConfig::default())
        .with_sink(sink.clone());
    (engine, sink)
}

fn seeded() -> (Engine, Arc<MemoryAuditSink>, SeedRows) {
    let (mut engine, sink) = engine_with_sink();
    let rows = demo::seed(&mut engine).unwrap();
    (engine, sink, rows)
}

fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn item_values(rows: &SeedRows, product: i64, quantity: i64) -> BTreeMap<String, Value> {
    values(&[
        ("order_id", Value::Int(rows.order.num)),
        ("product_id", Value::Int(product)),
        ("quantity", Value::Int(quantity)),
    ])
}

/// Sink that always fails its appends.
struct BrokenSink;

impl AuditSink for BrokenSink {
    fn append(&self, _record: &DecisionRecord) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "export target gone"))
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Constraint Rejection
// =============================================================================

/// An over-limit insert is rejected with the rendered message and
/// rolls the store back to the exact prior state.
#[test]
fn test_constraint_rejection_rolls_back_whole() {
    let (mut engine, _sink, rows) = seeded();
    engine.insert("item", item_values(&rows, rows.widget.num, 5)).unwrap();
    let before = engine.state();

    let err = engine
        .insert("item", item_values(&rows, rows.widget.num, 10))
        .unwrap_err();

    assert_eq!(err.constraint_name(), Some("credit_limit"));
    assert_eq!(
        err.to_string(),
        "Customer balance (1575) exceeds credit limit (1000)"
    );
    assert!(err.is_rejection());
    assert_eq!(engine.state(), before);
}

/// Row ids consumed by a rejected transaction are reissued.
#[test]
fn test_rejected_transaction_releases_row_ids() {
    let (mut engine, _sink, rows) = seeded();
    engine.insert("item", item_values(&rows, rows.widget.num, 5)).unwrap();

    engine
        .insert("item", item_values(&rows, rows.widget.num, 10))
        .unwrap_err();
    let receipt = engine
        .insert("item", item_values(&rows, rows.gadget.num, 1))
        .unwrap();

    // The failed insert would have been item#2; the next success is.
    assert_eq!(receipt.row.num, 2);
}

/// A rejected transaction leaves no audit rows and exports nothing.
#[test]
fn test_rejected_transaction_exports_nothing() {
    let (mut engine, sink, rows) = seeded();

    engine
        .insert("item", item_values(&rows, rows.widget.num, 100))
        .unwrap_err();

    assert!(engine.store().rows("supplier_choice").unwrap().is_empty());
    assert!(sink.is_empty());
}

/// Required attributes must be non-null once derivations settle.
#[test]
fn test_missing_required_attribute_rejects_insert() {
    let (mut engine, _sink, _rows) = seeded();
    let before = engine.state();

    let err = engine
        .insert("customer", values(&[("name", Value::Str("Bob".into()))]))
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::MissingRequired { ref attr, .. } if attr == "credit_limit"
    ));
    assert_eq!(engine.state(), before);
}

// =============================================================================
// Write Validation
// =============================================================================

/// Audit entities reject caller writes entirely.
#[test]
fn test_audit_entity_rejects_caller_writes() {
    let (mut engine, _sink, rows) = seeded();
    let item = engine
        .insert("item", item_values(&rows, rows.widget.num, 1))
        .unwrap()
        .row;
    let choice = engine.store().rows("supplier_choice").unwrap()[0].clone();

    let err = engine
        .insert("supplier_choice", values(&[("reason", Value::Str("tampered".into()))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::AuditEntityWrite(_)));

    let err = engine
        .update(&choice, values(&[("reason", Value::Str("tampered".into()))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::AuditEntityWrite(_)));

    let err = engine.delete(&choice).unwrap_err();
    assert!(matches!(err, EngineError::AuditEntityWrite(_)));

    // The item itself is still mutable.
    engine.update(&item, values(&[("quantity", Value::Int(2))])).unwrap();
}

/// Derived attributes reject direct caller writes.
#[test]
fn test_derived_attribute_rejects_caller_writes() {
    let (mut engine, _sink, rows) = seeded();

    let err = engine
        .update(&rows.alice, values(&[("balance", Value::Float(0.0))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::DerivedAttribute { .. }));
}

// =============================================================================
// Export Semantics
// =============================================================================

/// Committed audit rows are exported exactly once, with the full
/// row payload.
#[test]
fn test_committed_audit_rows_export_once() {
    let (mut engine, sink, rows) = seeded();

    let receipt = engine
        .insert("item", item_values(&rows, rows.widget.num, 5))
        .unwrap();

    assert_eq!(receipt.audit_rows.len(), 1);
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tx_id, receipt.tx_id);
    assert_eq!(records[0].entity, "supplier_choice");
    assert_eq!(records[0].fields["chosen_unit_cost"], 105.0);
    assert_eq!(records[0].fields["item_id"], receipt.row.num);

    // A second, guard-skipped insert exports nothing new.
    engine
        .insert("item", item_values(&rows, rows.gadget.num, 2))
        .unwrap();
    assert_eq!(sink.len(), 1);
}

/// A failing sink logs the loss but never un-commits the transaction.
#[test]
fn test_sink_failure_does_not_fail_transaction() {
    let catalog = demo::catalog().unwrap();
    let book = demo::rule_book(&catalog).unwrap();
    let mut engine = Engine::new(book, Arc::new(UnavailableDecision), EngineConfig::default())
        .with_sink(Arc::new(BrokenSink));
    let rows = demo::seed(&mut engine).unwrap();

    let receipt = engine
        .insert("item", item_values(&rows, rows.widget.num, 5))
        .unwrap();

    assert_eq!(receipt.audit_rows.len(), 1);
    let store = engine.store();
    assert!(store.row_exists(&receipt.row));
    assert_eq!(store.rows("supplier_choice").unwrap().len(), 1);
}
