//! Delegated Selection and Fallback Tests
//!
//! Delegated rules call the decision function up to 1 + retries
//! times, treat out-of-range answers as invalid responses, and then
//! fall back to the declared deterministic policy. Unavailable
//! backends short-circuit the retry loop. When not even the fallback
//! can choose, the transaction fails whole.

use std::collections::BTreeMap;
use std::sync::Arc;

use rulecast::config::EngineConfig;
use rulecast::decision::{DecisionError, DecisionFunction, ScriptedDecision};
use rulecast::demo::{self, SeedRows};
use rulecast::engine::{Engine, EngineError, TxReceipt};
use rulecast::model::{
    AttributeDef, Catalog, CatalogBuilder, EntityDef, Relationship, Value, ValueType,
};
use rulecast::rules::{AiValueDecl, RuleBookBuilder};

// =============================================================================
// Helper Functions
// =============================================================================

fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn demo_engine(decision: Arc<dyn DecisionFunction>, config: EngineConfig) -> (Engine, SeedRows) {
    let catalog = demo::catalog().unwrap();
    let book = demo::rule_book(&catalog).unwrap();
    let mut engine = Engine::new(book, decision, config);
    let rows = demo::seed(&mut engine).unwrap();
    (engine, rows)
}

fn widget_item(engine: &mut Engine, rows: &SeedRows) -> Result<TxReceipt, EngineError> {
    engine.insert(
        "item",
        values(&[
            ("order_id", Value::Int(rows.order.num)),
            ("product_id", Value::Int(rows.widget.num)),
            ("quantity", Value::Int(1)),
        ]),
    )
}

fn price_rationale(receipt: &TxReceipt) -> &str {
    receipt
        .firings
        .iter()
        .find(|f| f.attribute == "unit_price")
        .and_then(|f| f.rationale.as_deref())
        .expect("delegated firing must carry a rationale")
}

/// Minimal item/product/offer world for bespoke fallback policies.
/// `unit_cost` is optional so tests can seed unorderable candidates.
fn offer_catalog() -> Arc<Catalog> {
    let item = EntityDef::new("item")
        .attr(AttributeDef::required("product_id", ValueType::Int))
        .attr(AttributeDef::optional("unit_price", ValueType::Float))
        .relationship(Relationship::new("product", "product", "product_id", "items"));
    let product = EntityDef::new("product")
        .attr(AttributeDef::required("name", ValueType::Str));
    let offer = EntityDef::new("offer")
        .attr(AttributeDef::required("product_id", ValueType::Int))
        .attr(AttributeDef::optional("unit_cost", ValueType::Float))
        .relationship(Relationship::new("product", "product", "product_id", "offers"));
    let audit = EntityDef::new("price_choice")
        .attr(AttributeDef::optional("item_id", ValueType::Int))
        .attr(AttributeDef::optional("chosen_id", ValueType::Int))
        .attr(AttributeDef::optional("chosen_unit_cost", ValueType::Float))
        .attr(AttributeDef::optional("request", ValueType::Str))
        .attr(AttributeDef::optional("reason", ValueType::Str))
        .attr(AttributeDef::optional("created_on", ValueType::Timestamp))
        .relationship(Relationship::new("item", "item", "item_id", "price_choices"));
    Arc::new(
        CatalogBuilder::new()
            .entity(item)
            .entity(product)
            .entity(offer)
            .entity(audit)
            .build()
            .unwrap(),
    )
}

/// Engine over the bespoke catalog with the given fallback spec,
/// seeded with one product and its offers.
fn offer_engine(fallback: &str, costs: &[Value]) -> (Engine, i64) {
    let catalog = offer_catalog();
    let book = Arc::new(
        RuleBookBuilder::new()
            .ai_value(
                "item",
                "unit_price",
                AiValueDecl::new(&["product", "offers"], "unit_cost", "price_choice")
                    .optimize_for("cheapest acceptable offer")
                    .fallback(fallback),
            )
            .build(&catalog)
            .unwrap(),
    );
    let mut engine = Engine::new(
        book,
        Arc::new(ScriptedDecision::new()),
        EngineConfig::default(),
    );
    let product = engine
        .insert("product", values(&[("name", Value::Str("widget".into()))]))
        .unwrap()
        .row;
    for cost in costs {
        engine
            .insert(
                "offer",
                values(&[("product_id", Value::Int(product.num)), ("unit_cost", cost.clone())]),
            )
            .unwrap();
    }
    (engine, product.num)
}

// =============================================================================
// Successful Delegation
// =============================================================================

/// The chosen index and reason flow into the value, the firing trace
/// and the audit row.
#[test]
fn test_chosen_candidate_becomes_the_value() {
    let script = ScriptedDecision::new().push_choice(1, "prefer the shorter lead time");
    let (mut engine, rows) = demo_engine(Arc::new(script.clone()), EngineConfig::default());

    let receipt = widget_item(&mut engine, &rows).unwrap();

    assert_eq!(script.calls(), 1);
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(205.0)
    );
    assert_eq!(price_rationale(&receipt), "prefer the shorter lead time");

    let choice = engine.store().rows("supplier_choice").unwrap()[0].clone();
    assert_eq!(
        engine.store().value(&choice, "chosen_supplier_id").unwrap(),
        Value::Int(rows.zenith.num)
    );
    assert_eq!(
        engine.store().value(&choice, "reason").unwrap(),
        Value::Str("prefer the shorter lead time".into())
    );
}

/// One transient failure followed by a success is invisible in the
/// result: two calls, the successful answer, no fallback.
#[test]
fn test_transient_failure_retries_invisibly() {
    let script = ScriptedDecision::new()
        .push_failure(DecisionError::Api("HTTP 503".into()))
        .push_choice(0, "cheapest wins");
    let (mut engine, rows) = demo_engine(Arc::new(script.clone()), EngineConfig::default());

    let receipt = widget_item(&mut engine, &rows).unwrap();

    assert_eq!(script.calls(), 2);
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(105.0)
    );
    assert_eq!(price_rationale(&receipt), "cheapest wins");
    // One delegation, one audit row, regardless of attempts.
    assert_eq!(receipt.audit_rows.len(), 1);
}

/// An out-of-range index is an invalid response: retried, then the
/// valid answer is used.
#[test]
fn test_out_of_range_index_retries() {
    let script = ScriptedDecision::new()
        .push_choice(7, "no such candidate")
        .push_choice(1, "second offer after all");
    let (mut engine, rows) = demo_engine(Arc::new(script.clone()), EngineConfig::default());

    let receipt = widget_item(&mut engine, &rows).unwrap();

    assert_eq!(script.calls(), 2);
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(205.0)
    );
}

// =============================================================================
// Fallback Paths
// =============================================================================

/// Exhausted retries fall back to the declared policy, with the
/// failure recorded in the rationale.
#[test]
fn test_exhausted_retries_fall_back_to_policy() {
    let script = ScriptedDecision::new()
        .push_failure(DecisionError::Api("HTTP 500".into()))
        .push_failure(DecisionError::Api("HTTP 500".into()));
    let (mut engine, rows) = demo_engine(Arc::new(script.clone()), EngineConfig::default());

    let receipt = widget_item(&mut engine, &rows).unwrap();

    assert_eq!(script.calls(), 2);
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(105.0)
    );
    let rationale = price_rationale(&receipt);
    assert!(rationale.starts_with("Fallback:"), "got: {}", rationale);
    assert!(rationale.contains("min:unit_cost"), "got: {}", rationale);
}

/// An unavailable backend is not retried.
#[test]
fn test_unavailable_backend_short_circuits_retries() {
    let script = ScriptedDecision::new();
    let (mut engine, rows) = demo_engine(Arc::new(script.clone()), EngineConfig::default());

    let receipt = widget_item(&mut engine, &rows).unwrap();

    assert_eq!(script.calls(), 1);
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(105.0)
    );
}

/// decision_retries = 0 means a single attempt even for transient
/// failures.
#[test]
fn test_zero_retries_goes_straight_to_fallback() {
    let script = ScriptedDecision::new().push_failure(DecisionError::Api("HTTP 500".into()));
    let config = EngineConfig {
        decision_retries: 0,
        ..EngineConfig::default()
    };
    let (mut engine, rows) = demo_engine(Arc::new(script.clone()), config);

    widget_item(&mut engine, &rows).unwrap();
    assert_eq!(script.calls(), 1);
}

// =============================================================================
// Fallback Policies
// =============================================================================

/// max orders by the field and keeps the largest.
#[test]
fn test_max_policy_picks_largest() {
    let (mut engine, product) = offer_engine(
        "max:unit_cost",
        &[Value::Float(7.0), Value::Float(9.0), Value::Float(8.0)],
    );
    let receipt = engine
        .insert("item", values(&[("product_id", Value::Int(product))]))
        .unwrap();
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(9.0)
    );
}

/// min skips null fields and keeps the earliest on ties.
#[test]
fn test_min_policy_skips_nulls_and_keeps_earliest_tie() {
    let (mut engine, product) = offer_engine(
        "min:unit_cost",
        &[Value::Null, Value::Float(7.0), Value::Float(7.0)],
    );
    let receipt = engine
        .insert("item", values(&[("product_id", Value::Int(product))]))
        .unwrap();

    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(7.0)
    );
    // Earliest of the tied offers wins: offer#2, not offer#3.
    let choice = engine.store().rows("price_choice").unwrap()[0].clone();
    assert_eq!(
        engine.store().value(&choice, "chosen_id").unwrap(),
        Value::Int(2)
    );
}

/// first ignores fields entirely and keeps the lowest row id.
#[test]
fn test_first_policy_picks_lowest_row_id() {
    let (mut engine, product) = offer_engine(
        "first",
        &[Value::Float(9.0), Value::Float(7.0)],
    );
    let receipt = engine
        .insert("item", values(&[("product_id", Value::Int(product))]))
        .unwrap();
    assert_eq!(
        engine.store().value(&receipt.row, "unit_price").unwrap(),
        Value::Float(9.0)
    );
}

// =============================================================================
// Delegation Failure
// =============================================================================

/// When every candidate is unorderable, not even the fallback can
/// choose, and the transaction fails whole.
#[test]
fn test_all_null_candidates_fail_the_transaction() {
    let (mut engine, product) = offer_engine("min:unit_cost", &[Value::Null, Value::Null]);
    let before = engine.state();

    let err = engine
        .insert("item", values(&[("product_id", Value::Int(product))]))
        .unwrap_err();

    assert!(matches!(err, EngineError::DelegationFailed { .. }));
    assert!(err.is_rejection());
    assert_eq!(engine.state(), before);
    assert!(engine.store().rows("price_choice").unwrap().is_empty());
}

/// A product with no offers at all cannot settle a delegated item.
#[test]
fn test_empty_candidate_list_fails_the_transaction() {
    let (mut engine, product) = offer_engine("min:unit_cost", &[]);

    let err = engine
        .insert("item", values(&[("product_id", Value::Int(product))]))
        .unwrap_err();
    assert!(matches!(err, EngineError::DelegationFailed { .. }));
}
