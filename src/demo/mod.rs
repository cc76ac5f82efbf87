//! Check-credit demo model.
//!
//! The classic ordering domain: customers place orders, orders carry
//! items, items reference products, and products are offered by
//! suppliers at different costs and lead times. Five derivations chain
//! from item quantity up to customer balance, a credit-limit
//! constraint guards the top, and item unit price is delegated to a
//! decision function choosing among supplier offers (with a
//! min-unit-cost fallback when no backend answers).
//!
//! Used by the `demo` CLI subcommand and the end-to-end tests.

use std::sync::Arc;

use crate::engine::{Engine, EngineResult};
use crate::model::{
    AttributeDef, Catalog, CatalogBuilder, DeletePolicy, EntityDef, ModelResult, Relationship,
    Value, ValueType,
};
use crate::rules::{AiValueDecl, Expr, RegistrationResult, RuleBook, RuleBookBuilder};
use crate::store::RowId;

/// Selection criteria handed to the decision function for supplier
/// choice.
pub const SUPPLIER_CRITERIA: &str =
    "lowest overall cost of ownership, balancing unit cost against lead time under the stated conditions";

/// The demo catalog: six business entities plus the `supplier_choice`
/// audit entity.
pub fn catalog() -> ModelResult<Arc<Catalog>> {
    let customer = EntityDef::new("customer")
        .attr(AttributeDef::required("name", ValueType::Str))
        .attr(AttributeDef::optional("balance", ValueType::Float))
        .attr(AttributeDef::required("credit_limit", ValueType::Float));

    let order = EntityDef::new("order")
        .attr(AttributeDef::required("customer_id", ValueType::Int))
        .attr(AttributeDef::optional("date_shipped", ValueType::Timestamp))
        .attr(AttributeDef::optional("amount_total", ValueType::Float))
        .relationship(
            Relationship::new("customer", "customer", "customer_id", "orders")
                .on_delete(DeletePolicy::Cascade),
        );

    let item = EntityDef::new("item")
        .attr(AttributeDef::required("order_id", ValueType::Int))
        .attr(AttributeDef::required("product_id", ValueType::Int))
        .attr(AttributeDef::required("quantity", ValueType::Int))
        .attr(AttributeDef::optional("unit_price", ValueType::Float))
        .attr(AttributeDef::optional("amount", ValueType::Float))
        .relationship(
            Relationship::new("order", "order", "order_id", "items")
                .on_delete(DeletePolicy::Cascade),
        )
        .relationship(Relationship::new("product", "product", "product_id", "items"));

    let product = EntityDef::new("product")
        .attr(AttributeDef::required("name", ValueType::Str))
        .attr(AttributeDef::required("unit_price", ValueType::Float))
        .attr(AttributeDef::optional("supplier_count", ValueType::Int));

    let supplier = EntityDef::new("supplier")
        .attr(AttributeDef::required("name", ValueType::Str))
        .attr(AttributeDef::optional("region", ValueType::Str));

    let product_supplier = EntityDef::new("product_supplier")
        .attr(AttributeDef::required("product_id", ValueType::Int))
        .attr(AttributeDef::required("supplier_id", ValueType::Int))
        .attr(AttributeDef::required("unit_cost", ValueType::Float))
        .attr(AttributeDef::optional("lead_time_days", ValueType::Int))
        .relationship(
            Relationship::new("product", "product", "product_id", "product_suppliers")
                .on_delete(DeletePolicy::Cascade),
        )
        .relationship(
            Relationship::new("supplier", "supplier", "supplier_id", "offers")
                .on_delete(DeletePolicy::Cascade),
        );

    // One record per delegated unit-price selection. Audit rows follow
    // their context rows on delete.
    let supplier_choice = EntityDef::new("supplier_choice")
        .attr(AttributeDef::optional("item_id", ValueType::Int))
        .attr(AttributeDef::optional("product_id", ValueType::Int))
        .attr(AttributeDef::optional("chosen_supplier_id", ValueType::Int))
        .attr(AttributeDef::optional("chosen_unit_cost", ValueType::Float))
        .attr(AttributeDef::optional("request", ValueType::Str))
        .attr(AttributeDef::optional("reason", ValueType::Str))
        .attr(AttributeDef::optional("created_on", ValueType::Timestamp))
        .relationship(
            Relationship::new("item", "item", "item_id", "supplier_choices")
                .on_delete(DeletePolicy::Cascade),
        )
        .relationship(
            Relationship::new("product", "product", "product_id", "supplier_choices")
                .on_delete(DeletePolicy::Cascade),
        )
        .relationship(
            Relationship::new("supplier", "supplier", "chosen_supplier_id", "choices")
                .on_delete(DeletePolicy::Cascade),
        );

    let catalog = CatalogBuilder::new()
        .entity(customer)
        .entity(order)
        .entity(item)
        .entity(product)
        .entity(supplier)
        .entity(product_supplier)
        .entity(supplier_choice)
        .build()?;
    Ok(Arc::new(catalog))
}

/// The demo rule set.
///
/// Balance sums unshipped order totals, order totals sum item amounts,
/// item amount multiplies quantity by unit price, supplier count
/// counts offers, and unit price is delegated across the product's
/// offers when any exist.
pub fn rule_book(catalog: &Arc<Catalog>) -> RegistrationResult<Arc<RuleBook>> {
    let book = RuleBookBuilder::new()
        .constraint(
            "customer",
            "credit_limit",
            Expr::attr("balance")
                .is_null()
                .or(Expr::attr("balance").le(Expr::attr("credit_limit"))),
            "Customer balance ({balance}) exceeds credit limit ({credit_limit})",
        )
        .sum_where(
            "customer",
            "balance",
            "orders",
            "amount_total",
            Expr::attr("date_shipped").is_null(),
        )
        .sum("order", "amount_total", "items", "amount")
        .formula(
            "item",
            "amount",
            Expr::attr("quantity").mul(Expr::attr("unit_price").coalesce(Expr::float(0.0))),
        )
        .count("product", "supplier_count", "product_suppliers")
        .ai_value(
            "item",
            "unit_price",
            AiValueDecl::new(&["product", "product_suppliers"], "unit_cost", "supplier_choice")
                .optimize_for(SUPPLIER_CRITERIA)
                .fallback("min:unit_cost")
                .when(
                    Expr::parent("product", "supplier_count")
                        .coalesce(Expr::int(0))
                        .gt(Expr::int(0)),
                    Expr::parent("product", "unit_price"),
                ),
        )
        .build(catalog)?;
    Ok(Arc::new(book))
}

/// Rows created by [`seed`], for use in scenario steps.
#[derive(Debug, Clone)]
pub struct SeedRows {
    pub alice: RowId,
    pub order: RowId,
    pub widget: RowId,
    pub gadget: RowId,
    pub acme: RowId,
    pub zenith: RowId,
}

/// Seed the demo world: two suppliers, two products (one with two
/// offers, one with none), a customer and an open order.
pub fn seed(engine: &mut Engine) -> EngineResult<SeedRows> {
    let acme = insert(
        engine,
        "supplier",
        &[("name", Value::Str("Acme Logistics".into())), ("region", Value::Str("west".into()))],
    )?;
    let zenith = insert(
        engine,
        "supplier",
        &[("name", Value::Str("Zenith Freight".into())), ("region", Value::Str("east".into()))],
    )?;

    let widget = insert(
        engine,
        "product",
        &[("name", Value::Str("widget".into())), ("unit_price", Value::Float(100.0))],
    )?;
    let gadget = insert(
        engine,
        "product",
        &[("name", Value::Str("gadget".into())), ("unit_price", Value::Float(50.0))],
    )?;

    // Acme is cheap but slow, Zenith fast but dear. Gadget has no
    // offers, so its items fall through the guard to the list price.
    insert(
        engine,
        "product_supplier",
        &[
            ("product_id", Value::Int(widget.num)),
            ("supplier_id", Value::Int(acme.num)),
            ("unit_cost", Value::Float(105.0)),
            ("lead_time_days", Value::Int(30)),
        ],
    )?;
    insert(
        engine,
        "product_supplier",
        &[
            ("product_id", Value::Int(widget.num)),
            ("supplier_id", Value::Int(zenith.num)),
            ("unit_cost", Value::Float(205.0)),
            ("lead_time_days", Value::Int(5)),
        ],
    )?;

    let alice = insert(
        engine,
        "customer",
        &[("name", Value::Str("Alice".into())), ("credit_limit", Value::Float(1000.0))],
    )?;
    let order = insert(engine, "order", &[("customer_id", Value::Int(alice.num))])?;

    Ok(SeedRows { alice, order, widget, gadget, acme, zenith })
}

fn insert(engine: &mut Engine, entity: &str, pairs: &[(&str, Value)]) -> EngineResult<RowId> {
    let values = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Ok(engine.insert(entity, values)?.row)
}
