//! CLI command implementations
//!
//! `demo` seeds the check-credit model and walks three order
//! scenarios: a normal insert, a larger insert that still fits the
//! credit limit, and one that breaks it and rolls back. `explain`
//! prints the compiled rule set and its dependency graph.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::FileAuditSink;
use crate::config::{EngineConfig, HttpDecisionConfig};
use crate::decision::{DecisionFunction, HttpDecisionClient, UnavailableDecision};
use crate::demo;
use crate::engine::{Engine, TxReceipt};
use crate::graph::Crossing;
use crate::model::Value;
use crate::store::RowId;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Demo {
            config,
            conditions,
            endpoint,
            model,
            audit_log,
        } => run_demo(config, conditions, endpoint, model, audit_log),
        Command::Explain => explain(),
    }
}

fn load_config(path: Option<&Path>, conditions: Option<String>) -> CliResult<EngineConfig> {
    let mut config = match path {
        Some(p) => EngineConfig::from_file(p)?,
        None => EngineConfig::default(),
    };
    if conditions.is_some() {
        config.world_conditions = conditions;
    }
    Ok(config)
}

fn decision_backend(
    endpoint: Option<String>,
    model: Option<String>,
    config: &EngineConfig,
) -> CliResult<Arc<dyn DecisionFunction>> {
    let Some(base_url) = endpoint else {
        return Ok(Arc::new(UnavailableDecision));
    };
    let mut http = HttpDecisionConfig {
        base_url,
        ..HttpDecisionConfig::default()
    };
    if let Some(model) = model {
        http.model = model;
    }
    let client = HttpDecisionClient::new(http, config.decision_timeout())
        .map_err(|e| CliError::config_error(e.to_string()))?;
    Ok(Arc::new(client))
}

/// Seed the check-credit model and run the order scenarios.
pub fn run_demo(
    config_path: Option<PathBuf>,
    conditions: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    audit_log: Option<PathBuf>,
) -> CliResult<()> {
    let config = load_config(config_path.as_deref(), conditions)?;
    let decision = decision_backend(endpoint, model, &config)?;

    let catalog = demo::catalog()?;
    let book = demo::rule_book(&catalog)?;
    let mut engine = Engine::new(book, decision, config);
    if let Some(path) = &audit_log {
        engine = engine.with_sink(Arc::new(FileAuditSink::open(path)?));
    }

    let rows = demo::seed(&mut engine)?;
    println!("Seeded: 2 suppliers, 2 products, 2 offers, 1 customer, 1 open order.");
    println!();

    scenario(
        &mut engine,
        "Order 2 gadgets (no offers, unit price falls back to list price)",
        &[
            ("order_id", Value::Int(rows.order.num)),
            ("product_id", Value::Int(rows.gadget.num)),
            ("quantity", Value::Int(2)),
        ],
    )?;
    scenario(
        &mut engine,
        "Order 5 widgets (unit price selected across supplier offers)",
        &[
            ("order_id", Value::Int(rows.order.num)),
            ("product_id", Value::Int(rows.widget.num)),
            ("quantity", Value::Int(5)),
        ],
    )?;
    scenario(
        &mut engine,
        "Order 10 more widgets (expected to break the credit limit)",
        &[
            ("order_id", Value::Int(rows.order.num)),
            ("product_id", Value::Int(rows.widget.num)),
            ("quantity", Value::Int(10)),
        ],
    )?;

    let store = engine.store();
    println!("Final state:");
    println!(
        "  {} balance = {}, credit limit = {}",
        rows.alice,
        store.value(&rows.alice, "balance")?,
        store.value(&rows.alice, "credit_limit")?,
    );
    println!(
        "  {} amount_total = {}",
        rows.order,
        store.value(&rows.order, "amount_total")?,
    );

    println!();
    println!("Supplier choices:");
    for row in store.rows("supplier_choice")? {
        println!(
            "  {}: supplier {} at {} ({})",
            row,
            store.value(&row, "chosen_supplier_id")?,
            store.value(&row, "chosen_unit_cost")?,
            store.value(&row, "reason")?,
        );
    }
    if let Some(path) = &audit_log {
        println!();
        println!("Decision records exported to {}", path.display());
    }
    Ok(())
}

/// Run one insert scenario, printing the firing trace or the
/// rejection.
fn scenario(engine: &mut Engine, label: &str, values: &[(&str, Value)]) -> CliResult<()> {
    println!("{}", label);
    let values: BTreeMap<String, Value> = values
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    match engine.insert("item", values) {
        Ok(receipt) => print_receipt(&receipt),
        Err(e) if e.is_rejection() => {
            println!("  REJECTED: {}", e);
        }
        Err(e) => return Err(e.into()),
    }
    println!();
    Ok(())
}

fn print_receipt(receipt: &TxReceipt) {
    println!("  committed {} (tx {})", receipt.row, receipt.tx_id);
    for firing in &receipt.firings {
        println!(
            "    [{}] {}.{} {} {} -> {}",
            firing.depth, firing.row, firing.attribute, firing.rule_kind, firing.old, firing.new,
        );
        if let Some(reason) = &firing.rationale {
            println!("        {}", reason);
        }
    }
    if !receipt.audit_rows.is_empty() {
        let rows: Vec<String> = receipt.audit_rows.iter().map(RowId::to_string).collect();
        println!("    audit: {}", rows.join(", "));
    }
}

/// Print the demo rule set, dependency edges and evaluation ranks.
pub fn explain() -> CliResult<()> {
    let catalog = demo::catalog()?;
    let book = demo::rule_book(&catalog)?;
    let graph = book.graph();

    println!("Rules (by evaluation rank):");
    let mut rules: Vec<_> = book.rules().collect();
    rules.sort_by_key(|r| (graph.rank(&r.target), r.target.clone()));
    for rule in rules {
        println!(
            "  [{}] {} = {}",
            graph.rank(&rule.target),
            rule.target,
            rule.derivation.kind(),
        );
    }

    println!();
    println!("Constraints:");
    for constraint in book.constraints() {
        println!("  {}.{}: \"{}\"", constraint.entity, constraint.name, constraint.error_template);
    }

    println!();
    println!("Dependency edges ({}):", graph.edge_count());
    for edge in graph.edges() {
        println!("  {} -> {}  [{}]", edge.source, edge.target, crossing_tag(&edge.crossing));
    }
    Ok(())
}

fn crossing_tag(crossing: &Crossing) -> String {
    match crossing {
        Crossing::Local => "local".to_string(),
        Crossing::ToParent { rel } => format!("to parent via {}", rel),
        Crossing::ToChildren { child_entity, rel } => {
            format!("to {} children via {}", child_entity, rel)
        }
    }
}
