//! rulecast - a declarative, dependency-ordered business rules engine
//!
//! Rules are registered against an entity catalog, compiled into an
//! acyclic dependency graph, and enforced transactionally: every
//! insert, update and delete settles affected derivations in rank
//! order, checks constraints, and either commits or rolls back whole.
//! Value selections may be delegated to an external decision function
//! with a deterministic fallback and a full audit trail.

pub mod audit;
pub mod cli;
pub mod compute;
pub mod config;
pub mod decision;
pub mod demo;
pub mod engine;
pub mod graph;
pub mod model;
pub mod rules;
pub mod store;
