//! Rule declarations and the registration builder.
//!
//! Declarations are the caller-facing form: loose strings naming
//! entities, attributes and accessors, plus expressions. Nothing is
//! validated until [`RuleBookBuilder::build`], which resolves every
//! declaration against the catalog and freezes the result into a
//! [`RuleBook`](super::RuleBook).

use std::sync::Arc;

use crate::model::Catalog;

use super::book::RuleBook;
use super::errors::RegistrationResult;
use super::expr::Expr;

/// A declared derivation, not yet resolved against the catalog.
#[derive(Debug, Clone)]
pub enum DerivationDecl {
    Formula {
        expr: Expr,
    },
    Sum {
        /// Parent-side reverse accessor naming the child collection.
        children: String,
        /// Child attribute to total.
        source: String,
        filter: Option<Expr>,
    },
    Count {
        children: String,
        filter: Option<Expr>,
    },
    Copy {
        /// To-one relationship on the owning entity.
        rel: String,
        /// Parent attribute to mirror.
        source: String,
    },
    AiValue(AiValueDecl),
}

/// One declared rule: an entity, a target attribute and a derivation.
#[derive(Debug, Clone)]
pub struct RuleDecl {
    pub entity: String,
    pub target: String,
    pub derivation: DerivationDecl,
}

/// Declaration of a delegated selection rule.
#[derive(Debug, Clone)]
pub struct AiValueDecl {
    /// Relationship walk from the owning row to the candidate
    /// collection. Every step but the last is a to-one relationship
    /// name; the last is a reverse accessor on the entity reached.
    pub candidates: Vec<String>,
    /// Natural-language selection criteria handed to the decision
    /// function.
    pub optimize_for: String,
    /// Fallback policy spec (`first`, `min:<field>`, `max:<field>`).
    /// Mandatory; registration rejects delegated rules without one.
    pub fallback: Option<String>,
    /// Candidate field whose value becomes the target attribute.
    pub value_field: String,
    /// Audit entity receiving one record per delegation.
    pub audit_entity: String,
    /// Optional guard: delegate only when `when` holds, otherwise
    /// derive the target from `otherwise`.
    pub when: Option<Expr>,
    pub otherwise: Option<Expr>,
}

impl AiValueDecl {
    pub fn new(candidates: &[&str], value_field: &str, audit_entity: &str) -> Self {
        AiValueDecl {
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
            optimize_for: String::new(),
            fallback: None,
            value_field: value_field.to_string(),
            audit_entity: audit_entity.to_string(),
            when: None,
            otherwise: None,
        }
    }

    pub fn optimize_for(mut self, criteria: &str) -> Self {
        self.optimize_for = criteria.to_string();
        self
    }

    pub fn fallback(mut self, spec: &str) -> Self {
        self.fallback = Some(spec.to_string());
        self
    }

    pub fn when(mut self, guard: Expr, otherwise: Expr) -> Self {
        self.when = Some(guard);
        self.otherwise = Some(otherwise);
        self
    }
}

/// A declared constraint: must hold on every touched row of its
/// entity after derivations settle.
#[derive(Debug, Clone)]
pub struct ConstraintDecl {
    pub entity: String,
    pub name: String,
    pub condition: Expr,
    /// Rejection message template; `{attr}` substitutes row values.
    pub error_template: String,
}

/// Collects declarations, then compiles them in one shot.
#[derive(Debug, Default)]
pub struct RuleBookBuilder {
    pub(super) rules: Vec<RuleDecl>,
    pub(super) constraints: Vec<ConstraintDecl>,
}

impl RuleBookBuilder {
    pub fn new() -> Self {
        RuleBookBuilder::default()
    }

    pub fn formula(mut self, entity: &str, target: &str, expr: Expr) -> Self {
        self.rules.push(RuleDecl {
            entity: entity.to_string(),
            target: target.to_string(),
            derivation: DerivationDecl::Formula { expr },
        });
        self
    }

    pub fn sum(self, entity: &str, target: &str, children: &str, source: &str) -> Self {
        self.sum_rule(entity, target, children, source, None)
    }

    pub fn sum_where(self, entity: &str, target: &str, children: &str, source: &str, filter: Expr) -> Self {
        self.sum_rule(entity, target, children, source, Some(filter))
    }

    fn sum_rule(mut self, entity: &str, target: &str, children: &str, source: &str, filter: Option<Expr>) -> Self {
        self.rules.push(RuleDecl {
            entity: entity.to_string(),
            target: target.to_string(),
            derivation: DerivationDecl::Sum {
                children: children.to_string(),
                source: source.to_string(),
                filter,
            },
        });
        self
    }

    pub fn count(self, entity: &str, target: &str, children: &str) -> Self {
        self.count_rule(entity, target, children, None)
    }

    pub fn count_where(self, entity: &str, target: &str, children: &str, filter: Expr) -> Self {
        self.count_rule(entity, target, children, Some(filter))
    }

    fn count_rule(mut self, entity: &str, target: &str, children: &str, filter: Option<Expr>) -> Self {
        self.rules.push(RuleDecl {
            entity: entity.to_string(),
            target: target.to_string(),
            derivation: DerivationDecl::Count {
                children: children.to_string(),
                filter,
            },
        });
        self
    }

    pub fn copy(mut self, entity: &str, target: &str, rel: &str, source: &str) -> Self {
        self.rules.push(RuleDecl {
            entity: entity.to_string(),
            target: target.to_string(),
            derivation: DerivationDecl::Copy {
                rel: rel.to_string(),
                source: source.to_string(),
            },
        });
        self
    }

    pub fn ai_value(mut self, entity: &str, target: &str, decl: AiValueDecl) -> Self {
        self.rules.push(RuleDecl {
            entity: entity.to_string(),
            target: target.to_string(),
            derivation: DerivationDecl::AiValue(decl),
        });
        self
    }

    pub fn constraint(mut self, entity: &str, name: &str, condition: Expr, error_template: &str) -> Self {
        self.constraints.push(ConstraintDecl {
            entity: entity.to_string(),
            name: name.to_string(),
            condition,
            error_template: error_template.to_string(),
        });
        self
    }

    /// Resolve every declaration against the catalog, validate the
    /// audit shapes, build the dependency graph and reject cycles.
    pub fn build(self, catalog: &Arc<Catalog>) -> RegistrationResult<RuleBook> {
        RuleBook::compile(catalog, self.rules, self.constraints)
    }
}
