//! The compiled rule book.
//!
//! `RuleBook::compile` resolves declarations against the catalog,
//! enforces the one-rule-per-attribute invariant, validates delegated
//! rules end to end (candidate path, value field, fallback, audit
//! shape), builds the dependency graph and rejects cycles. The
//! resulting book is immutable and shared by every transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::audit::shape::{validate_shape, AuditBinding};
use crate::graph::{AttrRef, Crossing, DependencyGraph, GraphBuilder};
use crate::model::{Catalog, EntityDef, Value, ValueType, ID_ATTR};

use super::decl::{ConstraintDecl, DerivationDecl, RuleDecl};
use super::errors::{RegistrationError, RegistrationResult};
use super::expr::{Expr, ReadRef};
use super::fallback::FallbackPolicy;

/// One resolved to-one hop of a candidate path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub rel: String,
    pub parent_entity: String,
}

/// A resolved candidate path: to-one hops, then a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePath {
    pub steps: Vec<PathStep>,
    pub candidate_entity: String,
    /// Child-side relationship on the candidate entity.
    pub rel: String,
    /// Parent-side accessor the rule was declared with.
    pub reverse: String,
}

impl CandidatePath {
    /// Dotted form for diagnostics, e.g. `product.offers`.
    pub fn dotted(&self) -> String {
        let mut parts: Vec<&str> = self.steps.iter().map(|s| s.rel.as_str()).collect();
        parts.push(&self.reverse);
        parts.join(".")
    }
}

/// Conditional delegation: delegate when `when` holds, otherwise
/// derive the target from `otherwise`.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub when: Expr,
    pub otherwise: Expr,
}

/// A fully resolved delegated selection rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AiValueRule {
    pub path: CandidatePath,
    pub optimize_for: String,
    pub fallback: FallbackPolicy,
    pub value_field: String,
    pub audit: AuditBinding,
    pub guard: Option<Guard>,
}

/// A resolved derivation, ready to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum Derivation {
    Formula {
        expr: Expr,
    },
    Sum {
        child_entity: String,
        /// Child-side relationship the aggregate rolls up through.
        rel: String,
        source: String,
        filter: Option<Expr>,
    },
    Count {
        child_entity: String,
        rel: String,
        filter: Option<Expr>,
    },
    Copy {
        rel: String,
        source: String,
    },
    AiValue(Box<AiValueRule>),
}

impl Derivation {
    pub fn kind(&self) -> &'static str {
        match self {
            Derivation::Formula { .. } => "formula",
            Derivation::Sum { .. } => "sum",
            Derivation::Count { .. } => "count",
            Derivation::Copy { .. } => "copy",
            Derivation::AiValue(_) => "ai_value",
        }
    }
}

/// One compiled rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub target: AttrRef,
    pub derivation: Derivation,
}

/// A compiled constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub entity: String,
    pub name: String,
    pub condition: Expr,
    pub error_template: String,
}

impl Constraint {
    /// Render the rejection message, substituting `{attr}` tokens
    /// with row values. Unknown tokens are left as written.
    pub fn render(&self, mut value_of: impl FnMut(&str) -> Option<Value>) -> String {
        let mut out = String::new();
        let mut rest = self.error_template.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let token = &after[..end];
                    match value_of(token) {
                        Some(value) => out.push_str(&value.to_string()),
                        None => {
                            out.push('{');
                            out.push_str(token);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// The immutable compiled rule set.
#[derive(Debug)]
pub struct RuleBook {
    catalog: Arc<Catalog>,
    rules: BTreeMap<AttrRef, Rule>,
    constraints: BTreeMap<String, Vec<Constraint>>,
    derived: BTreeMap<String, Vec<String>>,
    graph: DependencyGraph,
    audit_entities: BTreeSet<String>,
}

impl RuleBook {
    pub(super) fn compile(
        catalog: &Arc<Catalog>,
        decls: Vec<RuleDecl>,
        constraint_decls: Vec<ConstraintDecl>,
    ) -> RegistrationResult<RuleBook> {
        let mut audit_entities = BTreeSet::new();
        for decl in &decls {
            if let DerivationDecl::AiValue(ai) = &decl.derivation {
                audit_entities.insert(ai.audit_entity.clone());
            }
        }

        let mut graph = GraphBuilder::new();
        let mut rules: BTreeMap<AttrRef, Rule> = BTreeMap::new();
        for decl in decls {
            let target = AttrRef::new(&decl.entity, &decl.target);
            if audit_entities.contains(&decl.entity) {
                return Err(RegistrationError::RuleOnAuditEntity(decl.entity));
            }
            let def = catalog
                .entity(&decl.entity)
                .ok_or_else(|| RegistrationError::UnknownEntity(decl.entity.clone()))?;
            let attr = def
                .attribute(&decl.target)
                .ok_or_else(|| RegistrationError::UnknownTarget {
                    entity: decl.entity.clone(),
                    attr: decl.target.clone(),
                })?;
            if attr.required {
                return Err(RegistrationError::DerivedRequired(target.to_string()));
            }
            if rules.contains_key(&target) {
                return Err(RegistrationError::DuplicateRule(target.to_string()));
            }
            let derivation =
                resolve_derivation(catalog, def, &target, attr.value_type, decl.derivation, &mut graph)?;
            graph.add_target(target.clone());
            rules.insert(
                target.clone(),
                Rule {
                    target,
                    derivation,
                },
            );
        }

        let mut constraints: BTreeMap<String, Vec<Constraint>> = BTreeMap::new();
        for decl in constraint_decls {
            if audit_entities.contains(&decl.entity) {
                return Err(RegistrationError::RuleOnAuditEntity(decl.entity));
            }
            let def = catalog
                .entity(&decl.entity)
                .ok_or_else(|| RegistrationError::UnknownEntity(decl.entity.clone()))?;
            let label = format!("{}:{}", decl.entity, decl.name);
            validate_reads(catalog, def, &label, &decl.condition)?;
            validate_template(def, &label, &decl.error_template)?;
            let list = constraints.entry(decl.entity.clone()).or_default();
            if list.iter().any(|c| c.name == decl.name) {
                return Err(RegistrationError::DuplicateConstraint {
                    entity: decl.entity.clone(),
                    name: decl.name.clone(),
                });
            }
            list.push(Constraint {
                entity: decl.entity,
                name: decl.name,
                condition: decl.condition,
                error_template: decl.error_template,
            });
        }

        let graph = graph.finish()?;

        let mut derived: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for target in rules.keys() {
            derived
                .entry(target.entity.clone())
                .or_default()
                .push(target.attr.clone());
        }

        Ok(RuleBook {
            catalog: Arc::clone(catalog),
            rules,
            constraints,
            derived,
            graph,
            audit_entities,
        })
    }

    #[inline]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn rule(&self, target: &AttrRef) -> Option<&Rule> {
        self.rules.get(target)
    }

    /// Every compiled rule in target order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn constraints_for(&self, entity: &str) -> &[Constraint] {
        self.constraints
            .get(entity)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values().flatten()
    }

    /// Derived attribute names of an entity, in name order.
    pub fn derived_attrs(&self, entity: &str) -> &[String] {
        self.derived.get(entity).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_derived(&self, entity: &str, attr: &str) -> bool {
        self.rules.contains_key(&AttrRef::new(entity, attr))
    }

    #[inline]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn is_audit_entity(&self, entity: &str) -> bool {
        self.audit_entities.contains(entity)
    }

    pub fn audit_entities(&self) -> impl Iterator<Item = &str> {
        self.audit_entities.iter().map(|s| s.as_str())
    }
}

fn field_type(def: &EntityDef, field: &str) -> Option<ValueType> {
    if field == ID_ATTR {
        return Some(ValueType::Int);
    }
    def.attribute(field).map(|a| a.value_type)
}

/// Validate every read of an expression rooted at `def`, and add the
/// matching dependency edges for the rule deriving `target`.
fn add_expr_edges(
    catalog: &Catalog,
    def: &EntityDef,
    target: &AttrRef,
    expr: &Expr,
    graph: &mut GraphBuilder,
) -> RegistrationResult<()> {
    for read in expr.reads() {
        match read {
            ReadRef::Own(attr) => {
                if attr != ID_ATTR && def.attribute(&attr).is_none() {
                    return Err(RegistrationError::UnknownReadAttribute {
                        target: target.to_string(),
                        entity: def.name().to_string(),
                        attr,
                    });
                }
                graph.add_edge(AttrRef::new(def.name(), &attr), target.clone(), Crossing::Local);
            }
            ReadRef::Parent { rel, attr } => {
                let relationship =
                    def.relationship_named(&rel)
                        .ok_or_else(|| RegistrationError::UnknownRelationship {
                            target: target.to_string(),
                            entity: def.name().to_string(),
                            rel: rel.clone(),
                        })?;
                let parent = catalog
                    .entity(&relationship.parent)
                    .ok_or_else(|| RegistrationError::UnknownEntity(relationship.parent.clone()))?;
                if attr != ID_ATTR && parent.attribute(&attr).is_none() {
                    return Err(RegistrationError::UnknownReadAttribute {
                        target: target.to_string(),
                        entity: parent.name().to_string(),
                        attr,
                    });
                }
                graph.add_edge(
                    AttrRef::new(&relationship.parent, &attr),
                    target.clone(),
                    Crossing::ToChildren {
                        child_entity: def.name().to_string(),
                        rel: rel.clone(),
                    },
                );
                // Re-parenting must recompute the reader too.
                graph.add_edge(
                    AttrRef::new(def.name(), &relationship.fk_attr),
                    target.clone(),
                    Crossing::Local,
                );
            }
        }
    }
    Ok(())
}

/// Reads-only validation for constraint conditions; no edges, since
/// constraints are re-checked on every touched row anyway.
fn validate_reads(catalog: &Catalog, def: &EntityDef, label: &str, expr: &Expr) -> RegistrationResult<()> {
    for read in expr.reads() {
        match read {
            ReadRef::Own(attr) => {
                if attr != ID_ATTR && def.attribute(&attr).is_none() {
                    return Err(RegistrationError::UnknownReadAttribute {
                        target: label.to_string(),
                        entity: def.name().to_string(),
                        attr,
                    });
                }
            }
            ReadRef::Parent { rel, attr } => {
                let relationship =
                    def.relationship_named(&rel)
                        .ok_or_else(|| RegistrationError::UnknownRelationship {
                            target: label.to_string(),
                            entity: def.name().to_string(),
                            rel: rel.clone(),
                        })?;
                let parent = catalog
                    .entity(&relationship.parent)
                    .ok_or_else(|| RegistrationError::UnknownEntity(relationship.parent.clone()))?;
                if attr != ID_ATTR && parent.attribute(&attr).is_none() {
                    return Err(RegistrationError::UnknownReadAttribute {
                        target: label.to_string(),
                        entity: parent.name().to_string(),
                        attr,
                    });
                }
            }
        }
    }
    Ok(())
}

fn validate_template(def: &EntityDef, label: &str, template: &str) -> RegistrationResult<()> {
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        let token = &after[..end];
        if token != ID_ATTR && def.attribute(token).is_none() {
            return Err(RegistrationError::UnknownReadAttribute {
                target: label.to_string(),
                entity: def.name().to_string(),
                attr: token.to_string(),
            });
        }
        rest = &after[end + 1..];
    }
    Ok(())
}

fn resolve_derivation(
    catalog: &Catalog,
    def: &EntityDef,
    target: &AttrRef,
    target_type: ValueType,
    decl: DerivationDecl,
    graph: &mut GraphBuilder,
) -> RegistrationResult<Derivation> {
    match decl {
        DerivationDecl::Formula { expr } => {
            add_expr_edges(catalog, def, target, &expr, graph)?;
            Ok(Derivation::Formula { expr })
        }
        DerivationDecl::Sum {
            children,
            source,
            filter,
        } => {
            let (child_entity, rel) = resolve_reverse(catalog, def, target, &children)?;
            let child_def = catalog
                .entity(&child_entity)
                .ok_or_else(|| RegistrationError::UnknownEntity(child_entity.clone()))?;
            let source_type = child_def
                .attribute(&source)
                .map(|a| a.value_type)
                .ok_or_else(|| RegistrationError::UnknownReadAttribute {
                    target: target.to_string(),
                    entity: child_entity.clone(),
                    attr: source.clone(),
                })?;
            if !source_type.is_numeric() {
                return Err(RegistrationError::TypeMismatch {
                    target: target.to_string(),
                    detail: format!("sum source {}.{} must be numeric", child_entity, source),
                });
            }
            if source_type != target_type {
                return Err(RegistrationError::TypeMismatch {
                    target: target.to_string(),
                    detail: format!(
                        "sum target is {} but source {}.{} is {}",
                        target_type, child_entity, source, source_type
                    ),
                });
            }
            add_aggregate_edges(child_def, target, &rel, Some(&source), filter.as_ref())?.apply(graph);
            Ok(Derivation::Sum {
                child_entity,
                rel,
                source,
                filter,
            })
        }
        DerivationDecl::Count { children, filter } => {
            let (child_entity, rel) = resolve_reverse(catalog, def, target, &children)?;
            let child_def = catalog
                .entity(&child_entity)
                .ok_or_else(|| RegistrationError::UnknownEntity(child_entity.clone()))?;
            if target_type != ValueType::Int {
                return Err(RegistrationError::TypeMismatch {
                    target: target.to_string(),
                    detail: "count target must be Int".to_string(),
                });
            }
            add_aggregate_edges(child_def, target, &rel, None, filter.as_ref())?.apply(graph);
            Ok(Derivation::Count {
                child_entity,
                rel,
                filter,
            })
        }
        DerivationDecl::Copy { rel, source } => {
            let relationship = def
                .relationship_named(&rel)
                .ok_or_else(|| RegistrationError::UnknownRelationship {
                    target: target.to_string(),
                    entity: def.name().to_string(),
                    rel: rel.clone(),
                })?;
            let parent = catalog
                .entity(&relationship.parent)
                .ok_or_else(|| RegistrationError::UnknownEntity(relationship.parent.clone()))?;
            let source_type =
                field_type(parent, &source).ok_or_else(|| RegistrationError::UnknownReadAttribute {
                    target: target.to_string(),
                    entity: parent.name().to_string(),
                    attr: source.clone(),
                })?;
            if source_type != target_type {
                return Err(RegistrationError::TypeMismatch {
                    target: target.to_string(),
                    detail: format!(
                        "copy target is {} but source {}.{} is {}",
                        target_type,
                        parent.name(),
                        source,
                        source_type
                    ),
                });
            }
            graph.add_edge(
                AttrRef::new(&relationship.parent, &source),
                target.clone(),
                Crossing::ToChildren {
                    child_entity: def.name().to_string(),
                    rel: rel.clone(),
                },
            );
            graph.add_edge(
                AttrRef::new(def.name(), &relationship.fk_attr),
                target.clone(),
                Crossing::Local,
            );
            Ok(Derivation::Copy { rel, source })
        }
        DerivationDecl::AiValue(ai) => {
            let Some((terminal, head)) = ai.candidates.split_last() else {
                return Err(RegistrationError::EmptyCandidatePath(target.to_string()));
            };
            let mut steps = Vec::new();
            let mut current = def;
            for step in head {
                let relationship =
                    current
                        .relationship_named(step)
                        .ok_or_else(|| RegistrationError::BadCandidatePath {
                            target: target.to_string(),
                            step: step.clone(),
                            detail: format!("is not a to-one relationship on {}", current.name()),
                        })?;
                steps.push(PathStep {
                    rel: step.clone(),
                    parent_entity: relationship.parent.clone(),
                });
                current = catalog
                    .entity(&relationship.parent)
                    .ok_or_else(|| RegistrationError::UnknownEntity(relationship.parent.clone()))?;
            }
            let (candidate_entity, rel) =
                catalog
                    .reverse(current.name(), terminal)
                    .ok_or_else(|| RegistrationError::BadCandidatePath {
                        target: target.to_string(),
                        step: terminal.clone(),
                        detail: format!("is not a collection accessor on {}", current.name()),
                    })?;
            let candidate_entity = candidate_entity.to_string();
            let rel = rel.to_string();
            let candidate_def = catalog
                .entity(&candidate_entity)
                .ok_or_else(|| RegistrationError::UnknownEntity(candidate_entity.clone()))?;

            if ai.optimize_for.trim().is_empty() {
                return Err(RegistrationError::BlankCriteria(target.to_string()));
            }

            let value_type = field_type(candidate_def, &ai.value_field).ok_or_else(|| {
                RegistrationError::UnknownCandidateField {
                    target: target.to_string(),
                    candidate: candidate_entity.clone(),
                    field: ai.value_field.clone(),
                }
            })?;
            if value_type != target_type {
                return Err(RegistrationError::TypeMismatch {
                    target: target.to_string(),
                    detail: format!(
                        "target is {} but candidate field {}.{} is {}",
                        target_type, candidate_entity, ai.value_field, value_type
                    ),
                });
            }

            let spec = ai
                .fallback
                .ok_or_else(|| RegistrationError::MissingFallback(target.to_string()))?;
            let fallback: FallbackPolicy =
                spec.parse()
                    .map_err(|source| RegistrationError::InvalidFallback {
                        target: target.to_string(),
                        source,
                    })?;
            if let Some(field) = fallback.field() {
                let ft = field_type(candidate_def, field).ok_or_else(|| {
                    RegistrationError::UnknownCandidateField {
                        target: target.to_string(),
                        candidate: candidate_entity.clone(),
                        field: field.to_string(),
                    }
                })?;
                if !ft.is_ordered() {
                    return Err(RegistrationError::TypeMismatch {
                        target: target.to_string(),
                        detail: format!("fallback orders by {}.{}, which is not orderable", candidate_entity, field),
                    });
                }
            }

            let guard = match (ai.when, ai.otherwise) {
                (Some(when), Some(otherwise)) => {
                    add_expr_edges(catalog, def, target, &when, graph)?;
                    add_expr_edges(catalog, def, target, &otherwise, graph)?;
                    Some(Guard { when, otherwise })
                }
                (None, None) => None,
                _ => return Err(RegistrationError::GuardWithoutOtherwise(target.to_string())),
            };

            let step_parents: Vec<String> = steps.iter().map(|s| s.parent_entity.clone()).collect();
            let audit = validate_shape(
                catalog,
                &ai.audit_entity,
                def.name(),
                &step_parents,
                &candidate_entity,
            )?;

            Ok(Derivation::AiValue(Box::new(AiValueRule {
                path: CandidatePath {
                    steps,
                    candidate_entity,
                    rel,
                    reverse: terminal.clone(),
                },
                optimize_for: ai.optimize_for,
                fallback,
                value_field: ai.value_field,
                audit,
                guard,
            })))
        }
    }
}

fn resolve_reverse(
    catalog: &Catalog,
    def: &EntityDef,
    target: &AttrRef,
    reverse: &str,
) -> RegistrationResult<(String, String)> {
    catalog
        .reverse(def.name(), reverse)
        .map(|(child, rel)| (child.to_string(), rel.to_string()))
        .ok_or_else(|| RegistrationError::UnknownReverse {
            target: target.to_string(),
            parent: def.name().to_string(),
            reverse: reverse.to_string(),
        })
}

/// Edges an aggregate contributes, gathered before application so
/// filter validation can fail first.
struct AggregateEdges {
    edges: Vec<(AttrRef, AttrRef, Crossing)>,
}

impl AggregateEdges {
    fn apply(self, graph: &mut GraphBuilder) {
        for (source, target, crossing) in self.edges {
            graph.add_edge(source, target, crossing);
        }
    }
}

fn add_aggregate_edges(
    child_def: &EntityDef,
    target: &AttrRef,
    rel: &str,
    source: Option<&str>,
    filter: Option<&Expr>,
) -> RegistrationResult<AggregateEdges> {
    let crossing = Crossing::ToParent { rel: rel.to_string() };
    let mut edges = Vec::new();
    if let Some(source) = source {
        edges.push((
            AttrRef::new(child_def.name(), source),
            target.clone(),
            crossing.clone(),
        ));
    }
    if let Some(relationship) = child_def.relationship_named(rel) {
        edges.push((
            AttrRef::new(child_def.name(), &relationship.fk_attr),
            target.clone(),
            crossing.clone(),
        ));
    }
    if let Some(filter) = filter {
        for read in filter.reads() {
            match read {
                ReadRef::Own(attr) => {
                    if attr != ID_ATTR && child_def.attribute(&attr).is_none() {
                        return Err(RegistrationError::UnknownReadAttribute {
                            target: target.to_string(),
                            entity: child_def.name().to_string(),
                            attr,
                        });
                    }
                    edges.push((
                        AttrRef::new(child_def.name(), &attr),
                        target.clone(),
                        crossing.clone(),
                    ));
                }
                ReadRef::Parent { .. } => {
                    return Err(RegistrationError::FilterReadsParent {
                        target: target.to_string(),
                    });
                }
            }
        }
    }
    Ok(AggregateEdges { edges })
}
