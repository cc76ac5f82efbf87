//! Audit entity shape validation.
//!
//! Delegated rules name an audit entity that receives one record per
//! delegation. The entity is an ordinary catalog entity, but its
//! shape is checked at registration: it must carry the request,
//! reason and created_on columns, at least one `chosen_` column
//! mirroring a candidate attribute, and context foreign keys linking
//! the record to the owning row and the rows walked on the candidate
//! path. Validation produces an [`AuditBinding`] the recorder uses to
//! populate records without further lookups.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::{Catalog, EntityDef, ValueType};

pub const REQUEST_ATTR: &str = "request";
pub const REASON_ATTR: &str = "reason";
pub const CREATED_ON_ATTR: &str = "created_on";
pub const CHOSEN_PREFIX: &str = "chosen_";

/// Result type for shape validation
pub type ShapeResult<T> = Result<T, ShapeError>;

/// Structural problems with a declared audit entity
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ShapeError {
    #[error("Unknown audit entity: {0}")]
    UnknownAuditEntity(String),

    #[error("Audit entity {entity} is missing column {attr} ({expected})")]
    MissingColumn {
        entity: String,
        attr: String,
        expected: ValueType,
    },

    #[error("Audit entity {entity} column {attr} must be {expected}")]
    WrongColumnType {
        entity: String,
        attr: String,
        expected: ValueType,
    },

    #[error("Audit entity {0} has no chosen_ columns")]
    NoChosenColumns(String),

    #[error("Audit entity {entity} column {attr} has no matching attribute {field} on candidate entity {candidate}")]
    UnmappedChosen {
        entity: String,
        attr: String,
        field: String,
        candidate: String,
    },

    #[error("Audit entity {entity} column {attr} does not match the type of {candidate}.{field}")]
    ChosenTypeMismatch {
        entity: String,
        attr: String,
        candidate: String,
        field: String,
    },

    #[error("Audit entity {entity} column {attr} links to {linked}, but candidate field {field} on {candidate} links to {expected}")]
    ChosenLinkMismatch {
        entity: String,
        attr: String,
        linked: String,
        candidate: String,
        field: String,
        expected: String,
    },

    #[error("Audit entity {entity} has no foreign key to the owning entity {owner}")]
    MissingOwnerLink { entity: String, owner: String },

    #[error("Audit entity {entity} relationship {rel} points at {parent}, which is not on the candidate path")]
    UnlinkedContext {
        entity: String,
        rel: String,
        parent: String,
    },
}

/// Where the value of one audit-entity context foreign key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FkSource {
    /// The row that owns the delegated attribute.
    Owner,
    /// The row reached at the given to-one step of the candidate path.
    PathStep(usize),
}

/// Precomputed population plan for one audit entity, produced by
/// [`validate_shape`] at registration time.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditBinding {
    pub entity: String,
    /// audit column -> candidate attribute (the `chosen_` prefix stripped)
    pub chosen: BTreeMap<String, String>,
    /// audit relationship name -> source of its foreign key value
    pub context: BTreeMap<String, FkSource>,
}

fn require_column(def: &EntityDef, attr: &str, expected: ValueType) -> ShapeResult<()> {
    match def.attribute(attr) {
        None => Err(ShapeError::MissingColumn {
            entity: def.name().to_string(),
            attr: attr.to_string(),
            expected,
        }),
        Some(found) if found.value_type != expected => Err(ShapeError::WrongColumnType {
            entity: def.name().to_string(),
            attr: attr.to_string(),
            expected,
        }),
        Some(_) => Ok(()),
    }
}

fn candidate_field_type(candidate: &EntityDef, field: &str) -> Option<ValueType> {
    if field == crate::model::ID_ATTR {
        return Some(ValueType::Int);
    }
    candidate.attribute(field).map(|a| a.value_type)
}

/// Check an audit entity against the rule that will write to it.
///
/// `step_parents` are the entities reached by each to-one step of the
/// candidate path, in path order.
pub fn validate_shape(
    catalog: &Catalog,
    audit_entity: &str,
    owner_entity: &str,
    step_parents: &[String],
    candidate_entity: &str,
) -> ShapeResult<AuditBinding> {
    let def = catalog
        .entity(audit_entity)
        .ok_or_else(|| ShapeError::UnknownAuditEntity(audit_entity.to_string()))?;
    let candidate = catalog
        .entity(candidate_entity)
        .ok_or_else(|| ShapeError::UnknownAuditEntity(candidate_entity.to_string()))?;

    require_column(def, REQUEST_ATTR, ValueType::Str)?;
    require_column(def, REASON_ATTR, ValueType::Str)?;
    require_column(def, CREATED_ON_ATTR, ValueType::Timestamp)?;

    let mut chosen = BTreeMap::new();
    for attr in def.attributes() {
        let Some(field) = attr.name.strip_prefix(CHOSEN_PREFIX) else {
            continue;
        };
        let field_type = candidate_field_type(candidate, field).ok_or_else(|| ShapeError::UnmappedChosen {
            entity: audit_entity.to_string(),
            attr: attr.name.clone(),
            field: field.to_string(),
            candidate: candidate_entity.to_string(),
        })?;
        if attr.value_type != field_type {
            return Err(ShapeError::ChosenTypeMismatch {
                entity: audit_entity.to_string(),
                attr: attr.name.clone(),
                candidate: candidate_entity.to_string(),
                field: field.to_string(),
            });
        }
        chosen.insert(attr.name.clone(), field.to_string());
    }
    if chosen.is_empty() {
        return Err(ShapeError::NoChosenColumns(audit_entity.to_string()));
    }

    let mut context = BTreeMap::new();
    let mut owner_linked = false;
    for rel in def.relationships() {
        if let Some(field) = rel.fk_attr.strip_prefix(CHOSEN_PREFIX) {
            // A chosen_ column may itself be a foreign key; it is
            // filled from the candidate, not from context. When the
            // candidate field is also a foreign key, both must point
            // at the same parent entity.
            if let Some(candidate_rel) = candidate.relationship_for_fk(field) {
                if candidate_rel.parent != rel.parent {
                    return Err(ShapeError::ChosenLinkMismatch {
                        entity: audit_entity.to_string(),
                        attr: rel.fk_attr.clone(),
                        linked: rel.parent.clone(),
                        candidate: candidate_entity.to_string(),
                        field: field.to_string(),
                        expected: candidate_rel.parent.clone(),
                    });
                }
            }
            continue;
        }
        if rel.parent == owner_entity {
            owner_linked = true;
            context.insert(rel.name.clone(), FkSource::Owner);
            continue;
        }
        match step_parents.iter().position(|p| p == &rel.parent) {
            Some(step) => {
                context.insert(rel.name.clone(), FkSource::PathStep(step));
            }
            None => {
                return Err(ShapeError::UnlinkedContext {
                    entity: audit_entity.to_string(),
                    rel: rel.name.clone(),
                    parent: rel.parent.clone(),
                });
            }
        }
    }
    if !owner_linked {
        return Err(ShapeError::MissingOwnerLink {
            entity: audit_entity.to_string(),
            owner: owner_entity.to_string(),
        });
    }

    Ok(AuditBinding {
        entity: audit_entity.to_string(),
        chosen,
        context,
    })
}
