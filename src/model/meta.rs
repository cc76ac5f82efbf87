//! Catalog metadata: entities, attributes, relationships.
//!
//! The catalog is the immutable shape of the world the engine works
//! on. It is assembled once through [`CatalogBuilder`], validated
//! completely at build time, and then shared read-only by the store,
//! the rule book and the evaluator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::errors::{ModelError, ModelResult};
use super::value::ValueType;

/// Attribute name reserved for the store-assigned primary key.
pub const ID_ATTR: &str = "id";

/// A declared attribute of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub value_type: ValueType,
    /// Required attributes must be non-null once evaluation settles.
    /// Derived attributes are never marked required.
    pub required: bool,
}

impl AttributeDef {
    pub fn required(name: &str, value_type: ValueType) -> Self {
        AttributeDef {
            name: name.to_string(),
            value_type,
            required: true,
        }
    }

    pub fn optional(name: &str, value_type: ValueType) -> Self {
        AttributeDef {
            name: name.to_string(),
            value_type,
            required: false,
        }
    }
}

/// What happens to child rows when their parent row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Refuse to delete a parent that still has children.
    Restrict,
    /// Delete the children along with the parent.
    Cascade,
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeletePolicy::Restrict => "restrict",
            DeletePolicy::Cascade => "cascade",
        })
    }
}

/// A many-to-one link from a child entity to a parent entity.
///
/// Declared on the child. `name` is the child-side accessor used in
/// expressions (`parent("order", ...)`) and `reverse` is the
/// parent-side accessor used by aggregate rules (`"items"`).
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub parent: String,
    pub fk_attr: String,
    pub reverse: String,
    pub on_delete: DeletePolicy,
}

impl Relationship {
    pub fn new(name: &str, parent: &str, fk_attr: &str, reverse: &str) -> Self {
        Relationship {
            name: name.to_string(),
            parent: parent.to_string(),
            fk_attr: fk_attr.to_string(),
            reverse: reverse.to_string(),
            on_delete: DeletePolicy::Restrict,
        }
    }

    pub fn on_delete(mut self, policy: DeletePolicy) -> Self {
        self.on_delete = policy;
        self
    }
}

/// One entity definition: a named bag of attributes plus the
/// relationships this entity holds toward its parents.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDef {
    name: String,
    attributes: Vec<AttributeDef>,
    relationships: Vec<Relationship>,
}

impl EntityDef {
    pub fn new(name: &str) -> Self {
        EntityDef {
            name: name.to_string(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn attr(mut self, def: AttributeDef) -> Self {
        self.attributes.push(def);
        self
    }

    pub fn relationship(mut self, rel: Relationship) -> Self {
        self.relationships.push(rel);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDef] {
        &self.attributes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship_named(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// The relationship backed by the given foreign key attribute.
    pub fn relationship_for_fk(&self, fk_attr: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.fk_attr == fk_attr)
    }

    fn validate(&self) -> ModelResult<()> {
        if self.attributes.is_empty() {
            return Err(ModelError::EmptyEntity(self.name.clone()));
        }
        let mut seen = BTreeSet::new();
        for attr in &self.attributes {
            if attr.name == ID_ATTR {
                return Err(ModelError::ReservedAttribute(self.name.clone()));
            }
            if !seen.insert(attr.name.clone()) {
                return Err(ModelError::DuplicateAttribute {
                    entity: self.name.clone(),
                    attr: attr.name.clone(),
                });
            }
        }
        let mut rel_names = BTreeSet::new();
        let mut fk_attrs = BTreeSet::new();
        for rel in &self.relationships {
            if !rel_names.insert(rel.name.clone()) {
                return Err(ModelError::DuplicateRelationship {
                    entity: self.name.clone(),
                    rel: rel.name.clone(),
                });
            }
            if self.attribute(&rel.name).is_some() {
                return Err(ModelError::RelationshipShadowsAttribute {
                    entity: self.name.clone(),
                    rel: rel.name.clone(),
                });
            }
            match self.attribute(&rel.fk_attr) {
                Some(def) if def.value_type == ValueType::Int => {}
                _ => {
                    return Err(ModelError::BadForeignKey {
                        entity: self.name.clone(),
                        rel: rel.name.clone(),
                        fk_attr: rel.fk_attr.clone(),
                    });
                }
            }
            if !fk_attrs.insert(rel.fk_attr.clone()) {
                return Err(ModelError::SharedForeignKey {
                    entity: self.name.clone(),
                    fk_attr: rel.fk_attr.clone(),
                });
            }
        }
        Ok(())
    }
}

/// The validated, immutable set of entity definitions.
#[derive(Debug, Clone)]
pub struct Catalog {
    entities: BTreeMap<String, EntityDef>,
    /// (parent entity, reverse accessor) -> (child entity, child-side rel name)
    reverses: BTreeMap<(String, String), (String, String)>,
    /// parent entity -> every (child entity, child-side rel name) pointing at it
    children: BTreeMap<String, Vec<(String, String)>>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    pub fn require(&self, name: &str) -> ModelResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| ModelError::UnknownEntity(name.to_string()))
    }

    /// Entity names in sorted order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(|s| s.as_str())
    }

    pub fn relationship(&self, child_entity: &str, rel: &str) -> Option<&Relationship> {
        self.entities.get(child_entity)?.relationship_named(rel)
    }

    /// Resolve a parent-side reverse accessor to the child entity and
    /// the child-side relationship that carries it.
    pub fn reverse(&self, parent_entity: &str, reverse: &str) -> Option<(&str, &str)> {
        self.reverses
            .get(&(parent_entity.to_string(), reverse.to_string()))
            .map(|(child, rel)| (child.as_str(), rel.as_str()))
    }

    /// Every (child entity, child-side rel name) whose parent is the
    /// given entity. Used by delete policy enforcement.
    pub fn children_of(&self, parent_entity: &str) -> &[(String, String)] {
        self.children
            .get(parent_entity)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Collects entity definitions and validates them as a whole.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityDef>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        CatalogBuilder::default()
    }

    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    /// Validates every definition and the links between them.
    /// Fails on the first structural problem found.
    pub fn build(self) -> ModelResult<Catalog> {
        let mut entities: BTreeMap<String, EntityDef> = BTreeMap::new();
        for def in self.entities {
            def.validate()?;
            if entities.insert(def.name().to_string(), def.clone()).is_some() {
                return Err(ModelError::DuplicateEntity(def.name().to_string()));
            }
        }

        let mut reverses = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for def in entities.values() {
            for rel in def.relationships() {
                let parent = entities
                    .get(&rel.parent)
                    .ok_or_else(|| ModelError::UnknownEntity(rel.parent.clone()))?;
                if parent.attribute(&rel.reverse).is_some() {
                    return Err(ModelError::ReverseConflict {
                        parent: rel.parent.clone(),
                        reverse: rel.reverse.clone(),
                    });
                }
                let key = (rel.parent.clone(), rel.reverse.clone());
                let entry = (def.name().to_string(), rel.name.clone());
                if reverses.insert(key, entry.clone()).is_some() {
                    return Err(ModelError::ReverseConflict {
                        parent: rel.parent.clone(),
                        reverse: rel.reverse.clone(),
                    });
                }
                children.entry(rel.parent.clone()).or_default().push(entry);
            }
        }

        Ok(Catalog {
            entities,
            reverses,
            children,
        })
    }
}
