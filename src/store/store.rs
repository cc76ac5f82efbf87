//! In-memory transactional entity store.
//!
//! Rows live in per-entity tables keyed by ascending integer id. A
//! parent-to-children link index is maintained alongside the tables
//! for every declared relationship. All mutation happens inside an
//! explicit transaction: the journal records the first-touch before
//! image of every written row, and rollback replays those images in
//! reverse touch order, leaving the store byte-identical to its
//! pre-transaction state (assigned id counters included).
//!
//! The store is mechanical. It enforces types and foreign key
//! integrity but knows nothing about rules; ordering of deletes so
//! children go before parents is the caller's responsibility.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::model::{Catalog, EntityDef, Value, ID_ATTR};

use super::errors::{StoreError, StoreResult};
use super::row::{Row, RowId};

/// (child entity, child-side relationship name)
type LinkKey = (String, String);
/// parent id -> child ids, ascending
type LinkTable = BTreeMap<i64, BTreeSet<i64>>;

#[derive(Debug)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

impl Table {
    fn new() -> Self {
        Table {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

/// Per-transaction undo log. Only the first touch of a row is
/// recorded; `None` marks a row created inside the transaction.
#[derive(Debug, Default)]
struct Journal {
    touched: Vec<RowId>,
    before: BTreeMap<RowId, Option<Row>>,
    next_ids: BTreeMap<String, i64>,
}

impl Journal {
    fn note(&mut self, row_id: &RowId, before: Option<Row>) {
        if !self.before.contains_key(row_id) {
            self.before.insert(row_id.clone(), before);
            self.touched.push(row_id.clone());
        }
    }

    fn note_next_id(&mut self, entity: &str, next_id: i64) {
        self.next_ids.entry(entity.to_string()).or_insert(next_id);
    }
}

/// What a committed transaction touched, in first-touch order.
#[derive(Debug, Clone)]
pub struct TxSummary {
    pub touched: Vec<RowId>,
    pub created: Vec<RowId>,
}

/// The transactional row store.
#[derive(Debug)]
pub struct EntityStore {
    catalog: Arc<Catalog>,
    tables: BTreeMap<String, Table>,
    links: BTreeMap<LinkKey, LinkTable>,
    journal: Option<Journal>,
}

impl EntityStore {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let mut tables = BTreeMap::new();
        for name in catalog.entity_names() {
            tables.insert(name.to_string(), Table::new());
        }
        EntityStore {
            catalog,
            tables,
            links: BTreeMap::new(),
            journal: None,
        }
    }

    #[inline]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    // ==================
    // Transaction control
    // ==================

    pub fn begin(&mut self) -> StoreResult<()> {
        if self.journal.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.journal = Some(Journal::default());
        Ok(())
    }

    pub fn commit(&mut self) -> StoreResult<TxSummary> {
        let journal = self.journal.take().ok_or(StoreError::NoActiveTransaction)?;
        let created = journal
            .touched
            .iter()
            .filter(|id| matches!(journal.before.get(*id), Some(None)))
            .cloned()
            .collect();
        Ok(TxSummary {
            touched: journal.touched,
            created,
        })
    }

    /// Undo every write of the open transaction, newest first.
    pub fn rollback(&mut self) -> StoreResult<()> {
        let journal = self.journal.take().ok_or(StoreError::NoActiveTransaction)?;
        let catalog = Arc::clone(&self.catalog);
        for row_id in journal.touched.iter().rev() {
            let def = catalog
                .entity(&row_id.entity)
                .ok_or_else(|| StoreError::UnknownEntity(row_id.entity.clone()))?;
            if let Some(table) = self.tables.get_mut(&row_id.entity) {
                if let Some(current) = table.rows.remove(&row_id.num) {
                    Self::unlink_row(&mut self.links, def, &current);
                }
            }
            if let Some(Some(previous)) = journal.before.get(row_id) {
                Self::link_row(&mut self.links, def, previous);
                if let Some(table) = self.tables.get_mut(&row_id.entity) {
                    table.rows.insert(row_id.num, previous.clone());
                }
            }
        }
        for (entity, next_id) in journal.next_ids {
            if let Some(table) = self.tables.get_mut(&entity) {
                table.next_id = next_id;
            }
        }
        Ok(())
    }

    fn journal_mut(&mut self) -> StoreResult<&mut Journal> {
        self.journal.as_mut().ok_or(StoreError::NoActiveTransaction)
    }

    // ==================
    // Writes
    // ==================

    /// Create a row. Supplied attributes are type-checked, everything
    /// else defaults to `Null`, and foreign keys must address existing
    /// parents. Returns the assigned id.
    pub fn insert(&mut self, entity: &str, values: BTreeMap<String, Value>) -> StoreResult<RowId> {
        self.journal_mut()?;
        let catalog = Arc::clone(&self.catalog);
        let def = catalog
            .entity(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))?;

        for (name, value) in &values {
            if name == ID_ATTR {
                return Err(StoreError::IdImmutable(entity.to_string()));
            }
            let attr = def.attribute(name).ok_or_else(|| StoreError::UnknownAttribute {
                entity: entity.to_string(),
                attr: name.clone(),
            })?;
            if !value.fits(attr.value_type) {
                return Err(Self::type_mismatch(entity, name, attr.value_type, value));
            }
        }

        let mut full = BTreeMap::new();
        for attr in def.attributes() {
            let value = values.get(&attr.name).cloned().unwrap_or(Value::Null);
            full.insert(attr.name.clone(), value);
        }

        for rel in def.relationships() {
            if let Some(Value::Int(parent_id)) = full.get(&rel.fk_attr) {
                self.require_row(&rel.parent, *parent_id).map_err(|_| {
                    StoreError::ForeignKeyViolation {
                        entity: entity.to_string(),
                        fk_attr: rel.fk_attr.clone(),
                        parent: rel.parent.clone(),
                        parent_id: *parent_id,
                    }
                })?;
            }
        }

        let (row_id, row) = {
            let table = self
                .tables
                .get_mut(entity)
                .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))?;
            let id = table.next_id;
            let row = Row::new(id, full);
            (RowId::new(entity, id), row)
        };
        self.journal_mut()?.note_next_id(entity, row_id.num);
        self.journal_mut()?.note(&row_id, None);
        Self::link_row(&mut self.links, def, &row);
        if let Some(table) = self.tables.get_mut(entity) {
            table.next_id = row_id.num + 1;
            table.rows.insert(row_id.num, row);
        }
        Ok(row_id)
    }

    /// Write one attribute. Returns `true` when the stored value
    /// actually changed. Foreign key writes re-point the link index.
    pub fn set(&mut self, row_id: &RowId, attr: &str, value: Value) -> StoreResult<bool> {
        self.journal_mut()?;
        if attr == ID_ATTR {
            return Err(StoreError::IdImmutable(row_id.entity.clone()));
        }
        let catalog = Arc::clone(&self.catalog);
        let def = catalog
            .entity(&row_id.entity)
            .ok_or_else(|| StoreError::UnknownEntity(row_id.entity.clone()))?;
        let attr_def = def.attribute(attr).ok_or_else(|| StoreError::UnknownAttribute {
            entity: row_id.entity.clone(),
            attr: attr.to_string(),
        })?;
        if !value.fits(attr_def.value_type) {
            return Err(Self::type_mismatch(&row_id.entity, attr, attr_def.value_type, &value));
        }

        let current = self.value(row_id, attr)?;
        if current == value {
            return Ok(false);
        }

        let fk_rel = def.relationship_for_fk(attr).cloned();
        if let Some(rel) = &fk_rel {
            if let Value::Int(parent_id) = value {
                self.require_row(&rel.parent, parent_id).map_err(|_| {
                    StoreError::ForeignKeyViolation {
                        entity: row_id.entity.clone(),
                        fk_attr: attr.to_string(),
                        parent: rel.parent.clone(),
                        parent_id,
                    }
                })?;
            }
        }

        let before = self.require_row(&row_id.entity, row_id.num)?.clone();
        self.journal_mut()?.note(row_id, Some(before));

        if let Some(table) = self.tables.get_mut(&row_id.entity) {
            if let Some(row) = table.rows.get_mut(&row_id.num) {
                row.set(attr, value.clone());
            }
        }

        if let Some(rel) = &fk_rel {
            let key = (row_id.entity.clone(), rel.name.clone());
            if let Value::Int(old_parent) = current {
                Self::unlink(&mut self.links, &key, old_parent, row_id.num);
            }
            if let Value::Int(new_parent) = value {
                Self::link(&mut self.links, &key, new_parent, row_id.num);
            }
        }
        Ok(true)
    }

    /// Remove a row and its link entries.
    pub fn delete(&mut self, row_id: &RowId) -> StoreResult<()> {
        self.journal_mut()?;
        let catalog = Arc::clone(&self.catalog);
        let def = catalog
            .entity(&row_id.entity)
            .ok_or_else(|| StoreError::UnknownEntity(row_id.entity.clone()))?;
        let row = {
            let table = self
                .tables
                .get_mut(&row_id.entity)
                .ok_or_else(|| StoreError::UnknownEntity(row_id.entity.clone()))?;
            table
                .rows
                .remove(&row_id.num)
                .ok_or_else(|| StoreError::RowNotFound(row_id.clone()))?
        };
        Self::unlink_row(&mut self.links, def, &row);
        self.journal_mut()?.note(row_id, Some(row));
        Ok(())
    }

    // ==================
    // Reads
    // ==================

    pub fn get(&self, row_id: &RowId) -> StoreResult<&Row> {
        self.require_row(&row_id.entity, row_id.num)
    }

    pub fn row_exists(&self, row_id: &RowId) -> bool {
        self.tables
            .get(&row_id.entity)
            .is_some_and(|t| t.rows.contains_key(&row_id.num))
    }

    /// Current value of one attribute. `id` reads the row id.
    pub fn value(&self, row_id: &RowId, attr: &str) -> StoreResult<Value> {
        let row = self.require_row(&row_id.entity, row_id.num)?;
        if attr == ID_ATTR {
            return Ok(Value::Int(row.id()));
        }
        row.value(attr).cloned().ok_or_else(|| StoreError::UnknownAttribute {
            entity: row_id.entity.clone(),
            attr: attr.to_string(),
        })
    }

    /// Rows touched so far by the open transaction, in first-touch
    /// order. Empty outside a transaction.
    pub fn touched(&self) -> &[RowId] {
        self.journal
            .as_ref()
            .map(|j| j.touched.as_slice())
            .unwrap_or(&[])
    }

    /// The value an attribute held when the open transaction began.
    /// `None` means the row did not exist at transaction start.
    pub fn pre_tx_value(&self, row_id: &RowId, attr: &str) -> Option<Value> {
        let journal = self.journal.as_ref()?;
        match journal.before.get(row_id) {
            Some(Some(previous)) => {
                if attr == ID_ATTR {
                    Some(Value::Int(previous.id()))
                } else {
                    previous.value(attr).cloned()
                }
            }
            Some(None) => None,
            None => self.value(row_id, attr).ok(),
        }
    }

    pub fn parent_of(&self, row_id: &RowId, rel: &str) -> StoreResult<Option<RowId>> {
        let def = self
            .catalog
            .entity(&row_id.entity)
            .ok_or_else(|| StoreError::UnknownEntity(row_id.entity.clone()))?;
        let rel = def
            .relationship_named(rel)
            .ok_or_else(|| StoreError::UnknownRelationship {
                entity: row_id.entity.clone(),
                rel: rel.to_string(),
            })?;
        match self.value(row_id, &rel.fk_attr)? {
            Value::Int(parent_id) => Ok(Some(RowId::new(&rel.parent, parent_id))),
            _ => Ok(None),
        }
    }

    /// Children of a parent row through one relationship, in
    /// ascending id order. Unknown links yield no children.
    pub fn children_of(&self, parent: &RowId, child_entity: &str, rel: &str) -> Vec<RowId> {
        self.links
            .get(&(child_entity.to_string(), rel.to_string()))
            .and_then(|table| table.get(&parent.num))
            .map(|ids| ids.iter().map(|n| RowId::new(child_entity, *n)).collect())
            .unwrap_or_default()
    }

    /// Row ids of an entity in ascending order.
    pub fn rows(&self, entity: &str) -> StoreResult<Vec<RowId>> {
        let table = self
            .tables
            .get(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))?;
        Ok(table.rows.keys().map(|n| RowId::new(entity, *n)).collect())
    }

    /// Deterministic JSON dump of every table, used by the CLI and by
    /// state-equality assertions in tests.
    pub fn to_json(&self) -> serde_json::Value {
        let mut entities = serde_json::Map::new();
        for (name, table) in &self.tables {
            let rows: Vec<serde_json::Value> = table.rows.values().map(Row::to_json).collect();
            entities.insert(name.clone(), serde_json::Value::Array(rows));
        }
        serde_json::Value::Object(entities)
    }

    // ==================
    // Internals
    // ==================

    fn require_row(&self, entity: &str, num: i64) -> StoreResult<&Row> {
        let table = self
            .tables
            .get(entity)
            .ok_or_else(|| StoreError::UnknownEntity(entity.to_string()))?;
        table
            .rows
            .get(&num)
            .ok_or_else(|| StoreError::RowNotFound(RowId::new(entity, num)))
    }

    fn type_mismatch(entity: &str, attr: &str, expected: crate::model::ValueType, value: &Value) -> StoreError {
        StoreError::TypeMismatch {
            entity: entity.to_string(),
            attr: attr.to_string(),
            expected,
            actual: value
                .value_type()
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| "null".to_string()),
        }
    }

    fn link(links: &mut BTreeMap<LinkKey, LinkTable>, key: &LinkKey, parent_id: i64, child_id: i64) {
        links
            .entry(key.clone())
            .or_default()
            .entry(parent_id)
            .or_default()
            .insert(child_id);
    }

    fn unlink(links: &mut BTreeMap<LinkKey, LinkTable>, key: &LinkKey, parent_id: i64, child_id: i64) {
        let mut drop_table = false;
        if let Some(table) = links.get_mut(key) {
            if let Some(children) = table.get_mut(&parent_id) {
                children.remove(&child_id);
                if children.is_empty() {
                    table.remove(&parent_id);
                }
            }
            drop_table = table.is_empty();
        }
        if drop_table {
            links.remove(key);
        }
    }

    fn link_row(links: &mut BTreeMap<LinkKey, LinkTable>, def: &EntityDef, row: &Row) {
        for rel in def.relationships() {
            if let Some(Value::Int(parent_id)) = row.value(&rel.fk_attr) {
                let key = (def.name().to_string(), rel.name.clone());
                Self::link(links, &key, *parent_id, row.id());
            }
        }
    }

    fn unlink_row(links: &mut BTreeMap<LinkKey, LinkTable>, def: &EntityDef, row: &Row) {
        for rel in def.relationships() {
            if let Some(Value::Int(parent_id)) = row.value(&rel.fk_attr) {
                let key = (def.name().to_string(), rel.name.clone());
                Self::unlink(links, &key, *parent_id, row.id());
            }
        }
    }
}
