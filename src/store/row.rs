//! Row identity and row payloads.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::Value;

/// Globally unique row address: entity name plus store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId {
    pub entity: String,
    pub num: i64,
}

impl RowId {
    pub fn new(entity: &str, num: i64) -> Self {
        RowId {
            entity: entity.to_string(),
            num,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity, self.num)
    }
}

/// One stored row. Every declared attribute of the entity is present
/// in `values`; attributes never supplied are `Value::Null`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: i64,
    values: BTreeMap<String, Value>,
}

impl Row {
    pub(crate) fn new(id: i64, values: BTreeMap<String, Value>) -> Self {
        Row { id, values }
    }

    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn value(&self, attr: &str) -> Option<&Value> {
        self.values.get(attr)
    }

    pub(crate) fn set(&mut self, attr: &str, value: Value) {
        self.values.insert(attr.to_string(), value);
    }

    /// Attribute names and values in sorted attribute order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON object projection including the row id.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("id".to_string(), serde_json::Value::from(self.id));
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_id_display() {
        assert_eq!(RowId::new("item", 3).to_string(), "item#3");
    }

    #[test]
    fn test_row_json_includes_id() {
        let mut values = BTreeMap::new();
        values.insert("quantity".to_string(), Value::Int(2));
        let row = Row::new(7, values);
        assert_eq!(
            row.to_json(),
            serde_json::json!({"id": 7, "quantity": 2})
        );
    }
}
