use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Field-level change applied to an entity. Always a non-empty JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDelta(Map<String, Value>);

impl FieldDelta {
    pub fn new(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Err("Field delta must be a JSON object".to_string()),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Result<Self, String> {
        if map.is_empty() {
            return Err("Field delta cannot be empty".to_string());
        }
        Ok(Self(map))
    }

    pub fn single(field: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), value);
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }
}

/// Set of fields an in-flight mutation owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMask {
    All,
    Fields(BTreeSet<String>),
}

impl FieldMask {
    pub fn covers(&self, field: &str) -> bool {
        match self {
            FieldMask::All => true,
            FieldMask::Fields(fields) => fields.contains(field),
        }
    }

    pub fn overlaps(&self, other: &FieldMask) -> bool {
        match (self, other) {
            (FieldMask::All, _) | (_, FieldMask::All) => true,
            (FieldMask::Fields(left), FieldMask::Fields(right)) => {
                left.intersection(right).next().is_some()
            }
        }
    }

    pub fn union(&mut self, other: &FieldMask) {
        match (&mut *self, other) {
            (FieldMask::All, _) => {}
            (_, FieldMask::All) => *self = FieldMask::All,
            (FieldMask::Fields(left), FieldMask::Fields(right)) => {
                left.extend(right.iter().cloned());
            }
        }
    }
}
