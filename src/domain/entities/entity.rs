use crate::domain::value_objects::{EntityId, EntityKind, FieldDelta, VersionTag};
use crate::shared::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical representation of a task, project, notification or comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub fields: Map<String, Value>,
    pub version: Option<VersionTag>,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, fields: Map<String, Value>) -> Self {
        let version = VersionTag::from_fields(&fields);
        Self {
            id,
            kind,
            fields,
            version,
        }
    }

    /// Build an entity from a server document. The identifier is read from `_id`, then `id`.
    pub fn from_payload(kind: EntityKind, payload: Value) -> Result<Self, SyncError> {
        let fields = match payload {
            Value::Object(map) => map,
            other => {
                return Err(SyncError::Validation(format!(
                    "{kind} payload must be a JSON object, got {}",
                    json_type_name(&other)
                )));
            }
        };

        let raw_id = fields
            .get("_id")
            .or_else(|| fields.get("id"))
            .and_then(id_string)
            .ok_or_else(|| SyncError::Validation(format!("{kind} payload has no identifier")))?;
        let id = EntityId::new(raw_id).map_err(SyncError::Validation)?;

        Ok(Self::new(id, kind, fields))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Shallow merge; the version tag is left alone.
    pub fn merge_delta(&mut self, delta: &FieldDelta) {
        for (key, value) in delta.as_map() {
            self.fields.insert(key.clone(), value.clone());
        }
    }
}

/// Where the stored value of a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    Confirmed,
    Optimistic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: Entity,
    pub origin: RecordOrigin,
    /// Store-local write counter; changes on every write to this record.
    pub revision: u64,
}

impl EntityRecord {
    pub fn id(&self) -> &EntityId {
        &self.entity.id
    }

    pub fn kind(&self) -> EntityKind {
        self.entity.kind
    }

    pub fn version(&self) -> Option<VersionTag> {
        self.entity.version
    }

    pub fn is_optimistic(&self) -> bool {
        self.origin == RecordOrigin::Optimistic
    }
}

/// Identifiers arrive either as plain strings or as populated documents.
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(map) => map
            .get("_id")
            .or_else(|| map.get("id"))
            .and_then(id_string),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
