use crate::domain::entities::Entity;
use crate::domain::value_objects::EntityKind;
use crate::shared::error::SyncError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Named event as delivered by the push transport, before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPushEvent {
    pub name: String,
    pub payload: Value,
}

impl RawPushEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Everything the push transport can hand to the sync layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PushSignal {
    Connected,
    Disconnected { reason: String },
    Event(RawPushEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEventName {
    TaskUpdated,
    ProjectUpdated,
}

impl PushEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushEventName::TaskUpdated => "task-updated",
            PushEventName::ProjectUpdated => "project-updated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "task-updated" => Some(PushEventName::TaskUpdated),
            "project-updated" => Some(PushEventName::ProjectUpdated),
            _ => None,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            PushEventName::TaskUpdated => EntityKind::Task,
            PushEventName::ProjectUpdated => EntityKind::Project,
        }
    }

    fn envelope_key(&self) -> &'static str {
        match self {
            PushEventName::TaskUpdated => "task",
            PushEventName::ProjectUpdated => "project",
        }
    }
}

impl fmt::Display for PushEventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub name: PushEventName,
    pub entity: Entity,
}

impl PushEvent {
    /// Decode a raw event. The payload is either the entity document itself or
    /// an envelope such as `{"task": {...}}`.
    pub fn decode(raw: RawPushEvent) -> Result<Self, SyncError> {
        let name = PushEventName::parse(&raw.name)
            .ok_or_else(|| SyncError::MalformedEvent(format!("unknown event `{}`", raw.name)))?;

        let payload = match raw.payload {
            Value::Object(mut map) => match map.remove(name.envelope_key()) {
                Some(inner @ Value::Object(_)) => inner,
                Some(other) => {
                    map.insert(name.envelope_key().to_string(), other);
                    Value::Object(map)
                }
                None => Value::Object(map),
            },
            other => other,
        };

        let entity = Entity::from_payload(name.entity_kind(), payload)
            .map_err(|err| SyncError::MalformedEvent(format!("{name}: {err}")))?;

        Ok(Self { name, entity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_bare_and_enveloped_payloads() {
        let bare = PushEvent::decode(RawPushEvent::new(
            "task-updated",
            json!({"_id": "t1", "status": "Done"}),
        ))
        .unwrap();
        assert_eq!(bare.entity.kind, EntityKind::Task);

        let wrapped = PushEvent::decode(RawPushEvent::new(
            "project-updated",
            json!({"project": {"_id": "p1", "name": "Apollo"}}),
        ))
        .unwrap();
        assert_eq!(wrapped.entity.id.as_str(), "p1");
    }

    #[test]
    fn task_reference_field_is_not_mistaken_for_envelope() {
        let event = PushEvent::decode(RawPushEvent::new(
            "task-updated",
            json!({"_id": "t1", "task": "parent-ref"}),
        ))
        .unwrap();
        assert_eq!(event.entity.str_field("task"), Some("parent-ref"));
    }

    #[test]
    fn rejects_unknown_name_and_bad_payload() {
        let err = PushEvent::decode(RawPushEvent::new("user-joined", json!({}))).unwrap_err();
        assert!(matches!(err, SyncError::MalformedEvent(_)));

        let err = PushEvent::decode(RawPushEvent::new("task-updated", json!(null))).unwrap_err();
        assert!(matches!(err, SyncError::MalformedEvent(_)));
    }
}
