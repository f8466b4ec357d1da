use crate::domain::entities::Entity;
use crate::domain::value_objects::{EntityId, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl From<&str> for NotificationLevel {
    fn from(value: &str) -> Self {
        match value {
            "success" => NotificationLevel::Success,
            "warning" => NotificationLevel::Warning,
            "error" => NotificationLevel::Error,
            _ => NotificationLevel::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: EntityId,
    pub message: String,
    pub read: bool,
    pub level: NotificationLevel,
    pub created_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        if entity.kind != EntityKind::Notification {
            return None;
        }

        Some(Self {
            id: entity.id.clone(),
            message: entity.str_field("message").unwrap_or_default().to_string(),
            read: entity
                .field("read")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            level: entity
                .str_field("type")
                .map(NotificationLevel::from)
                .unwrap_or(NotificationLevel::Info),
            created_at: entity
                .str_field("createdAt")
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unread_by_default() {
        let entity = Entity::from_payload(
            EntityKind::Notification,
            json!({"_id": "n1", "message": "Assigned to you", "type": "warning"}),
        )
        .unwrap();
        let notification = Notification::from_entity(&entity).unwrap();
        assert!(!notification.read);
        assert_eq!(notification.level, NotificationLevel::Warning);
        assert!(notification.created_at.is_none());
    }

    #[test]
    fn other_kinds_are_not_notifications() {
        let entity = Entity::from_payload(EntityKind::Task, json!({"_id": "t1"})).unwrap();
        assert!(Notification::from_entity(&entity).is_none());
    }
}
