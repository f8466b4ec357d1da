use crate::domain::value_objects::EntityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// User-visible message raised by the sync layer (the toast of the board UI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotice {
    pub level: NoticeLevel,
    pub message: String,
    pub entity_id: Option<EntityId>,
    pub retryable: bool,
}

impl UserNotice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            entity_id: None,
            retryable: false,
        }
    }

    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
            entity_id: None,
            retryable,
        }
    }

    pub fn for_entity(mut self, entity_id: &EntityId) -> Self {
        self.entity_id = Some(entity_id.clone());
        self
    }
}
