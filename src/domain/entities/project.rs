use crate::domain::entities::entity::{id_string, Entity};
use crate::domain::value_objects::{EntityId, EntityKind};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    pub status: Option<String>,
    pub member_ids: Vec<String>,
}

impl Project {
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        if entity.kind != EntityKind::Project {
            return None;
        }

        Some(Self {
            id: entity.id.clone(),
            name: entity.str_field("name").unwrap_or_default().to_string(),
            status: entity.str_field("status").map(str::to_string),
            member_ids: member_ids(entity),
        })
    }
}

pub fn member_ids(entity: &Entity) -> Vec<String> {
    entity
        .field("members")
        .and_then(Value::as_array)
        .map(|members| members.iter().filter_map(id_string).collect())
        .unwrap_or_default()
}
