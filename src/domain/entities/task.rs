use crate::domain::entities::entity::{id_string, Entity};
use crate::domain::value_objects::{EntityId, EntityKind, TaskPriority, TaskStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Read-only view over a task record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
}

impl Task {
    pub fn from_entity(entity: &Entity) -> Option<Self> {
        if entity.kind != EntityKind::Task {
            return None;
        }

        Some(Self {
            id: entity.id.clone(),
            title: entity.str_field("title").unwrap_or_default().to_string(),
            description: entity.str_field("description").map(str::to_string),
            status: entity
                .str_field("status")
                .map(TaskStatus::from)
                .unwrap_or(TaskStatus::Todo),
            priority: entity
                .str_field("priority")
                .map(TaskPriority::from)
                .unwrap_or_default(),
            assigned_to: entity.field("assignedTo").and_then(id_string),
            due_date: entity.str_field("dueDate").and_then(parse_due_date),
            project_id: project_id_of(entity),
        })
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.due_date {
            Some(due) => due < now && !self.status.is_terminal(),
            None => false,
        }
    }
}

/// Tasks reference their project either by id or as a populated document.
pub fn project_id_of(entity: &Entity) -> Option<String> {
    entity
        .field("project")
        .or_else(|| entity.field("projectId"))
        .and_then(id_string)
}

fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
