use crate::domain::entities::Entity;
use crate::domain::value_objects::{EntityId, FieldDelta};
use crate::shared::error::RemoteError;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// REST collaborator. Every call yields exactly one terminal outcome.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_projects(&self) -> RemoteResult<Vec<Entity>>;

    async fn fetch_project(&self, project_id: &EntityId) -> RemoteResult<Entity>;

    async fn create_project(&self, fields: Map<String, Value>) -> RemoteResult<Entity>;

    async fn update_project(&self, project_id: &EntityId, delta: &FieldDelta)
        -> RemoteResult<Entity>;

    async fn delete_project(&self, project_id: &EntityId) -> RemoteResult<()>;

    async fn fetch_project_tasks(&self, project_id: &EntityId) -> RemoteResult<Vec<Entity>>;

    async fn create_task(
        &self,
        project_id: &EntityId,
        fields: Map<String, Value>,
    ) -> RemoteResult<Entity>;

    async fn update_task(&self, task_id: &EntityId, delta: &FieldDelta) -> RemoteResult<Entity>;

    async fn delete_task(&self, task_id: &EntityId) -> RemoteResult<()>;

    async fn fetch_comments(&self, task_id: &EntityId) -> RemoteResult<Vec<Entity>>;

    async fn add_comment(&self, task_id: &EntityId, text: &str) -> RemoteResult<Entity>;

    async fn delete_comment(&self, task_id: &EntityId, comment_id: &EntityId)
        -> RemoteResult<()>;

    async fn fetch_notifications(&self) -> RemoteResult<Vec<Entity>>;

    /// Servers may answer with the updated document or with nothing.
    async fn mark_notification_read(
        &self,
        notification_id: &EntityId,
    ) -> RemoteResult<Option<Entity>>;

    async fn mark_all_notifications_read(&self) -> RemoteResult<()>;

    async fn delete_notification(&self, notification_id: &EntityId) -> RemoteResult<()>;
}
