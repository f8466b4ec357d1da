use crate::domain::entities::PushSignal;
use crate::domain::value_objects::EntityId;
use crate::shared::error::SyncError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Realtime channel delivering server-initiated change events.
///
/// Delivery is at-most-once with no backlog; events missed while
/// disconnected are gone and have to be recovered by a full resync.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Start the connection. Lifecycle signals and events arrive on the returned receiver.
    async fn connect(&self) -> Result<mpsc::Receiver<PushSignal>, SyncError>;

    async fn join_project(&self, project_id: &EntityId) -> Result<(), SyncError>;

    async fn leave_project(&self, project_id: &EntityId) -> Result<(), SyncError>;

    async fn disconnect(&self) -> Result<(), SyncError>;
}
