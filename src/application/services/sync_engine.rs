use crate::application::ports::{NoticeSink, PushTransport, RemoteApi};
use crate::application::services::entity_store::EntityStore;
use crate::application::services::mutation_controller::{MutationController, MutationOutcome};
use crate::application::services::notification_service::{NotificationService, PollingHandle};
use crate::application::services::pending_registry::PendingRegistry;
use crate::application::services::push_reconciler::{
    PushReconciler, ReconcileOutcome, SnapshotReport, SnapshotScope,
};
use crate::application::services::resync_service::{
    ConnectTransition, ConnectionTracker, ResyncReport, ResyncService,
};
use crate::domain::entities::project::member_ids;
use crate::domain::entities::{
    Entity, EntityRecord, Mutation, Project, PushSignal, Task, UserNotice,
};
use crate::domain::value_objects::{EntityId, EntityKind, FieldDelta, TaskStatus};
use crate::infrastructure::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::shared::config::SyncConfig;
use crate::shared::error::{RemoteError, SyncError};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What handling one transport signal did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Connected {
        transition: ConnectTransition,
        resync: Option<ResyncReport>,
    },
    Disconnected,
    Event(ReconcileOutcome),
}

/// Facade wiring the store, mutation controller, push reconciler, resync and
/// notification inbox for one board session.
pub struct SyncEngine {
    api: Arc<dyn RemoteApi>,
    transport: Arc<dyn PushTransport>,
    notices: Arc<dyn NoticeSink>,
    store: Arc<EntityStore>,
    metrics: Arc<SyncMetrics>,
    controller: Arc<MutationController>,
    reconciler: Arc<PushReconciler>,
    resync: Arc<ResyncService>,
    notifications: Arc<NotificationService>,
    connection: Mutex<ConnectionTracker>,
    push_task: Mutex<Option<JoinHandle<()>>>,
    polling: Mutex<Option<PollingHandle>>,
    /// Member edits send the whole `members` array, so each one reads it
    /// only after the previous edit has settled.
    membership: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: &SyncConfig,
        api: Arc<dyn RemoteApi>,
        transport: Arc<dyn PushTransport>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        let store = Arc::new(EntityStore::new());
        let registry = Arc::new(PendingRegistry::new());
        let metrics = Arc::new(SyncMetrics::new());

        let controller = Arc::new(MutationController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&notices),
            Arc::clone(&metrics),
            config.mutation.timeout(),
        ));
        let reconciler = Arc::new(PushReconciler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&metrics),
        ));
        let resync = Arc::new(ResyncService::new(
            Arc::clone(&api),
            Arc::clone(&reconciler),
            Arc::clone(&metrics),
        ));
        let notifications = Arc::new(NotificationService::new(
            Arc::clone(&api),
            Arc::clone(&controller),
            Arc::clone(&reconciler),
            Arc::clone(&notices),
            Arc::clone(&metrics),
            config.notifications.poll_interval(),
        ));

        Self {
            api,
            transport,
            notices,
            store,
            metrics,
            controller,
            reconciler,
            resync,
            notifications,
            connection: Mutex::new(ConnectionTracker::new()),
            push_task: Mutex::new(None),
            polling: Mutex::new(None),
            membership: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    pub fn reconciler(&self) -> &Arc<PushReconciler> {
        &self.reconciler
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_connected()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.store
            .list(EntityKind::Project)
            .iter()
            .filter_map(|record| Project::from_entity(&record.entity))
            .collect()
    }

    pub fn tasks(&self, project_id: &EntityId) -> Vec<Task> {
        let scope = SnapshotScope::Project(project_id.clone());
        self.store
            .list(EntityKind::Task)
            .iter()
            .filter(|record| scope.contains(&record.entity))
            .filter_map(|record| Task::from_entity(&record.entity))
            .collect()
    }

    /// Connect the push transport, spawn the signal loop and start notification polling.
    pub async fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        let mut signals = self.transport.connect().await?;
        let engine: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.handle_signal(signal).await;
            }
            debug!("Push signal loop finished");
        });
        if let Some(previous) = lock(&self.push_task).replace(task) {
            previous.abort();
        }

        let polling = self.notifications.start_polling();
        *lock(&self.polling) = Some(polling);
        info!("Sync engine started");
        Ok(())
    }

    pub async fn handle_signal(&self, signal: PushSignal) -> SignalOutcome {
        match signal {
            PushSignal::Connected => {
                let transition = self.connection().on_connected();
                if transition == ConnectTransition::Duplicate {
                    return SignalOutcome::Connected {
                        transition,
                        resync: None,
                    };
                }

                self.rejoin_rooms().await;
                let resync = if transition == ConnectTransition::Reconnected {
                    info!("Push transport reconnected, resynchronizing");
                    Some(self.resync.resync().await)
                } else {
                    info!("Push transport connected");
                    None
                };
                SignalOutcome::Connected { transition, resync }
            }
            PushSignal::Disconnected { reason } => {
                if self.connection().on_disconnected() {
                    warn!("Push transport disconnected: {}", reason);
                }
                SignalOutcome::Disconnected
            }
            PushSignal::Event(raw) => SignalOutcome::Event(self.reconciler.on_raw_event(raw)),
        }
    }

    pub async fn open_project(&self, project_id: &EntityId) -> Result<SnapshotReport, SyncError> {
        let report = self.resync.refresh_project(project_id).await?;
        if self.resync.track_project(project_id) && self.is_connected() {
            if let Err(err) = self.transport.join_project(project_id).await {
                warn!("Failed to join project room {}: {}", project_id, err);
            }
        }
        Ok(report)
    }

    pub async fn close_project(&self, project_id: &EntityId) {
        if self.resync.untrack_project(project_id) && self.is_connected() {
            if let Err(err) = self.transport.leave_project(project_id).await {
                warn!("Failed to leave project room {}: {}", project_id, err);
            }
        }
    }

    pub async fn update_task(
        &self,
        task_id: &EntityId,
        delta: FieldDelta,
    ) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let target = task_id.clone();
        let request = delta.clone();
        let result = self
            .controller
            .mutate(task_id, Mutation::Patch(delta), async move {
                api.update_task(&target, &request).await.map(Some)
            })
            .await;
        self.confirm(result, "Task updated successfully")
    }

    /// Kanban drag: the card moves before the server answers.
    pub async fn move_task(
        &self,
        task_id: &EntityId,
        status: TaskStatus,
    ) -> Result<MutationOutcome, SyncError> {
        if let TaskStatus::Unknown(raw) = &status {
            return Err(SyncError::Validation(format!("Unknown task status: {raw}")));
        }
        let delta = FieldDelta::single("status", Value::String(status.as_str().to_string()));
        self.update_task(task_id, delta).await
    }

    pub async fn create_task(
        &self,
        project_id: &EntityId,
        fields: Map<String, Value>,
    ) -> Result<EntityRecord, SyncError> {
        if !has_text(&fields, "title") {
            return Err(SyncError::Validation("Task title is required".to_string()));
        }

        let result = self.api.create_task(project_id, fields).await;
        let mut task = self.settle_create(result, EntityKind::Task)?;
        if !task.fields.contains_key("project") && !task.fields.contains_key("projectId") {
            task.fields.insert(
                "project".to_string(),
                Value::String(project_id.as_str().to_string()),
            );
        }
        self.insert_confirmed(task, "Task created successfully")
    }

    pub async fn delete_task(&self, task_id: &EntityId) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let target = task_id.clone();
        let result = self
            .controller
            .mutate(task_id, Mutation::Remove, async move {
                api.delete_task(&target).await.map(|_| None)
            })
            .await;
        self.confirm(result, "Task deleted successfully")
    }

    pub async fn update_project(
        &self,
        project_id: &EntityId,
        delta: FieldDelta,
    ) -> Result<MutationOutcome, SyncError> {
        let result = self.patch_project(project_id, delta).await;
        self.confirm(result, "Project updated successfully")
    }

    pub async fn add_project_member(
        &self,
        project_id: &EntityId,
        user_id: &str,
    ) -> Result<MutationOutcome, SyncError> {
        let _membership = self.membership.lock().await;
        let mut members = self.members_of(project_id)?;
        if members.iter().any(|member| member == user_id) {
            return Err(SyncError::Validation(format!(
                "User {user_id} is already a member of this project"
            )));
        }
        members.push(user_id.to_string());

        let result = self.patch_project(project_id, members_delta(members)).await;
        self.confirm(result, "Member added successfully")
    }

    pub async fn remove_project_member(
        &self,
        project_id: &EntityId,
        user_id: &str,
    ) -> Result<MutationOutcome, SyncError> {
        let _membership = self.membership.lock().await;
        let members = self.members_of(project_id)?;
        if !members.iter().any(|member| member == user_id) {
            return Err(SyncError::NotFound(format!(
                "User {user_id} is not a member of this project"
            )));
        }
        let remaining = members
            .into_iter()
            .filter(|member| member != user_id)
            .collect();

        let result = self.patch_project(project_id, members_delta(remaining)).await;
        self.confirm(result, "Member removed successfully")
    }

    pub async fn create_project(&self, fields: Map<String, Value>) -> Result<EntityRecord, SyncError> {
        if !has_text(&fields, "name") {
            return Err(SyncError::Validation("Project name is required".to_string()));
        }

        let result = self.api.create_project(fields).await;
        let project = self.settle_create(result, EntityKind::Project)?;
        self.insert_confirmed(project, "Project created successfully")
    }

    pub async fn delete_project(&self, project_id: &EntityId) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let target = project_id.clone();
        let result = self
            .controller
            .mutate(project_id, Mutation::Remove, async move {
                api.delete_project(&target).await.map(|_| None)
            })
            .await;
        if result.is_ok() {
            self.close_project(project_id).await;
        }
        self.confirm(result, "Project deleted successfully")
    }

    /// Fetch a task's comments, oldest first by id.
    pub async fn load_comments(&self, task_id: &EntityId) -> Result<Vec<EntityRecord>, SyncError> {
        let comments = self
            .api
            .fetch_comments(task_id)
            .await?
            .into_iter()
            .map(|comment| stamp_task(comment, task_id))
            .collect();
        let scope = SnapshotScope::Task(task_id.clone());
        self.reconciler
            .apply_snapshot(EntityKind::Comment, &scope, comments);

        Ok(self
            .store
            .list(EntityKind::Comment)
            .into_iter()
            .filter(|record| scope.contains(&record.entity))
            .collect())
    }

    pub async fn add_comment(&self, task_id: &EntityId, text: &str) -> Result<EntityRecord, SyncError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::Validation("Comment text is required".to_string()));
        }

        let result = self.api.add_comment(task_id, text).await;
        let comment = self.settle_create(result, EntityKind::Comment)?;
        self.insert_confirmed(stamp_task(comment, task_id), "Comment added successfully")
    }

    pub async fn delete_comment(
        &self,
        task_id: &EntityId,
        comment_id: &EntityId,
    ) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let task = task_id.clone();
        let comment = comment_id.clone();
        let result = self
            .controller
            .mutate(comment_id, Mutation::Remove, async move {
                api.delete_comment(&task, &comment).await.map(|_| None)
            })
            .await;
        self.confirm(result, "Comment deleted successfully")
    }

    /// Stop polling and the signal loop, disconnect, and clear the store.
    /// Mutations still in flight settle as no-ops.
    pub async fn dispose(&self) {
        let polling = lock(&self.polling).take();
        if let Some(polling) = polling {
            polling.stop().await;
        }
        if let Some(task) = lock(&self.push_task).take() {
            task.abort();
        }
        if let Err(err) = self.transport.disconnect().await {
            warn!("Failed to disconnect push transport: {}", err);
        }
        let abandoned = self.controller.registry().drain();
        if abandoned > 0 {
            debug!("{} pending mutation(s) abandoned on dispose", abandoned);
        }
        self.store.dispose();
        info!("Sync engine disposed");
    }

    async fn patch_project(
        &self,
        project_id: &EntityId,
        delta: FieldDelta,
    ) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let target = project_id.clone();
        let request = delta.clone();
        self.controller
            .mutate(project_id, Mutation::Patch(delta), async move {
                api.update_project(&target, &request).await.map(Some)
            })
            .await
    }

    fn members_of(&self, project_id: &EntityId) -> Result<Vec<String>, SyncError> {
        self.store
            .get(project_id)
            .map(|record| member_ids(&record.entity))
            .ok_or_else(|| SyncError::NotFound(format!("project {project_id} is not loaded")))
    }

    async fn rejoin_rooms(&self) {
        for project_id in self.resync.tracked_projects() {
            if let Err(err) = self.transport.join_project(&project_id).await {
                warn!("Failed to rejoin project room {}: {}", project_id, err);
            }
        }
    }

    fn settle_create(
        &self,
        result: Result<Entity, RemoteError>,
        kind: EntityKind,
    ) -> Result<Entity, SyncError> {
        result.map_err(|err| {
            warn!("Failed to create {}: {}", kind, err);
            self.notices.notify(UserNotice::error(
                format!("Failed to create {kind}"),
                err.is_retryable(),
            ));
            SyncError::Remote(err)
        })
    }

    fn insert_confirmed(&self, entity: Entity, message: &str) -> Result<EntityRecord, SyncError> {
        let id = entity.id.clone();
        self.store.put(entity);
        self.notices
            .notify(UserNotice::success(message).for_entity(&id));
        self.store
            .get(&id)
            .ok_or_else(|| SyncError::Internal(format!("{id} vanished right after insert")))
    }

    fn confirm(
        &self,
        result: Result<MutationOutcome, SyncError>,
        message: &str,
    ) -> Result<MutationOutcome, SyncError> {
        if let Ok(outcome) = &result {
            let mut notice = UserNotice::success(message);
            if let Some(record) = &outcome.record {
                notice = notice.for_entity(record.id());
            }
            self.notices.notify(notice);
        }
        result
    }

    fn connection(&self) -> MutexGuard<'_, ConnectionTracker> {
        lock(&self.connection)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn has_text(fields: &Map<String, Value>, key: &str) -> bool {
    fields
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|value| !value.trim().is_empty())
}

fn members_delta(members: Vec<String>) -> FieldDelta {
    FieldDelta::single(
        "members",
        Value::Array(members.into_iter().map(Value::String).collect()),
    )
}

fn stamp_task(mut comment: Entity, task_id: &EntityId) -> Entity {
    if !comment.fields.contains_key("task") && !comment.fields.contains_key("taskId") {
        comment
            .fields
            .insert("task".to_string(), Value::String(task_id.as_str().to_string()));
    }
    comment
}
