use crate::application::ports::{NoticeSink, RemoteApi};
use crate::application::services::mutation_controller::{MutationController, MutationOutcome};
use crate::application::services::push_reconciler::{PushReconciler, SnapshotReport, SnapshotScope};
use crate::domain::entities::{Mutation, Notification, UserNotice};
use crate::domain::value_objects::{EntityId, EntityKind, FieldDelta};
use crate::infrastructure::metrics::SyncMetrics;
use crate::shared::error::SyncError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Notification inbox. Notifications are polled, never pushed.
pub struct NotificationService {
    api: Arc<dyn RemoteApi>,
    controller: Arc<MutationController>,
    reconciler: Arc<PushReconciler>,
    notices: Arc<dyn NoticeSink>,
    metrics: Arc<SyncMetrics>,
    poll_interval: Duration,
}

impl NotificationService {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        controller: Arc<MutationController>,
        reconciler: Arc<PushReconciler>,
        notices: Arc<dyn NoticeSink>,
        metrics: Arc<SyncMetrics>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            controller,
            reconciler,
            notices,
            metrics,
            poll_interval,
        }
    }

    pub async fn refresh(&self) -> Result<SnapshotReport, SyncError> {
        self.metrics.record_notification_poll();
        let notifications = self.api.fetch_notifications().await?;
        Ok(self.reconciler.apply_snapshot(
            EntityKind::Notification,
            &SnapshotScope::All,
            notifications,
        ))
    }

    /// 新しい順
    pub fn list(&self) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .controller
            .store()
            .list(EntityKind::Notification)
            .iter()
            .filter_map(|record| Notification::from_entity(&record.entity))
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        notifications
    }

    pub fn unread_count(&self) -> usize {
        self.list().iter().filter(|notification| !notification.read).count()
    }

    pub async fn mark_read(&self, notification_id: &EntityId) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let target = notification_id.clone();
        self.controller
            .mutate(
                notification_id,
                Mutation::Patch(FieldDelta::single("read", Value::Bool(true))),
                async move { api.mark_notification_read(&target).await },
            )
            .await
    }

    /// Not optimistic: local state only changes once the server has accepted it.
    pub async fn mark_all_read(&self) -> Result<usize, SyncError> {
        if let Err(err) = self.api.mark_all_notifications_read().await {
            warn!("Failed to mark all notifications as read: {}", err);
            self.notices.notify(UserNotice::error(
                "Failed to mark all notifications as read",
                err.is_retryable(),
            ));
            return Err(SyncError::Remote(err));
        }

        let store = self.controller.store();
        let table = self.controller.registry().lock();
        let mut updated = 0;
        for record in store.list(EntityKind::Notification) {
            let id = record.entity.id.clone();
            let already_read = record.entity.field("read").and_then(Value::as_bool) == Some(true);
            if already_read || table.has_pending(&id) {
                continue;
            }
            let mut entity = record.entity;
            entity.fields.insert("read".to_string(), Value::Bool(true));
            store.put(entity);
            updated += 1;
        }
        debug!("{} notification(s) marked read", updated);
        Ok(updated)
    }

    pub async fn delete(&self, notification_id: &EntityId) -> Result<MutationOutcome, SyncError> {
        let api = Arc::clone(&self.api);
        let target = notification_id.clone();
        self.controller
            .mutate(notification_id, Mutation::Remove, async move {
                api.delete_notification(&target).await.map(|_| None)
            })
            .await
    }

    /// Refresh now and then every poll interval until the handle is stopped or dropped.
    pub fn start_polling(self: &Arc<Self>) -> PollingHandle {
        let service = Arc::clone(self);
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = service.refresh().await {
                            // 通知は重要度が低いため、ユーザーには表示しない
                            warn!("Notification poll failed: {}", e);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Notification polling stopped");
        });

        PollingHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// Owns a polling loop; dropping it cancels the loop.
pub struct PollingHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PollingHandle {
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!("Notification polling task ended abnormally: {}", err);
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
