use crate::application::ports::RemoteApi;
use crate::application::services::push_reconciler::{PushReconciler, SnapshotReport, SnapshotScope};
use crate::domain::entities::Entity;
use crate::domain::value_objects::{EntityId, EntityKind};
use crate::infrastructure::metrics::SyncMetrics;
use crate::shared::error::SyncError;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LinkState {
    #[default]
    NeverConnected,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTransition {
    /// First connection of this engine; the initial fetch covers it.
    Initial,
    /// Connected again after an outage; a full resync is due.
    Reconnected,
    /// Already connected; nothing to do.
    Duplicate,
}

/// Tracks push transport lifecycle signals and decides when to resync.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    state: LinkState,
    reconnects: u64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&mut self) -> ConnectTransition {
        let transition = match self.state {
            LinkState::NeverConnected => ConnectTransition::Initial,
            LinkState::Disconnected => {
                self.reconnects += 1;
                ConnectTransition::Reconnected
            }
            LinkState::Connected => ConnectTransition::Duplicate,
        };
        self.state = LinkState::Connected;
        transition
    }

    /// Returns `true` when this signal ended an established connection.
    pub fn on_disconnected(&mut self) -> bool {
        match self.state {
            LinkState::Connected => {
                self.state = LinkState::Disconnected;
                true
            }
            // 初回接続前の切断は再同期の対象外
            LinkState::NeverConnected => false,
            LinkState::Disconnected => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncReport {
    pub projects: SnapshotReport,
    pub tasks: SnapshotReport,
    pub refreshed_projects: usize,
    pub failures: Vec<String>,
}

impl ResyncReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Pulls fresh snapshots after a reconnect, since the push channel has no backlog.
pub struct ResyncService {
    api: Arc<dyn RemoteApi>,
    reconciler: Arc<PushReconciler>,
    metrics: Arc<SyncMetrics>,
    tracked: Mutex<BTreeSet<EntityId>>,
}

impl ResyncService {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        reconciler: Arc<PushReconciler>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            api,
            reconciler,
            metrics,
            tracked: Mutex::new(BTreeSet::new()),
        }
    }

    /// Returns `false` when the project was already tracked.
    pub fn track_project(&self, project_id: &EntityId) -> bool {
        self.tracked().insert(project_id.clone())
    }

    pub fn untrack_project(&self, project_id: &EntityId) -> bool {
        self.tracked().remove(project_id)
    }

    pub fn tracked_projects(&self) -> Vec<EntityId> {
        self.tracked().iter().cloned().collect()
    }

    /// Fetch one project and its tasks and reconcile them into the store.
    pub async fn refresh_project(&self, project_id: &EntityId) -> Result<SnapshotReport, SyncError> {
        let project = self.api.fetch_project(project_id).await?;
        self.reconciler.apply_fetched(project);

        let tasks = self
            .api
            .fetch_project_tasks(project_id)
            .await?
            .into_iter()
            .map(|task| stamp_project(task, project_id))
            .collect();
        let report = self.reconciler.apply_snapshot(
            EntityKind::Task,
            &SnapshotScope::Project(project_id.clone()),
            tasks,
        );
        debug!(
            "Project {} refreshed: {} applied, {} merged, {} removed",
            project_id, report.applied, report.merged, report.removed
        );
        Ok(report)
    }

    /// Refetch the project list and every tracked project's tasks.
    ///
    /// Individual failures are logged and reported; the remaining fetches still run.
    pub async fn resync(&self) -> ResyncReport {
        let mut report = ResyncReport::default();

        match self.api.fetch_projects().await {
            Ok(projects) => {
                report.projects =
                    self.reconciler
                        .apply_snapshot(EntityKind::Project, &SnapshotScope::All, projects);
            }
            Err(err) => {
                warn!("Failed to refetch projects during resync: {}", err);
                report.failures.push(format!("projects: {err}"));
            }
        }

        for project_id in self.tracked_projects() {
            match self.api.fetch_project_tasks(&project_id).await {
                Ok(tasks) => {
                    let tasks = tasks
                        .into_iter()
                        .map(|task| stamp_project(task, &project_id))
                        .collect();
                    let snapshot = self.reconciler.apply_snapshot(
                        EntityKind::Task,
                        &SnapshotScope::Project(project_id.clone()),
                        tasks,
                    );
                    accumulate(&mut report.tasks, &snapshot);
                    report.refreshed_projects += 1;
                }
                Err(err) => {
                    warn!(
                        "Failed to refetch tasks for project {} during resync: {}",
                        project_id, err
                    );
                    report.failures.push(format!("project:{project_id}: {err}"));
                }
            }
        }

        self.metrics.record_resync();
        info!(
            "Resync finished: {} project(s) refreshed, {} failure(s)",
            report.refreshed_projects,
            report.failures.len()
        );
        report
    }

    fn tracked(&self) -> MutexGuard<'_, BTreeSet<EntityId>> {
        self.tracked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Tasks fetched for a project keep a reference to it even when the payload omits one.
fn stamp_project(mut task: Entity, project_id: &EntityId) -> Entity {
    if !task.fields.contains_key("project") && !task.fields.contains_key("projectId") {
        task.fields.insert(
            "project".to_string(),
            Value::String(project_id.as_str().to_string()),
        );
    }
    task
}

fn accumulate(total: &mut SnapshotReport, snapshot: &SnapshotReport) {
    total.applied += snapshot.applied;
    total.merged += snapshot.merged;
    total.deferred += snapshot.deferred;
    total.stale += snapshot.stale;
    total.removed += snapshot.removed;
}
