#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use taskboard_sync::application::ports::{NoticeSink, PushTransport, RemoteApi, RemoteResult};
use taskboard_sync::application::services::{
    EntityStore, MutationController, PendingRegistry, PushReconciler, SyncEngine,
};
use taskboard_sync::domain::entities::{Entity, NoticeLevel, PushSignal, UserNotice};
use taskboard_sync::domain::value_objects::{EntityId, EntityKind, FieldDelta};
use taskboard_sync::infrastructure::SyncMetrics;
use taskboard_sync::shared::error::{RemoteError, SyncError};
use taskboard_sync::SyncConfig;
use tokio::sync::{mpsc, Semaphore};

pub fn id(raw: &str) -> EntityId {
    EntityId::try_from(raw).expect("entity id")
}

pub fn entity(kind: EntityKind, payload: Value) -> Entity {
    Entity::from_payload(kind, payload).expect("entity payload")
}

pub fn task(payload: Value) -> Entity {
    entity(EntityKind::Task, payload)
}

pub fn delta(value: Value) -> FieldDelta {
    FieldDelta::new(value).expect("field delta")
}

/// In-memory board server. Documents are versioned; every write bumps `version`.
#[derive(Default)]
pub struct FakeRemoteApi {
    documents: Mutex<BTreeMap<String, Entity>>,
    failing: Mutex<HashSet<&'static str>>,
    held: Mutex<HashMap<&'static str, Arc<Semaphore>>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entity: Entity) {
        self.documents
            .lock()
            .unwrap()
            .insert(entity.id.as_str().to_string(), entity);
    }

    pub fn document(&self, raw_id: &str) -> Option<Entity> {
        self.documents.lock().unwrap().get(raw_id).cloned()
    }

    pub fn remove_document(&self, raw_id: &str) {
        self.documents.lock().unwrap().remove(raw_id);
    }

    /// Make every call to `operation` fail with a 503 until `recover` is called.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    /// Park calls to `operation` until `release` lets them through one at a time.
    pub fn hold(&self, operation: &'static str) {
        self.held
            .lock()
            .unwrap()
            .insert(operation, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, operation: &'static str) {
        if let Some(gate) = self.held.lock().unwrap().get(operation) {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == operation)
            .count()
    }

    async fn pass(&self, operation: &'static str) {
        let gate = self.held.lock().unwrap().get(operation).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate open").forget();
        }
    }

    fn enter(&self, operation: &'static str) -> RemoteResult<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        if self.failing.lock().unwrap().contains(operation) {
            return Err(RemoteError::http(503, format!("{operation} unavailable")));
        }
        Ok(())
    }

    fn list(&self, kind: EntityKind, filter: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        self.documents
            .lock()
            .unwrap()
            .values()
            .filter(|entity| entity.kind == kind && filter(entity))
            .cloned()
            .collect()
    }

    fn patch(&self, raw_id: &str, fields: &Map<String, Value>) -> RemoteResult<Entity> {
        let mut documents = self.documents.lock().unwrap();
        let document = documents
            .get_mut(raw_id)
            .ok_or_else(|| RemoteError::http(404, format!("{raw_id} not found")))?;
        let mut merged = document.fields.clone();
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
        let version = document.version.map(|tag| tag.value()).unwrap_or(0) + 1;
        merged.insert("version".to_string(), json!(version));
        *document = Entity::new(document.id.clone(), document.kind, merged);
        Ok(document.clone())
    }

    fn insert(&self, kind: EntityKind, mut fields: Map<String, Value>) -> Entity {
        let number = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let raw_id = format!("{}-{number}", kind.as_str());
        fields.insert("_id".to_string(), json!(raw_id));
        fields.insert("version".to_string(), json!(1));
        let created = Entity::from_payload(kind, Value::Object(fields)).expect("created entity");
        self.seed(created.clone());
        created
    }

    fn delete(&self, raw_id: &str) -> RemoteResult<()> {
        self.documents
            .lock()
            .unwrap()
            .remove(raw_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::http(404, format!("{raw_id} not found")))
    }
}

fn refers_to(entity: &Entity, keys: [&str; 2], target: &EntityId) -> bool {
    keys.iter()
        .filter_map(|key| entity.field(key))
        .any(|value| value.as_str() == Some(target.as_str()))
}

#[async_trait]
impl RemoteApi for FakeRemoteApi {
    async fn fetch_projects(&self) -> RemoteResult<Vec<Entity>> {
        self.enter("fetch_projects")?;
        Ok(self.list(EntityKind::Project, |_| true))
    }

    async fn fetch_project(&self, project_id: &EntityId) -> RemoteResult<Entity> {
        self.enter("fetch_project")?;
        self.document(project_id.as_str())
            .ok_or_else(|| RemoteError::http(404, "Project not found"))
    }

    async fn create_project(&self, fields: Map<String, Value>) -> RemoteResult<Entity> {
        self.enter("create_project")?;
        Ok(self.insert(EntityKind::Project, fields))
    }

    async fn update_project(
        &self,
        project_id: &EntityId,
        delta: &FieldDelta,
    ) -> RemoteResult<Entity> {
        self.pass("update_project").await;
        self.enter("update_project")?;
        self.patch(project_id.as_str(), delta.as_map())
    }

    async fn delete_project(&self, project_id: &EntityId) -> RemoteResult<()> {
        self.enter("delete_project")?;
        self.delete(project_id.as_str())
    }

    async fn fetch_project_tasks(&self, project_id: &EntityId) -> RemoteResult<Vec<Entity>> {
        self.enter("fetch_project_tasks")?;
        Ok(self.list(EntityKind::Task, |task| {
            refers_to(task, ["project", "projectId"], project_id)
        }))
    }

    async fn create_task(
        &self,
        project_id: &EntityId,
        mut fields: Map<String, Value>,
    ) -> RemoteResult<Entity> {
        self.enter("create_task")?;
        fields.insert("project".to_string(), json!(project_id.as_str()));
        fields
            .entry("status".to_string())
            .or_insert_with(|| json!("To Do"));
        Ok(self.insert(EntityKind::Task, fields))
    }

    async fn update_task(&self, task_id: &EntityId, delta: &FieldDelta) -> RemoteResult<Entity> {
        self.pass("update_task").await;
        self.enter("update_task")?;
        self.patch(task_id.as_str(), delta.as_map())
    }

    async fn delete_task(&self, task_id: &EntityId) -> RemoteResult<()> {
        self.enter("delete_task")?;
        self.delete(task_id.as_str())
    }

    async fn fetch_comments(&self, task_id: &EntityId) -> RemoteResult<Vec<Entity>> {
        self.enter("fetch_comments")?;
        Ok(self.list(EntityKind::Comment, |comment| {
            refers_to(comment, ["task", "taskId"], task_id)
        }))
    }

    async fn add_comment(&self, task_id: &EntityId, text: &str) -> RemoteResult<Entity> {
        self.enter("add_comment")?;
        let mut fields = Map::new();
        fields.insert("task".to_string(), json!(task_id.as_str()));
        fields.insert("text".to_string(), json!(text));
        Ok(self.insert(EntityKind::Comment, fields))
    }

    async fn delete_comment(
        &self,
        _task_id: &EntityId,
        comment_id: &EntityId,
    ) -> RemoteResult<()> {
        self.enter("delete_comment")?;
        self.delete(comment_id.as_str())
    }

    async fn fetch_notifications(&self) -> RemoteResult<Vec<Entity>> {
        self.enter("fetch_notifications")?;
        Ok(self.list(EntityKind::Notification, |_| true))
    }

    async fn mark_notification_read(
        &self,
        notification_id: &EntityId,
    ) -> RemoteResult<Option<Entity>> {
        self.enter("mark_notification_read")?;
        let mut fields = Map::new();
        fields.insert("read".to_string(), json!(true));
        self.patch(notification_id.as_str(), &fields).map(Some)
    }

    async fn mark_all_notifications_read(&self) -> RemoteResult<()> {
        self.enter("mark_all_notifications_read")?;
        let unread: Vec<String> = self
            .list(EntityKind::Notification, |n| n.field("read") != Some(&json!(true)))
            .into_iter()
            .map(|n| n.id.as_str().to_string())
            .collect();
        let mut fields = Map::new();
        fields.insert("read".to_string(), json!(true));
        for raw_id in unread {
            self.patch(&raw_id, &fields)?;
        }
        Ok(())
    }

    async fn delete_notification(&self, notification_id: &EntityId) -> RemoteResult<()> {
        self.enter("delete_notification")?;
        self.delete(notification_id.as_str())
    }
}

/// Push transport driven by the test through `emit`.
#[derive(Default)]
pub struct FakePushTransport {
    sender: Mutex<Option<mpsc::Sender<PushSignal>>>,
    joined: Mutex<Vec<String>>,
    left: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

impl FakePushTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn emit(&self, signal: PushSignal) {
        let sender = self.sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            sender.send(signal).await.expect("push loop alive");
        }
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().unwrap().clone()
    }

    pub fn left(&self) -> Vec<String> {
        self.left.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for FakePushTransport {
    async fn connect(&self) -> Result<mpsc::Receiver<PushSignal>, SyncError> {
        let (tx, rx) = mpsc::channel(16);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn join_project(&self, project_id: &EntityId) -> Result<(), SyncError> {
        self.joined.lock().unwrap().push(project_id.as_str().to_string());
        Ok(())
    }

    async fn leave_project(&self, project_id: &EntityId) -> Result<(), SyncError> {
        self.left.lock().unwrap().push(project_id.as_str().to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SyncError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.sender.lock().unwrap().take();
        Ok(())
    }
}

#[derive(Default)]
pub struct CollectingNotices {
    notices: Mutex<Vec<UserNotice>>,
}

impl CollectingNotices {
    pub fn all(&self) -> Vec<UserNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn messages(&self, level: NoticeLevel) -> Vec<String> {
        self.all()
            .into_iter()
            .filter(|notice| notice.level == level)
            .map(|notice| notice.message)
            .collect()
    }
}

impl NoticeSink for CollectingNotices {
    fn notify(&self, notice: UserNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Store, controller and reconciler sharing one pending registry.
pub struct Core {
    pub store: Arc<EntityStore>,
    pub registry: Arc<PendingRegistry>,
    pub metrics: Arc<SyncMetrics>,
    pub notices: Arc<CollectingNotices>,
    pub controller: Arc<MutationController>,
    pub reconciler: Arc<PushReconciler>,
}

pub fn core() -> Core {
    let store = Arc::new(EntityStore::new());
    let registry = Arc::new(PendingRegistry::new());
    let metrics = Arc::new(SyncMetrics::new());
    let notices = Arc::new(CollectingNotices::default());
    let controller = Arc::new(MutationController::new(
        store.clone(),
        registry.clone(),
        notices.clone(),
        metrics.clone(),
        std::time::Duration::from_secs(30),
    ));
    let reconciler = Arc::new(PushReconciler::new(
        store.clone(),
        registry.clone(),
        metrics.clone(),
    ));
    Core {
        store,
        registry,
        metrics,
        notices,
        controller,
        reconciler,
    }
}

pub struct Harness {
    pub api: Arc<FakeRemoteApi>,
    pub transport: Arc<FakePushTransport>,
    pub notices: Arc<CollectingNotices>,
    pub engine: Arc<SyncEngine>,
}

pub fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

pub fn harness_with(config: SyncConfig) -> Harness {
    let api = Arc::new(FakeRemoteApi::new());
    let transport = Arc::new(FakePushTransport::new());
    let notices = Arc::new(CollectingNotices::default());
    let engine = Arc::new(SyncEngine::new(
        &config,
        api.clone(),
        transport.clone(),
        notices.clone(),
    ));
    Harness {
        api,
        transport,
        notices,
        engine,
    }
}

/// Board with one project `p1` and two tasks.
pub fn seed_board(api: &FakeRemoteApi) {
    api.seed(entity(
        EntityKind::Project,
        json!({"_id": "p1", "name": "Apollo", "members": ["u1"], "version": 1}),
    ));
    api.seed(task(json!({
        "_id": "t1", "project": "p1", "title": "Write docs",
        "status": "To Do", "priority": "Low", "version": 1
    })));
    api.seed(task(json!({
        "_id": "t2", "project": "p1", "title": "Ship",
        "status": "In Progress", "priority": "High", "version": 5
    })));
}

/// Let spawned tasks on the current-thread runtime run until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
