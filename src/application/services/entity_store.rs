use crate::domain::entities::{Entity, EntityRecord, RecordOrigin};
use crate::domain::value_objects::{EntityId, EntityKind, FieldDelta};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Put,
    Delta,
    Removed,
}

/// 描画側へ通知される変更内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreChange {
    pub id: EntityId,
    pub kind: EntityKind,
    pub change: ChangeKind,
    pub revision: u64,
}

type ChangeCallback = Arc<dyn Fn(&StoreChange) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, ChangeCallback>,
}

#[derive(Default)]
struct StoreState {
    records: HashMap<EntityId, EntityRecord>,
    next_revision: u64,
}

impl StoreState {
    fn bump(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }
}

/// クライアント側の正規状態を保持するストア
///
/// All writes go through `put`, `apply_delta` and `remove`. Locks are never
/// held across an await point, and subscribers are called after the write
/// lock has been released.
pub struct EntityStore {
    state: RwLock<StoreState>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    /// IDでレコードを取得
    pub fn get(&self, id: &EntityId) -> Option<EntityRecord> {
        self.read().records.get(id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.read().records.contains_key(id)
    }

    pub fn revision_of(&self, id: &EntityId) -> Option<u64> {
        self.read().records.get(id).map(|record| record.revision)
    }

    /// 確定済みの値でレコードを置き換える（存在しなければ新規追加）
    pub fn put(&self, entity: Entity) -> u64 {
        self.put_with_origin(entity, RecordOrigin::Confirmed)
    }

    pub(crate) fn put_with_origin(&self, entity: Entity, origin: RecordOrigin) -> u64 {
        let change = {
            let mut state = self.write();
            let revision = state.bump();
            let change = StoreChange {
                id: entity.id.clone(),
                kind: entity.kind,
                change: ChangeKind::Put,
                revision,
            };
            state.records.insert(
                entity.id.clone(),
                EntityRecord {
                    entity,
                    origin,
                    revision,
                },
            );
            change
        };

        self.notify(&change);
        change.revision
    }

    /// フィールド単位でマージする。バージョンタグは変更しない。
    ///
    /// Returns the new revision, or `None` when the record does not exist.
    pub fn apply_delta(&self, id: &EntityId, delta: &FieldDelta) -> Option<u64> {
        let change = {
            let mut state = self.write();
            if !state.records.contains_key(id) {
                debug!("apply_delta on unknown entity {}", id);
                return None;
            }
            let revision = state.bump();
            let record = state.records.get_mut(id)?;
            record.entity.merge_delta(delta);
            record.origin = RecordOrigin::Optimistic;
            record.revision = revision;
            StoreChange {
                id: id.clone(),
                kind: record.entity.kind,
                change: ChangeKind::Delta,
                revision,
            }
        };

        self.notify(&change);
        Some(change.revision)
    }

    /// レコードを削除（存在しない場合は何もしない）
    pub fn remove(&self, id: &EntityId) -> Option<EntityRecord> {
        let (removed, change) = {
            let mut state = self.write();
            let removed = state.records.remove(id)?;
            let revision = state.bump();
            let change = StoreChange {
                id: id.clone(),
                kind: removed.entity.kind,
                change: ChangeKind::Removed,
                revision,
            };
            (removed, change)
        };

        self.notify(&change);
        Some(removed)
    }

    pub fn list(&self, kind: EntityKind) -> Vec<EntityRecord> {
        let mut records: Vec<EntityRecord> = self
            .read()
            .records
            .values()
            .filter(|record| record.entity.kind == kind)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
        records
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a render callback. The callback stays registered until the
    /// returned subscription is dropped. Callbacks must not block.
    pub fn subscribe<F>(&self, callback: F) -> StoreSubscription
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        let mut subscribers = lock_subscribers(&self.subscribers);
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.callbacks.insert(id, Arc::new(callback));

        StoreSubscription {
            id,
            registry: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock_subscribers(&self.subscribers).callbacks.len()
    }

    /// Drop every record and subscriber. The store stays usable afterwards.
    pub fn dispose(&self) {
        let removed = {
            let mut state = self.write();
            let count = state.records.len();
            state.records.clear();
            count
        };
        lock_subscribers(&self.subscribers).callbacks.clear();
        debug!("entity store disposed ({} records dropped)", removed);
    }

    fn notify(&self, change: &StoreChange) {
        let callbacks: Vec<ChangeCallback> = lock_subscribers(&self.subscribers)
            .callbacks
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(change);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_subscribers(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle for a render subscription; released on drop.
pub struct StoreSubscription {
    id: u64,
    registry: Weak<Mutex<Subscribers>>,
}

impl StoreSubscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock_subscribers(&registry).callbacks.remove(&self.id);
        }
    }
}
