use crate::application::services::entity_store::EntityStore;
use crate::application::services::pending_registry::{PendingRegistry, PendingTable};
use crate::domain::entities::entity::id_string;
use crate::domain::entities::task::project_id_of;
use crate::domain::entities::{Entity, EntityRecord, PushEvent, RawPushEvent, RecordOrigin};
use crate::domain::value_objects::{EntityId, EntityKind, FieldMask, VersionTag};
use crate::infrastructure::metrics::SyncMetrics;
use serde::Serialize;
use serde_json::Map;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing was in flight; the record was replaced.
    Applied,
    /// Unmasked fields were merged; `deferred` masked fields wait for the mutation.
    Merged { deferred: usize },
    /// Nothing could be written yet.
    Deferred { fields: usize },
    Stale,
    Malformed,
}

/// Which stored records a snapshot is authoritative for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotScope {
    All,
    /// Tasks belonging to one project.
    Project(EntityId),
    /// Comments on one task.
    Task(EntityId),
}

impl SnapshotScope {
    pub fn contains(&self, entity: &Entity) -> bool {
        match self {
            SnapshotScope::All => true,
            SnapshotScope::Project(project_id) => {
                project_id_of(entity).as_deref() == Some(project_id.as_str())
            }
            SnapshotScope::Task(task_id) => entity
                .field("task")
                .or_else(|| entity.field("taskId"))
                .and_then(id_string)
                .is_some_and(|id| id == task_id.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReport {
    pub applied: usize,
    pub merged: usize,
    pub deferred: usize,
    pub stale: usize,
    pub removed: usize,
}

impl SnapshotReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Applied => self.applied += 1,
            ReconcileOutcome::Merged { .. } => self.merged += 1,
            ReconcileOutcome::Deferred { .. } => self.deferred += 1,
            ReconcileOutcome::Stale | ReconcileOutcome::Malformed => self.stale += 1,
        }
    }
}

/// Merges server-pushed entities into the store without clobbering fields
/// that an in-flight optimistic mutation owns.
pub struct PushReconciler {
    store: Arc<EntityStore>,
    registry: Arc<PendingRegistry>,
    metrics: Arc<SyncMetrics>,
}

impl PushReconciler {
    pub fn new(
        store: Arc<EntityStore>,
        registry: Arc<PendingRegistry>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    /// Decode and apply one transport event. Never fails: undecodable
    /// events are logged and reported as `Malformed`.
    pub fn on_raw_event(&self, raw: RawPushEvent) -> ReconcileOutcome {
        let name = raw.name.clone();
        match PushEvent::decode(raw) {
            Ok(event) => self.on_remote_event(event.entity),
            Err(err) => {
                warn!("Dropping push event `{}`: {}", name, err);
                self.metrics.record_push_malformed();
                ReconcileOutcome::Malformed
            }
        }
    }

    pub fn on_remote_event(&self, entity: Entity) -> ReconcileOutcome {
        let id = entity.id.clone();
        let outcome = self.apply_fetched(entity);

        match outcome {
            ReconcileOutcome::Applied => self.metrics.record_push_applied(),
            ReconcileOutcome::Merged { .. } => self.metrics.record_push_merged(),
            ReconcileOutcome::Deferred { .. } => self.metrics.record_push_deferred(),
            ReconcileOutcome::Stale => {
                debug!("Stale push for {} dropped", id);
                self.metrics.record_push_stale();
            }
            ReconcileOutcome::Malformed => self.metrics.record_push_malformed(),
        }
        outcome
    }

    /// Same rules as a push, for a single entity fetched over REST.
    pub fn apply_fetched(&self, entity: Entity) -> ReconcileOutcome {
        let mut table = self.registry.lock();
        self.reconcile(&mut table, entity)
    }

    /// Apply a freshly fetched list as the truth for `scope`.
    ///
    /// Every entity goes through the same masking rules as a push. Stored
    /// records of `kind` in scope that the list no longer contains are removed,
    /// unless a mutation is pending for them.
    pub fn apply_snapshot(
        &self,
        kind: EntityKind,
        scope: &SnapshotScope,
        entities: Vec<Entity>,
    ) -> SnapshotReport {
        let mut report = SnapshotReport::default();
        let mut table = self.registry.lock();

        let mut seen = HashSet::with_capacity(entities.len());
        for entity in entities {
            if entity.kind != kind {
                warn!(
                    "Snapshot for {} contained a {} ({}), skipped",
                    kind, entity.kind, entity.id
                );
                continue;
            }
            seen.insert(entity.id.clone());
            let outcome = self.reconcile(&mut table, entity);
            report.record(outcome);
        }

        let missing: Vec<EntityId> = self
            .store
            .list(kind)
            .into_iter()
            .filter(|record| scope.contains(&record.entity))
            .map(|record| record.entity.id)
            .filter(|id| !seen.contains(id) && !table.has_pending(id))
            .collect();
        for id in missing {
            debug!("{} {} no longer on the server, removing", kind, id);
            self.store.remove(&id);
            report.removed += 1;
        }

        report
    }

    fn reconcile(&self, table: &mut PendingTable, entity: Entity) -> ReconcileOutcome {
        let current = self.store.get(&entity.id);
        let mask = table.in_flight_mask(&entity.id);

        if is_stale(current.as_ref(), entity.version, mask.is_some()) {
            return ReconcileOutcome::Stale;
        }

        match mask {
            None => {
                self.store.put(entity);
                ReconcileOutcome::Applied
            }
            Some(mask) => merge_unmasked(&self.store, table, current, entity, &mask),
        }
    }
}

fn is_stale(current: Option<&EntityRecord>, incoming: Option<VersionTag>, in_flight: bool) -> bool {
    match (current.and_then(EntityRecord::version), incoming) {
        (Some(current), Some(incoming)) => {
            incoming < current || (incoming == current && !in_flight)
        }
        _ => false,
    }
}

fn merge_unmasked(
    store: &EntityStore,
    table: &mut PendingTable,
    current: Option<EntityRecord>,
    incoming: Entity,
    mask: &FieldMask,
) -> ReconcileOutcome {
    let Entity {
        id,
        kind,
        fields,
        version,
    } = incoming;
    let mut merged = match current {
        Some(record) => record.entity,
        None => Entity {
            id: id.clone(),
            kind,
            fields: Map::new(),
            version: None,
        },
    };

    let mut changed = false;
    let mut deferred = 0;
    let mut bookkeeping = Map::new();
    for (field, value) in fields {
        if is_bookkeeping(&field) {
            bookkeeping.insert(field, value);
        } else if mask.covers(&field) {
            if table.defer(&id, field, value, version) {
                deferred += 1;
            }
        } else if merged.fields.get(&field) != Some(&value) {
            merged.fields.insert(field, value);
            changed = true;
        }
    }

    if !changed {
        debug!("Push for {} fully deferred ({} field(s))", id, deferred);
        return ReconcileOutcome::Deferred { fields: deferred };
    }

    let incoming_is_newer = match (merged.version, version) {
        (Some(current), Some(incoming)) => incoming >= current,
        (None, _) => true,
        (Some(_), None) => false,
    };
    if incoming_is_newer {
        merged.fields.extend(bookkeeping);
    }
    merged.version = VersionTag::latest(merged.version, version);
    store.put_with_origin(merged, RecordOrigin::Optimistic);
    debug!("Push for {} merged, {} field(s) deferred", id, deferred);
    ReconcileOutcome::Merged { deferred }
}

/// Identity and version keys never count as a field change on their own.
fn is_bookkeeping(field: &str) -> bool {
    matches!(field, "_id" | "id" | "version" | "__v" | "updatedAt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Mutation, PendingMutation};
    use crate::domain::value_objects::FieldDelta;
    use serde_json::{json, Value};

    struct Fixture {
        store: Arc<EntityStore>,
        registry: Arc<PendingRegistry>,
        metrics: Arc<SyncMetrics>,
        reconciler: PushReconciler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(EntityStore::new());
        let registry = Arc::new(PendingRegistry::new());
        let metrics = Arc::new(SyncMetrics::new());
        let reconciler = PushReconciler::new(store.clone(), registry.clone(), metrics.clone());
        Fixture {
            store,
            registry,
            metrics,
            reconciler,
        }
    }

    fn task(payload: Value) -> Entity {
        Entity::from_payload(EntityKind::Task, payload).unwrap()
    }

    fn id(raw: &str) -> EntityId {
        EntityId::try_from(raw).unwrap()
    }

    /// Register an in-flight patch the way the controller would.
    fn in_flight(fixture: &Fixture, entity: &str, delta: Value) {
        let mutation = Mutation::Patch(FieldDelta::new(delta).unwrap());
        let pending = PendingMutation::new(id(entity), mutation.clone());
        let mutation_id = pending.id;
        let mut table = fixture.registry.lock();
        table.enqueue(pending);
        let snapshot = fixture.store.get(&id(entity));
        let revision = match &mutation {
            Mutation::Patch(delta) => fixture.store.apply_delta(&id(entity), delta),
            Mutation::Remove => None,
        };
        table.activate(&id(entity), mutation_id, snapshot, revision);
    }

    #[test]
    fn applies_unconditionally_without_pending_mutation() {
        let f = fixture();
        f.store.put(task(json!({"_id": "t1", "status": "To Do", "version": 1})));

        let outcome = f
            .reconciler
            .on_remote_event(task(json!({"_id": "t1", "status": "Review", "version": 2})));

        assert_eq!(outcome, ReconcileOutcome::Applied);
        let record = f.store.get(&id("t1")).unwrap();
        assert_eq!(record.entity.str_field("status"), Some("Review"));
        assert_eq!(record.origin, RecordOrigin::Confirmed);
    }

    #[test]
    fn older_and_equal_versions_are_dropped() {
        let f = fixture();
        f.store.put(task(json!({"_id": "t2", "title": "A", "version": 5})));

        let older = f
            .reconciler
            .on_remote_event(task(json!({"_id": "t2", "title": "B", "version": 4})));
        let duplicate = f
            .reconciler
            .on_remote_event(task(json!({"_id": "t2", "title": "C", "version": 5})));

        assert_eq!(older, ReconcileOutcome::Stale);
        assert_eq!(duplicate, ReconcileOutcome::Stale);
        assert_eq!(f.store.get(&id("t2")).unwrap().entity.str_field("title"), Some("A"));
        assert_eq!(f.metrics.snapshot().push_stale, 2);
    }

    #[test]
    fn unversioned_events_are_never_stale() {
        let f = fixture();
        f.store.put(task(json!({"_id": "t1", "title": "A", "version": 5})));
        let outcome = f
            .reconciler
            .on_remote_event(task(json!({"_id": "t1", "title": "B"})));
        assert_eq!(outcome, ReconcileOutcome::Applied);
    }

    #[test]
    fn masked_fields_are_deferred_and_others_merged() {
        let f = fixture();
        f.store.put(task(
            json!({"_id": "t1", "status": "To Do", "priority": "Low", "version": 1}),
        ));
        in_flight(&f, "t1", json!({"status": "Done"}));

        let outcome = f.reconciler.on_remote_event(task(
            json!({"_id": "t1", "status": "In Progress", "priority": "High", "version": 2}),
        ));

        assert_eq!(outcome, ReconcileOutcome::Merged { deferred: 1 });
        let record = f.store.get(&id("t1")).unwrap();
        assert_eq!(record.entity.str_field("status"), Some("Done"));
        assert_eq!(record.entity.str_field("priority"), Some("High"));
        assert_eq!(record.version(), Some(VersionTag::new(2)));
        assert!(record.is_optimistic());

        let pending = f.registry.lock().pending_for(&id("t1"));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn equal_version_is_accepted_while_mutation_in_flight() {
        let f = fixture();
        f.store.put(task(json!({"_id": "t1", "status": "To Do", "version": 3})));
        in_flight(&f, "t1", json!({"status": "Done"}));

        let outcome = f.reconciler.on_remote_event(task(
            json!({"_id": "t1", "status": "To Do", "assignedTo": "u2", "version": 3}),
        ));
        assert_eq!(outcome, ReconcileOutcome::Merged { deferred: 1 });
    }

    #[test]
    fn push_touching_only_masked_fields_is_deferred() {
        let f = fixture();
        f.store.put(task(json!({"_id": "t1", "status": "To Do", "version": 1})));
        in_flight(&f, "t1", json!({"status": "Done"}));
        let revision = f.store.revision_of(&id("t1"));

        let outcome = f
            .reconciler
            .on_remote_event(task(json!({"_id": "t1", "status": "Review", "version": 2})));

        assert_eq!(outcome, ReconcileOutcome::Deferred { fields: 1 });
        assert_eq!(f.store.revision_of(&id("t1")), revision);
        assert_eq!(f.metrics.snapshot().push_deferred, 1);
    }

    #[test]
    fn malformed_event_is_reported_not_propagated() {
        let f = fixture();
        let outcome = f
            .reconciler
            .on_raw_event(RawPushEvent::new("task-updated", json!({"status": "Done"})));
        assert_eq!(outcome, ReconcileOutcome::Malformed);

        let outcome = f
            .reconciler
            .on_raw_event(RawPushEvent::new("mystery", json!({"_id": "x"})));
        assert_eq!(outcome, ReconcileOutcome::Malformed);
        assert_eq!(f.metrics.snapshot().push_malformed, 2);
        assert!(f.store.is_empty());
    }

    #[test]
    fn snapshot_removes_missing_records_in_scope_only() {
        let f = fixture();
        f.store.put(task(json!({"_id": "t1", "project": "p1", "version": 1})));
        f.store.put(task(json!({"_id": "t2", "project": "p1", "version": 1})));
        f.store.put(task(json!({"_id": "t3", "project": "p1", "version": 1})));
        f.store.put(task(json!({"_id": "t9", "project": "p2", "version": 1})));
        in_flight(&f, "t3", json!({"title": "Renamed"}));

        let report = f.reconciler.apply_snapshot(
            EntityKind::Task,
            &SnapshotScope::Project(id("p1")),
            vec![
                task(json!({"_id": "t1", "project": "p1", "version": 2})),
                task(json!({"_id": "t4", "project": "p1", "version": 1})),
            ],
        );

        assert_eq!(report.applied, 2);
        assert_eq!(report.removed, 1);
        assert!(f.store.get(&id("t2")).is_none());
        assert!(f.store.get(&id("t3")).is_some());
        assert!(f.store.get(&id("t4")).is_some());
        assert!(f.store.get(&id("t9")).is_some());
    }

    #[test]
    fn task_scope_matches_populated_reference() {
        let comment = Entity::from_payload(
            EntityKind::Comment,
            json!({"_id": "c1", "task": {"_id": "t1"}, "text": "hi"}),
        )
        .unwrap();
        assert!(SnapshotScope::Task(id("t1")).contains(&comment));
        assert!(!SnapshotScope::Task(id("t2")).contains(&comment));
    }
}
