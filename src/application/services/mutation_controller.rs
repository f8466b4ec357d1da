use crate::application::ports::{NoticeSink, RemoteResult};
use crate::application::services::entity_store::EntityStore;
use crate::application::services::pending_registry::{PendingRegistry, SettledMutation};
use crate::domain::entities::{
    Entity, EntityRecord, Mutation, PendingMutation, RecordOrigin, UserNotice,
};
use crate::domain::value_objects::{EntityId, EntityKind, FieldMask, MutationId, VersionTag};
use crate::infrastructure::metrics::{MutationOutcomeStatus, SyncMetrics};
use crate::shared::error::SyncError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub mutation_id: MutationId,
    /// Store record after reconciliation; `None` once the entity is removed.
    pub record: Option<EntityRecord>,
}

/// Applies user intent locally, issues the remote request, then commits or
/// rolls back against whatever the store holds by the time it settles.
pub struct MutationController {
    store: Arc<EntityStore>,
    registry: Arc<PendingRegistry>,
    notices: Arc<dyn NoticeSink>,
    metrics: Arc<SyncMetrics>,
    timeout: Duration,
}

impl MutationController {
    pub fn new(
        store: Arc<EntityStore>,
        registry: Arc<PendingRegistry>,
        notices: Arc<dyn NoticeSink>,
        metrics: Arc<SyncMetrics>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            notices,
            metrics,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PendingRegistry> {
        &self.registry
    }

    /// Run one optimistic mutation.
    ///
    /// `operation` is not polled until the local apply has happened. A second
    /// mutation on the same entity with overlapping fields waits until this one
    /// has settled before it applies anything.
    pub async fn mutate<Fut>(
        &self,
        entity_id: &EntityId,
        mutation: Mutation,
        operation: Fut,
    ) -> Result<MutationOutcome, SyncError>
    where
        Fut: Future<Output = RemoteResult<Option<Entity>>>,
    {
        let pending = PendingMutation::new(entity_id.clone(), mutation.clone());
        let mutation_id = pending.id;

        let blockers = self.registry.lock().enqueue(pending);
        let mut guard = SettleOnDrop {
            controller: self,
            entity_id,
            mutation_id,
            armed: true,
        };
        if !blockers.is_empty() {
            self.metrics.record_queued();
            debug!(
                "mutation {} on {} queued behind {} pending mutation(s)",
                mutation_id,
                entity_id,
                blockers.len()
            );
            for mut blocker in blockers {
                // A dropped sender means the blocker is gone as well.
                let _ = blocker.wait_for(|done| *done).await;
            }
        }

        let kind = match self.apply_locally(entity_id, mutation_id, &mutation) {
            Ok(kind) => kind,
            Err(err) => {
                guard.disarm();
                return Err(err);
            }
        };

        let result = match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result.map_err(SyncError::Remote),
            Err(_) => Err(SyncError::Timeout(self.timeout)),
        };
        guard.disarm();

        match result {
            Ok(remote) => {
                let record = self.commit(entity_id, mutation_id, remote);
                self.metrics
                    .record_mutation(MutationOutcomeStatus::Committed);
                debug!("mutation {} on {} committed", mutation_id, entity_id);
                Ok(MutationOutcome {
                    mutation_id,
                    record,
                })
            }
            Err(err) => {
                self.rollback(entity_id, mutation_id);
                let status = if matches!(err, SyncError::Timeout(_)) {
                    MutationOutcomeStatus::TimedOut
                } else {
                    MutationOutcomeStatus::RolledBack
                };
                self.metrics.record_mutation(status);
                warn!(
                    "mutation {} on {} {} rolled back: {}",
                    mutation_id, kind, entity_id, err
                );
                self.notices.notify(
                    UserNotice::error(
                        format!("Failed to {} {}", mutation.label(), kind),
                        err.is_retryable(),
                    )
                    .for_entity(entity_id),
                );
                Err(err)
            }
        }
    }

    fn apply_locally(
        &self,
        entity_id: &EntityId,
        mutation_id: MutationId,
        mutation: &Mutation,
    ) -> Result<EntityKind, SyncError> {
        let mut table = self.registry.lock();

        let Some(snapshot) = self.store.get(entity_id) else {
            table.settle(entity_id, mutation_id);
            return Err(SyncError::NotFound(format!(
                "entity {entity_id} is not in the store"
            )));
        };
        let kind = snapshot.kind();

        let applied_revision = match mutation {
            Mutation::Patch(delta) => self.store.apply_delta(entity_id, delta),
            Mutation::Remove => {
                self.store.remove(entity_id);
                None
            }
        };
        table.activate(entity_id, mutation_id, Some(snapshot), applied_revision);
        Ok(kind)
    }

    fn commit(
        &self,
        entity_id: &EntityId,
        mutation_id: MutationId,
        remote: Option<Entity>,
    ) -> Option<EntityRecord> {
        let mut table = self.registry.lock();
        let Some(settled) = table.settle(entity_id, mutation_id) else {
            return self.store.get(entity_id);
        };
        let others = table.in_flight_mask(entity_id);
        let origin = origin_for(&others);
        let current = self.store.get(entity_id);

        match (&settled.mutation.mutation, remote) {
            (Mutation::Remove, _) => None,
            (Mutation::Patch(_), None) => {
                if let Some(current) = current {
                    self.store.put_with_origin(current.entity, origin);
                }
                self.store.get(entity_id)
            }
            (Mutation::Patch(_), Some(remote)) => {
                let remote_version = remote.version;
                let mut merged = match current.as_ref() {
                    Some(current) if moved_on(current, &settled) => {
                        debug!(
                            "store moved on while {} was in flight, committing touched fields only",
                            entity_id
                        );
                        let mut entity = current.entity.clone();
                        copy_fields(&mut entity, &remote, &settled.mutation.mask);
                        entity.version = VersionTag::latest(entity.version, remote_version);
                        entity
                    }
                    Some(_) => remote,
                    None => {
                        info!("{} was removed while its update was in flight", entity_id);
                        return None;
                    }
                };

                if let (Some(current), Some(others)) = (current.as_ref(), others.as_ref()) {
                    preserve_fields(&mut merged, &current.entity, others);
                }

                let deferred_is_newer = matches!(
                    (settled.deferred_version, remote_version),
                    (Some(deferred), Some(confirmed)) if deferred > confirmed
                );
                if deferred_is_newer {
                    overlay_deferred(&mut merged, &settled);
                }

                self.store.put_with_origin(merged, origin);
                self.store.get(entity_id)
            }
        }
    }

    fn rollback(&self, entity_id: &EntityId, mutation_id: MutationId) {
        let mut table = self.registry.lock();
        let Some(settled) = table.settle(entity_id, mutation_id) else {
            return;
        };
        let others = table.in_flight_mask(entity_id);
        let Some(snapshot) = settled.mutation.snapshot.clone() else {
            return;
        };
        let current = self.store.get(entity_id);

        let restored = match (&settled.mutation.mutation, current) {
            (Mutation::Remove, None) => {
                let mut entity = snapshot.entity;
                overlay_deferred(&mut entity, &settled);
                entity
            }
            (Mutation::Remove, Some(_)) => {
                info!("{} reappeared before its delete failed, keeping store value", entity_id);
                return;
            }
            (Mutation::Patch(_), None) => {
                info!("{} was removed while its update was in flight", entity_id);
                return;
            }
            (Mutation::Patch(_), Some(current)) => {
                let mut entity = if moved_on(&current, &settled) {
                    let mut entity = current.entity;
                    copy_fields(&mut entity, &snapshot.entity, &settled.mutation.mask);
                    entity
                } else {
                    snapshot.entity
                };
                overlay_deferred(&mut entity, &settled);
                entity
            }
        };

        self.store.put_with_origin(restored, origin_for(&others));
    }
}

/// Settles a mutation whose `mutate` future was dropped before it resolved.
///
/// Before the local apply the entry has no snapshot and is only removed from
/// the queue; afterwards the optimistic value is rolled back.
struct SettleOnDrop<'a> {
    controller: &'a MutationController,
    entity_id: &'a EntityId,
    mutation_id: MutationId,
    armed: bool,
}

impl SettleOnDrop<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(
            "mutation {} on {} cancelled before it settled",
            self.mutation_id, self.entity_id
        );
        self.controller.rollback(self.entity_id, self.mutation_id);
    }
}

fn origin_for(others: &Option<FieldMask>) -> RecordOrigin {
    if others.is_some() {
        RecordOrigin::Optimistic
    } else {
        RecordOrigin::Confirmed
    }
}

fn moved_on(current: &EntityRecord, settled: &SettledMutation) -> bool {
    Some(current.revision) != settled.mutation.applied_revision
}

/// Copy the masked fields from `source`; fields `source` lacks are removed.
fn copy_fields(target: &mut Entity, source: &Entity, mask: &FieldMask) {
    match mask {
        FieldMask::All => {
            target.fields = source.fields.clone();
        }
        FieldMask::Fields(fields) => {
            for field in fields {
                match source.fields.get(field) {
                    Some(value) => {
                        target.fields.insert(field.clone(), value.clone());
                    }
                    None => {
                        target.fields.remove(field);
                    }
                }
            }
        }
    }
}

fn preserve_fields(target: &mut Entity, current: &Entity, mask: &FieldMask) {
    match mask {
        FieldMask::All => *target = current.clone(),
        FieldMask::Fields(_) => copy_fields(target, current, mask),
    }
}

fn overlay_deferred(entity: &mut Entity, settled: &SettledMutation) {
    if settled.deferred.is_empty() {
        return;
    }
    for (field, value) in &settled.deferred {
        entity.fields.insert(field.clone(), value.clone());
    }
    entity.version = VersionTag::latest(entity.version, settled.deferred_version);
}
