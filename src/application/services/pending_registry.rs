use crate::domain::entities::{EntityRecord, PendingMutation, PendingState};
use crate::domain::value_objects::{EntityId, FieldMask, MutationId, VersionTag};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

struct PendingEntry {
    mutation: PendingMutation,
    done: watch::Sender<bool>,
    deferred: Map<String, Value>,
    deferred_version: Option<VersionTag>,
}

/// A mutation removed from the registry, together with any push values
/// that arrived for its fields while it was in flight.
#[derive(Debug, Clone)]
pub struct SettledMutation {
    pub mutation: PendingMutation,
    pub deferred: Map<String, Value>,
    pub deferred_version: Option<VersionTag>,
}

/// Per-entity FIFO of pending mutations.
///
/// Stands in for a lock across await points: a mutation only applies once
/// every earlier mutation with overlapping fields on the same entity has
/// settled.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<EntityId, Vec<PendingEntry>>,
}

impl PendingTable {
    /// Register a mutation at the back of its entity's queue and return the
    /// completion signals of the earlier mutations it has to wait for.
    pub fn enqueue(&mut self, mutation: PendingMutation) -> Vec<watch::Receiver<bool>> {
        let queue = self.entries.entry(mutation.entity_id.clone()).or_default();
        let blockers = queue
            .iter()
            .filter(|entry| entry.mutation.mask.overlaps(&mutation.mask))
            .map(|entry| entry.done.subscribe())
            .collect();

        let (done, _) = watch::channel(false);
        queue.push(PendingEntry {
            mutation,
            done,
            deferred: Map::new(),
            deferred_version: None,
        });
        blockers
    }

    pub fn activate(
        &mut self,
        entity_id: &EntityId,
        mutation_id: MutationId,
        snapshot: Option<EntityRecord>,
        applied_revision: Option<u64>,
    ) {
        if let Some(entry) = self.entry_mut(entity_id, mutation_id) {
            entry.mutation.snapshot = snapshot;
            entry.mutation.applied_revision = applied_revision;
            entry.mutation.state = PendingState::InFlight;
        }
    }

    /// Union of the fields owned by in-flight mutations, `None` when nothing is in flight.
    pub fn in_flight_mask(&self, entity_id: &EntityId) -> Option<FieldMask> {
        let queue = self.entries.get(entity_id)?;
        let mut mask: Option<FieldMask> = None;
        for entry in queue.iter().filter(|entry| entry.mutation.is_in_flight()) {
            match mask.as_mut() {
                Some(existing) => existing.union(&entry.mutation.mask),
                None => mask = Some(entry.mutation.mask.clone()),
            }
        }
        mask
    }

    pub fn has_pending(&self, entity_id: &EntityId) -> bool {
        self.entries
            .get(entity_id)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// Hold back a pushed field value for the in-flight mutation that owns the field.
    pub fn defer(
        &mut self,
        entity_id: &EntityId,
        field: String,
        value: Value,
        version: Option<VersionTag>,
    ) -> bool {
        let Some(queue) = self.entries.get_mut(entity_id) else {
            return false;
        };
        let Some(entry) = queue
            .iter_mut()
            .find(|entry| entry.mutation.is_in_flight() && entry.mutation.mask.covers(&field))
        else {
            return false;
        };

        entry.deferred.insert(field, value);
        entry.deferred_version = VersionTag::latest(entry.deferred_version, version);
        true
    }

    /// Remove a mutation and wake whoever queued behind it.
    pub fn settle(&mut self, entity_id: &EntityId, mutation_id: MutationId) -> Option<SettledMutation> {
        let queue = self.entries.get_mut(entity_id)?;
        let position = queue
            .iter()
            .position(|entry| entry.mutation.id == mutation_id)?;
        let entry = queue.remove(position);
        if queue.is_empty() {
            self.entries.remove(entity_id);
        }

        let _ = entry.done.send(true);
        Some(SettledMutation {
            mutation: entry.mutation,
            deferred: entry.deferred,
            deferred_version: entry.deferred_version,
        })
    }

    /// Drop every entry and wake all waiters. Mutations still running find
    /// nothing to settle afterwards and leave the store alone.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        for (_, queue) in self.entries.drain() {
            for entry in queue {
                let _ = entry.done.send(true);
                drained += 1;
            }
        }
        drained
    }

    pub fn pending_for(&self, entity_id: &EntityId) -> Vec<PendingMutation> {
        self.entries
            .get(entity_id)
            .map(|queue| queue.iter().map(|entry| entry.mutation.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, entity_id: &EntityId, mutation_id: MutationId) -> Option<&mut PendingEntry> {
        self.entries
            .get_mut(entity_id)?
            .iter_mut()
            .find(|entry| entry.mutation.id == mutation_id)
    }
}

/// Shared handle on the pending table. Lock order is registry, then store.
#[derive(Default)]
pub struct PendingRegistry {
    table: Mutex<PendingTable>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn has_pending(&self, entity_id: &EntityId) -> bool {
        self.lock().has_pending(entity_id)
    }

    pub fn drain(&self) -> usize {
        self.lock().drain()
    }
}
