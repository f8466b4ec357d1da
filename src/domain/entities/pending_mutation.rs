use crate::domain::entities::EntityRecord;
use crate::domain::value_objects::{EntityId, FieldDelta, FieldMask, MutationId};
use chrono::{DateTime, Utc};

/// The local change a mutation makes ahead of the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Patch(FieldDelta),
    Remove,
}

impl Mutation {
    pub fn mask(&self) -> FieldMask {
        match self {
            Mutation::Patch(delta) => FieldMask::Fields(delta.field_names()),
            Mutation::Remove => FieldMask::All,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mutation::Patch(_) => "update",
            Mutation::Remove => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    /// Waiting behind an earlier mutation with overlapping fields.
    Queued,
    /// Applied locally, remote request outstanding.
    InFlight,
}

#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub id: MutationId,
    pub entity_id: EntityId,
    pub mutation: Mutation,
    pub mask: FieldMask,
    pub snapshot: Option<EntityRecord>,
    pub applied_revision: Option<u64>,
    pub state: PendingState,
    pub created_at: DateTime<Utc>,
}

impl PendingMutation {
    pub fn new(entity_id: EntityId, mutation: Mutation) -> Self {
        let mask = mutation.mask();
        Self {
            id: MutationId::generate(),
            entity_id,
            mutation,
            mask,
            snapshot: None,
            applied_revision: None,
            state: PendingState::Queued,
            created_at: Utc::now(),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.state == PendingState::InFlight
    }
}
