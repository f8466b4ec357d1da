pub mod entity_id;
pub mod entity_kind;
pub mod field_delta;
pub mod mutation_id;
pub mod task_status;
pub mod version_tag;

pub use entity_id::EntityId;
pub use entity_kind::EntityKind;
pub use field_delta::{FieldDelta, FieldMask};
pub use mutation_id::MutationId;
pub use task_status::{TaskPriority, TaskStatus};
pub use version_tag::VersionTag;
