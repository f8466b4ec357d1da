pub mod entity;
pub mod notice;
pub mod notification;
pub mod pending_mutation;
pub mod project;
pub mod push_event;
pub mod task;

pub use entity::{Entity, EntityRecord, RecordOrigin};
pub use notice::{NoticeLevel, UserNotice};
pub use notification::{Notification, NotificationLevel};
pub use pending_mutation::{Mutation, PendingMutation, PendingState};
pub use project::Project;
pub use push_event::{PushEvent, PushEventName, PushSignal, RawPushEvent};
pub use task::Task;
