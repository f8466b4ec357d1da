pub mod entity_store;
pub mod mutation_controller;
pub mod notification_service;
pub mod pending_registry;
pub mod push_reconciler;
pub mod resync_service;
pub mod sync_engine;

pub use entity_store::{ChangeKind, EntityStore, StoreChange, StoreSubscription};
pub use mutation_controller::{MutationController, MutationOutcome};
pub use notification_service::{NotificationService, PollingHandle};
pub use pending_registry::{PendingRegistry, PendingTable, SettledMutation};
pub use push_reconciler::{PushReconciler, ReconcileOutcome, SnapshotReport, SnapshotScope};
pub use resync_service::{ConnectTransition, ConnectionTracker, ResyncReport, ResyncService};
pub use sync_engine::{SignalOutcome, SyncEngine};
