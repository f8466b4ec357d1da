pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;

pub use application::services::{SignalOutcome, SyncEngine};
pub use shared::{Result, SyncConfig, SyncError};
