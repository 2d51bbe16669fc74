//! Tenant-scoped collection synchronization.

pub mod entity;
pub mod log;
pub mod optimistic;
pub mod policy;
pub mod state;
pub mod subscription;
pub mod synchronizer;

pub use entity::{SyncEntity, apply_patch, changed_fields, from_row, read_fields, to_row};
pub use log::{MemoryLog, NullLog, SyncLog, SyncLogEvent, TracingLog};
pub use optimistic::{EditLedger, EditLocks, EditPermit, PendingEdit};
pub use policy::CollectionPolicy;
pub use state::{SyncPhase, SyncStatus};
pub use subscription::SubscriptionHandle;
pub use synchronizer::{CollectionSynchronizer, SyncDeps};
