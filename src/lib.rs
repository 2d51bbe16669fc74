// ============================================================================
// conex-sync Library
// ============================================================================

pub mod config;
pub mod core;
pub mod features;
pub mod store;
pub mod sync;
pub mod view;
pub mod webhook;

// Re-export main types for convenience
pub use config::{RetryPolicy, SyncConfig, WebhookConfig};
pub use core::{FieldPatch, OrderBy, RecordId, Result, Row, SortDirection, SyncError, TenantKey};
pub use store::{
    ChangeEvent, ChangeFeed, ChangeKind, FeedId, FeedRegistration, FilterExpr, InMemoryStore,
    RemoteStore, RestStore,
};
pub use sync::{
    CollectionPolicy, CollectionSynchronizer, MemoryLog, NullLog, SyncDeps, SyncEntity, SyncLog,
    SyncLogEvent, SyncPhase, SyncStatus, TracingLog,
};
pub use view::{Page, paginate};
pub use webhook::{CnpjRegistry, CompanyProfile, WebhookClient};
