use crate::core::TenantKey;
use serde::Serialize;
use std::fmt;

/// Lifecycle of one synchronizer instance.
///
/// `Idle` has no tenant; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    Idle,
    Loading,
    Ready,
    Error,
    Stopped,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "IDLE",
            Self::Loading => "LOADING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
        };
        write!(f, "{label}")
    }
}

/// Read-only status a screen renders next to the collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub loading: bool,
    pub error: Option<String>,
    pub is_subscribed: bool,
    pub tenant: Option<TenantKey>,
    pub records: usize,
    pub pending_edits: usize,
}
