//! Collaborator contracts for the hosted table and its change feed, plus two backends.

pub mod filter;
pub mod memory;
pub mod rest;

use crate::core::{FieldPatch, OrderBy, Result, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub use filter::FilterExpr;
pub use memory::{InMemoryStore, QueryGate};
pub use rest::RestStore;

/// Executes filtered reads and scoped writes against a hosted table.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn query(&self, table: &str, filter: &FilterExpr, order: &OrderBy) -> Result<Vec<Row>>;

    async fn update(&self, table: &str, id_field: &str, id: &str, patch: &FieldPatch)
    -> Result<()>;
}

/// Push-based row-level notifications for a table.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Registers a filtered listener. Resolves once the backend acknowledges it.
    async fn subscribe(&self, table: &str, filter: &FilterExpr) -> Result<FeedRegistration>;

    /// Drops a registration. Must be idempotent and must not block.
    fn unsubscribe(&self, id: FeedId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedId(pub u64);

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

/// An acknowledged subscription: its id and the stream of events it delivers.
#[derive(Debug)]
pub struct FeedRegistration {
    pub id: FeedId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub new: Option<Row>,
    pub old: Option<Row>,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(row),
            old: None,
        }
    }

    pub fn update(new: Row, old: Option<Row>) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old,
        }
    }

    pub fn delete(old: Row) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }

    /// Identifier of the affected row, read from `new` first and then `old`.
    pub fn record_id(&self, id_field: &str) -> Option<String> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| row.get(id_field))
            .and_then(|value| value.as_str().map(str::to_string))
    }

    /// True when either side of the event satisfies `filter`.
    pub fn touches(&self, filter: &FilterExpr) -> bool {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .any(|row| filter.matches(row))
    }
}
