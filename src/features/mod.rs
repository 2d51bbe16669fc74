//! Per-feature collections built on [`CollectionSynchronizer`](crate::sync::CollectionSynchronizer).
//!
//! Each feature only supplies its record type, table, tenant column, base
//! filter and silent-field set; the synchronization itself is shared.

pub mod conversations;
pub mod knowledge_bases;
pub mod leads;
pub mod projects;

pub use conversations::{Conversation, ConversationScope, Conversations, OriginCounts};
pub use knowledge_bases::{KnowledgeBase, KnowledgeBases};
pub use leads::{Lead, LeadStatus, Leads};
pub use projects::{Project, Projects};

use crate::store::FilterExpr;

/// Blank selections (an empty dropdown value) mean "no filter".
pub(crate) fn optional_eq(field: &str, value: Option<&str>) -> Option<FilterExpr> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| FilterExpr::eq(field, value))
}
