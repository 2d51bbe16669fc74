use crate::core::{SortDirection, TenantKey};
use crate::store::FilterExpr;
use crate::sync::{CollectionPolicy, CollectionSynchronizer, SyncDeps, SyncEntity};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const TABLE: &str = "conex_conversas";
pub const TENANT_FIELD: &str = "empresa";
pub const DASHBOARD_WINDOW_DAYS: i64 = 30;

pub const ORIGIN_ASSISTANT: &str = "Assistente";
pub const ORIGIN_HUMAN: &str = "Humano";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub mensagem: Option<String>,
    #[serde(default)]
    pub origem: Option<String>,
    #[serde(default)]
    pub remote_jid: Option<String>,
    #[serde(default, rename = "messageTimestamp")]
    pub message_timestamp: Option<String>,
    #[serde(default, rename = "messageType")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub fonte_tipo: Option<String>,
}

impl SyncEntity for Conversation {
    fn record_id(&self) -> &str {
        &self.uid
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Oldest first, like a chat log.
pub fn policy() -> CollectionPolicy {
    CollectionPolicy::new(TABLE, TENANT_FIELD).order(SortDirection::Ascending)
}

/// The two ways the same table is viewed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationScope {
    /// One lead's thread, keyed by its WhatsApp JID.
    Thread { remote_jid: String },
    /// Everything created since `since`, for the dashboard counters.
    Dashboard { since: DateTime<Utc> },
}

impl ConversationScope {
    pub fn thread(remote_jid: &str) -> Self {
        Self::Thread {
            remote_jid: remote_jid.trim().to_string(),
        }
    }

    /// The last 30 days, measured from `now`.
    pub fn dashboard(now: DateTime<Utc>) -> Self {
        Self::Dashboard {
            since: now - Duration::days(DASHBOARD_WINDOW_DAYS),
        }
    }

    /// A lead's thread when one is selected, the dashboard window otherwise.
    pub fn for_lead(remote_jid: Option<&str>, now: DateTime<Utc>) -> Self {
        match remote_jid.map(str::trim).filter(|jid| !jid.is_empty()) {
            Some(jid) => Self::thread(jid),
            None => Self::dashboard(now),
        }
    }

    pub fn filter(&self) -> FilterExpr {
        match self {
            Self::Thread { remote_jid } => FilterExpr::eq("remote_jid", remote_jid.as_str()),
            Self::Dashboard { since } => FilterExpr::gte(
                "created_at",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OriginCounts {
    pub assistant: usize,
    pub human: usize,
}

impl OriginCounts {
    /// Other origins are not counted.
    pub fn tally(conversations: &[Conversation]) -> Self {
        conversations
            .iter()
            .fold(Self::default(), |mut counts, conversation| {
                match conversation.origem.as_deref() {
                    Some(ORIGIN_ASSISTANT) => counts.assistant += 1,
                    Some(ORIGIN_HUMAN) => counts.human += 1,
                    _ => {}
                }
                counts
            })
    }
}

pub struct Conversations {
    sync: CollectionSynchronizer<Conversation>,
}

impl Conversations {
    pub async fn start(deps: SyncDeps, tenant: Option<TenantKey>, scope: ConversationScope) -> Self {
        Self {
            sync: CollectionSynchronizer::start(deps, policy(), tenant, Some(scope.filter())).await,
        }
    }

    pub fn sync(&self) -> &CollectionSynchronizer<Conversation> {
        &self.sync
    }

    /// Swaps thread/dashboard without touching the tenant scope.
    pub async fn set_scope(&self, scope: ConversationScope) {
        self.sync.set_filter(Some(scope.filter())).await;
    }

    pub fn origin_counts(&self) -> OriginCounts {
        OriginCounts::tally(&self.sync.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dashboard_window_is_thirty_days() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        assert_eq!(
            ConversationScope::for_lead(None, now).filter(),
            FilterExpr::gte("created_at", "2024-05-31T12:00:00Z")
        );
        assert_eq!(
            ConversationScope::for_lead(Some(" 5511@s.whatsapp.net "), now).filter(),
            FilterExpr::eq("remote_jid", "5511@s.whatsapp.net")
        );
    }
}
