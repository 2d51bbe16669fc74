use super::optional_eq;
use crate::core::{RecordId, Result, SyncError, TenantKey, patch_of};
use crate::store::FilterExpr;
use crate::sync::{CollectionPolicy, CollectionSynchronizer, SyncDeps, SyncEntity};
use crate::view::{self, Page};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TABLE: &str = "conex_leads";
pub const TENANT_FIELD: &str = "led_empresa";
pub const PROJECT_FIELD: &str = "lead_projeto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadStatus {
    Pendente,
    Atendido,
}

impl LeadStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Pendente => Self::Atendido,
            Self::Atendido => Self::Pendente,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pendente => "Pendente",
            Self::Atendido => "Atendido",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub led_empresa: Option<String>,
    #[serde(default)]
    pub lead_nome: Option<String>,
    #[serde(default)]
    pub lead_whatsapp: Option<String>,
    #[serde(default)]
    pub lead_perfil: Option<String>,
    pub status: LeadStatus,
    #[serde(default)]
    pub lead_projeto: Option<String>,
}

impl SyncEntity for Lead {
    fn record_id(&self) -> &str {
        &self.uid
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Newest first; every change refetches.
pub fn policy() -> CollectionPolicy {
    CollectionPolicy::new(TABLE, TENANT_FIELD)
}

pub fn project_filter(project_id: Option<&str>) -> Option<FilterExpr> {
    optional_eq(PROJECT_FIELD, project_id)
}

/// The leads screen: a company's leads, optionally narrowed to one project.
pub struct Leads {
    sync: CollectionSynchronizer<Lead>,
}

impl Leads {
    pub async fn start(deps: SyncDeps, tenant: Option<TenantKey>, project_id: Option<&str>) -> Self {
        let sync =
            CollectionSynchronizer::start(deps, policy(), tenant, project_filter(project_id)).await;
        Self { sync }
    }

    pub fn sync(&self) -> &CollectionSynchronizer<Lead> {
        &self.sync
    }

    pub async fn select_project(&self, project_id: Option<&str>) {
        self.sync.set_filter(project_filter(project_id)).await;
    }

    pub async fn set_status(&self, lead_id: &str, status: LeadStatus) -> Result<()> {
        self.sync
            .edit(&RecordId::from(lead_id), patch_of("status", status.as_str()))
            .await
    }

    /// Flips Pendente/Atendido and returns the requested status.
    pub async fn toggle_status(&self, lead_id: &str) -> Result<LeadStatus> {
        let current = self
            .sync
            .get(lead_id)
            .ok_or_else(|| SyncError::RecordNotFound(lead_id.to_string()))?;
        let next = current.status.toggled();
        self.set_status(lead_id, next).await?;
        Ok(next)
    }

    pub fn count_with_status(&self, status: LeadStatus) -> usize {
        self.sync
            .snapshot()
            .iter()
            .filter(|lead| lead.status == status)
            .count()
    }

    /// Matches name, WhatsApp or profile.
    pub fn search(&self, query: &str) -> Vec<Lead> {
        let leads = self.sync.snapshot();
        view::search(&leads, query, |lead| {
            [&lead.lead_nome, &lead.lead_whatsapp, &lead.lead_perfil]
                .into_iter()
                .filter_map(|field| field.as_deref())
                .collect()
        })
        .into_iter()
        .cloned()
        .collect()
    }

    pub fn page(&self, page: usize, per_page: usize) -> Page<Lead> {
        view::paginate(&self.sync.snapshot(), page, per_page)
    }
}
