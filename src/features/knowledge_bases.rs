use crate::core::{RecordId, Result, SyncError, TenantKey, patch_of};
use crate::store::FilterExpr;
use crate::sync::{CollectionPolicy, CollectionSynchronizer, SyncDeps, SyncEntity};
use crate::view::{self, Page};
use crate::webhook::{KnowledgeTableRequest, KnowledgeTables};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

pub const TABLE: &str = "conex-bases_t";
pub const TENANT_FIELD: &str = "titular";
pub const ITEMS_PER_PAGE: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub titular: Option<String>,
    #[serde(default)]
    pub nome: Option<String>,
    /// Maintained by the ingestion pipeline.
    #[serde(default)]
    pub treinamentos_qtd: Option<u32>,
    #[serde(default)]
    pub treinamentos: Option<Vec<String>>,
    #[serde(default)]
    pub treinamentosuid: Option<Vec<String>>,
    #[serde(default)]
    pub ativa: Option<bool>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub projeto: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub saudacao: Option<String>,
    #[serde(default)]
    pub lgpd: Option<bool>,
}

impl KnowledgeBase {
    pub fn training_count(&self) -> u32 {
        self.treinamentos_qtd.unwrap_or(0)
    }

    pub fn lgpd_enabled(&self) -> bool {
        self.lgpd.unwrap_or(false)
    }
}

impl SyncEntity for KnowledgeBase {
    fn record_id(&self) -> &str {
        &self.uid
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Active bases only. `lgpd` and `tipo` toggles are patched in place so the
/// grid does not flicker.
pub fn policy() -> CollectionPolicy {
    CollectionPolicy::new(TABLE, TENANT_FIELD)
        .base_filter(FilterExpr::eq("ativa", true))
        .silent_fields(["lgpd", "tipo"])
        .immutable_fields(["treinamentos_qtd", "treinamentos", "treinamentosuid", "ativa", "id"])
}

/// The knowledge-base grid of one company.
pub struct KnowledgeBases {
    sync: CollectionSynchronizer<KnowledgeBase>,
    deleting: Mutex<Option<String>>,
}

impl KnowledgeBases {
    pub async fn start(deps: SyncDeps, tenant: Option<TenantKey>) -> Self {
        Self {
            sync: CollectionSynchronizer::start(deps, policy(), tenant, None).await,
            deleting: Mutex::new(None),
        }
    }

    pub fn sync(&self) -> &CollectionSynchronizer<KnowledgeBase> {
        &self.sync
    }

    pub async fn set_prompt(&self, base_id: &str, prompt: &str) -> Result<()> {
        self.sync
            .edit(&RecordId::from(base_id), patch_of("prompt", prompt))
            .await
    }

    pub async fn set_tipo(&self, base_id: &str, tipo: &str) -> Result<()> {
        self.sync
            .edit(&RecordId::from(base_id), patch_of("tipo", tipo))
            .await
    }

    pub async fn set_lgpd(&self, base_id: &str, enabled: bool) -> Result<()> {
        self.sync
            .edit(&RecordId::from(base_id), patch_of("lgpd", enabled))
            .await
    }

    /// Asks the backend to provision a new base, then refetches.
    pub async fn create(
        &self,
        tables: &dyn KnowledgeTables,
        user_id: &str,
        name: &str,
        project_id: &str,
    ) -> Result<Value> {
        let company_id = self.company()?;
        let request = KnowledgeTableRequest::Create {
            company_id,
            user_id: user_id.to_string(),
            name: name.trim().to_string(),
            project_id: project_id.to_string(),
        };
        let answer = tables.manage_table(&request).await?;
        info!("knowledge base '{}' created", name.trim());
        self.sync.refetch().await;
        Ok(answer)
    }

    /// Asks the backend to drop a base. `deleting()` names it while the call runs.
    pub async fn delete(
        &self,
        tables: &dyn KnowledgeTables,
        user_id: &str,
        base_id: &str,
    ) -> Result<()> {
        let company_id = self.company()?;
        self.set_deleting(Some(base_id.to_string()));
        let request = KnowledgeTableRequest::Delete {
            company_id,
            user_id: user_id.to_string(),
            base_id: base_id.to_string(),
        };
        let result = tables.manage_table(&request).await;
        self.set_deleting(None);

        match result {
            Ok(_) => {
                self.sync.refetch().await;
                Ok(())
            }
            Err(err) => {
                warn!("failed to delete knowledge base {}: {}", base_id, err);
                Err(err)
            }
        }
    }

    pub fn deleting(&self) -> Option<String> {
        self.deleting.lock().ok().and_then(|slot| slot.clone())
    }

    pub fn for_project(&self, project_id: &str) -> Vec<KnowledgeBase> {
        self.sync
            .snapshot()
            .into_iter()
            .filter(|base| base.projeto.as_deref() == Some(project_id))
            .collect()
    }

    pub fn page(&self, page: usize) -> Page<KnowledgeBase> {
        view::paginate(&self.sync.snapshot(), page, ITEMS_PER_PAGE)
    }

    fn company(&self) -> Result<String> {
        self.sync
            .tenant()
            .map(|tenant| tenant.to_string())
            .ok_or(SyncError::NotReady)
    }

    fn set_deleting(&self, base_id: Option<String>) {
        if let Ok(mut slot) = self.deleting.lock() {
            *slot = base_id;
        }
    }
}
