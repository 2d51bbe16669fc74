use crate::core::TenantKey;
use crate::store::FilterExpr;
use crate::sync::{CollectionPolicy, CollectionSynchronizer, SyncDeps, SyncEntity};
use crate::view;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TABLE: &str = "conex_projetos";
pub const TENANT_FIELD: &str = "empresa";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub nome: String,
    #[serde(default)]
    pub empresa: Option<String>,
    #[serde(default)]
    pub bases: Option<Vec<String>>,
    #[serde(default = "active")]
    pub ativo: bool,
}

fn active() -> bool {
    true
}

impl SyncEntity for Project {
    fn record_id(&self) -> &str {
        &self.uid
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

pub fn policy() -> CollectionPolicy {
    CollectionPolicy::new(TABLE, TENANT_FIELD).base_filter(FilterExpr::eq("ativo", true))
}

pub struct Projects {
    sync: CollectionSynchronizer<Project>,
}

impl Projects {
    pub async fn start(deps: SyncDeps, tenant: Option<TenantKey>) -> Self {
        Self {
            sync: CollectionSynchronizer::start(deps, policy(), tenant, None).await,
        }
    }

    pub fn sync(&self) -> &CollectionSynchronizer<Project> {
        &self.sync
    }

    /// Project id -> name, used to label leads and knowledge bases.
    pub fn names(&self) -> HashMap<String, String> {
        view::name_index(&self.sync.snapshot(), |project| {
            (project.uid.clone(), project.nome.clone())
        })
    }

    /// Falls back to the id itself for projects no longer in the list.
    pub fn name_of(&self, project_id: &str) -> String {
        self.sync
            .get(project_id)
            .map(|project| project.nome)
            .unwrap_or_else(|| project_id.to_string())
    }
}
