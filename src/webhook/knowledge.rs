use super::WebhookClient;
use crate::core::Result;
use async_trait::async_trait;
use log::info;
use serde_json::{Value, json};

/// Knowledge-base tables are provisioned by the backend, not written directly.
#[derive(Debug, Clone, PartialEq)]
pub enum KnowledgeTableRequest {
    Create {
        company_id: String,
        user_id: String,
        name: String,
        project_id: String,
    },
    Delete {
        company_id: String,
        user_id: String,
        base_id: String,
    },
}

impl KnowledgeTableRequest {
    pub fn body(&self) -> Value {
        match self {
            Self::Create {
                company_id,
                user_id,
                name,
                project_id,
            } => json!({
                "acao": "criarTabela",
                "empresaUid": company_id,
                "userUid": user_id,
                "nome": name,
                "projetoUid": project_id,
            }),
            Self::Delete {
                company_id,
                user_id,
                base_id,
            } => json!({
                "acao": "excluirTabela",
                "empresaUid": company_id,
                "userUid": user_id,
                "baseUid": base_id,
            }),
        }
    }
}

/// Seam between the knowledge-base collection and the table-management webhook.
#[async_trait]
pub trait KnowledgeTables: Send + Sync {
    /// Any 2xx JSON answer counts as success.
    async fn manage_table(&self, request: &KnowledgeTableRequest) -> Result<Value>;
}

#[async_trait]
impl KnowledgeTables for WebhookClient {
    async fn manage_table(&self, request: &KnowledgeTableRequest) -> Result<Value> {
        let path = self.config().knowledge_table_path.clone();
        let answer = self.post_json(&path, &request.body()).await?;
        info!("knowledge table request {:?} accepted", request_kind(request));
        Ok(answer)
    }
}

fn request_kind(request: &KnowledgeTableRequest) -> &'static str {
    match request {
        KnowledgeTableRequest::Create { .. } => "criarTabela",
        KnowledgeTableRequest::Delete { .. } => "excluirTabela",
    }
}
