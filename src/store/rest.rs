use super::{FilterExpr, RemoteStore};
use crate::core::{FieldPatch, OrderBy, Result, Row, SyncError, render_scalar};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;

/// `RemoteStore` over a PostgREST-compatible HTTP endpoint (`/rest/v1/<table>`).
#[derive(Clone)]
pub struct RestStore {
    client: HttpClient,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "store url must be http(s): '{base_url}'"
            )));
        }
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            return Err(SyncError::Config("store api key must not be empty".to_string()));
        }

        let client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SyncError::Config(format!("store http client init failed: {err}")))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            access_token: None,
        })
    }

    /// Uses a user session token instead of the anonymous key for row-level security.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.access_token = Some(token).filter(|value| !value.trim().is_empty());
        self
    }

    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Query-string pairs for a filtered, ordered select.
    pub fn select_params(filter: &FilterExpr, order: &OrderBy) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter.to_query_pairs());
        params.push(("order".to_string(), order.to_query_value()));
        params
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }
}

#[async_trait]
impl RemoteStore for RestStore {
    async fn query(&self, table: &str, filter: &FilterExpr, order: &OrderBy) -> Result<Vec<Row>> {
        let url = self.table_url(table);
        let params = Self::select_params(filter, order);
        debug!("store select: table='{}' filter='{}'", table, filter);

        let response = self
            .client
            .get(&url)
            .query(&params)
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|err| SyncError::Query(format!("select on '{table}' failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "store select rejected: table='{}' status={} body='{}'",
                table,
                status.as_u16(),
                body
            );
            return Err(SyncError::Query(format!(
                "select on '{table}' returned {}: {body}",
                status.as_u16()
            )));
        }

        let payload = response
            .json::<Value>()
            .await
            .map_err(|err| SyncError::Decode(format!("select on '{table}': {err}")))?;
        match payload {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(row) => Ok(row),
                    other => Err(SyncError::Decode(format!(
                        "expected row object from '{table}', got {other}"
                    ))),
                })
                .collect(),
            other => Err(SyncError::Decode(format!(
                "expected row array from '{table}', got {other}"
            ))),
        }
    }

    async fn update(
        &self,
        table: &str,
        id_field: &str,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<()> {
        let url = self.table_url(table);
        let scope = [(id_field.to_string(), format!("eq.{}", render_scalar(&Value::String(id.to_string()))))];
        debug!("store update: table='{}' id='{}' fields={:?}", table, id, patch.keys());

        let response = self
            .client
            .patch(&url)
            .query(&scope)
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
            .header("prefer", "return=representation")
            .json(patch)
            .send()
            .await
            .map_err(|err| SyncError::Write(format!("update on '{table}' failed: {err}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SyncError::Write(format!(
                "update on '{table}.{id}' returned {}: {body}",
                status.as_u16()
            )));
        }
        Self::check_updated(table, id, &body)
    }
}

impl RestStore {
    /// A PATCH answers 2xx even when it matched no row (unknown id, or a row
    /// hidden by row-level security); the returned representation tells.
    pub fn check_updated(table: &str, id: &str, body: &str) -> Result<()> {
        let rows: Vec<Value> = serde_json::from_str(body).map_err(|err| {
            SyncError::Write(format!("update on '{table}.{id}' returned unreadable rows: {err}"))
        })?;
        if rows.is_empty() {
            warn!("store update matched no row: table='{}' id='{}'", table, id);
            return Err(SyncError::Write(format!(
                "update on '{table}.{id}' matched no row"
            )));
        }
        Ok(())
    }
}
