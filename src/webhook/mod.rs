//! Typed client for the business webhooks and the public CNPJ registry.
//!
//! Every webhook takes a flat JSON (or multipart) body and answers with a
//! JSON object whose `status` discriminator decides the caller's next step.
//! Transport failures and 5xx responses are retried per [`RetryPolicy`];
//! business outcomes never are.

pub mod auth;
pub mod cnpj;
pub mod knowledge;
pub mod registration;
pub mod training;

use crate::config::{RetryPolicy, WebhookConfig};
use crate::core::{Result, SyncError};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use reqwest::multipart::Form;
use serde_json::Value;

pub use auth::LoginChallenge;
pub use cnpj::{CnpjRegistry, CompanyProfile, format_cep, format_cnpj, format_phone};
pub use knowledge::{KnowledgeTableRequest, KnowledgeTables};
pub use registration::{RegistrationCompletion, RegistrationStart, SignupDetails};
pub use training::{TrainingFile, TrainingUrl};

lazy_static! {
    static ref NON_DIGITS: Regex = Regex::new(r"\D").expect("valid digit regex");
}

/// Strips every non-digit, as the forms do before sending phone numbers and tax ids.
pub fn digits_only(input: &str) -> String {
    NON_DIGITS.replace_all(input, "").into_owned()
}

/// Reads a string discriminator such as `status`, `acao` or `user`.
pub(crate) fn discriminator<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

pub(crate) fn unexpected(body: &Value, key: &str) -> SyncError {
    SyncError::Webhook {
        status: discriminator(body, key).unwrap_or("<missing>").to_string(),
        message: body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unexpected webhook response")
            .to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SyncError::Http(format!("failed to build http client: {err}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// POSTs a JSON body and returns the decoded JSON answer.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.config.endpoint(path);
        self.with_retry(&url, || self.http.post(&url).json(body).send())
            .await
    }

    /// POSTs a multipart form. The form is rebuilt for every attempt.
    pub async fn post_form<F>(&self, path: &str, build: F) -> Result<Value>
    where
        F: Fn() -> Result<Form>,
    {
        let url = self.config.endpoint(path);
        let retry = &self.config.retry;
        let mut attempt = 1;
        loop {
            let form = build()?;
            let outcome = match self.http.post(&url).multipart(form).send().await {
                Ok(response) => read_json(&url, response).await,
                Err(err) => Err(SyncError::from(err)),
            };
            match outcome {
                Err(err) if retry.should_retry(attempt, &err) => {
                    backoff(retry, &url, attempt, &err).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn with_retry<F, Fut>(&self, url: &str, send: F) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 1;
        loop {
            let outcome = match send().await {
                Ok(response) => read_json(url, response).await,
                Err(err) => Err(SyncError::from(err)),
            };
            match outcome {
                Err(err) if retry.should_retry(attempt, &err) => {
                    backoff(retry, url, attempt, &err).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

async fn backoff(retry: &RetryPolicy, url: &str, attempt: usize, err: &SyncError) {
    let delay = retry.backoff(attempt);
    warn!(
        "webhook {} failed on attempt {}/{}: {}; retrying in {:?}",
        url, attempt, retry.max_attempts, err, delay
    );
    tokio::time::sleep(delay).await;
}

/// 5xx becomes a transient `Http` error, other non-success codes a `Webhook`
/// error carrying the body text.
async fn read_json(url: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    debug!("webhook {} answered {}", url, status);

    if status.is_server_error() {
        return Err(SyncError::Http(format!("{url} returned {status}: {text}")));
    }
    if !status.is_success() {
        return Err(SyncError::Webhook {
            status: status.as_u16().to_string(),
            message: text,
        });
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|err| SyncError::Decode(format!("{url} returned invalid JSON: {err}")))
}
