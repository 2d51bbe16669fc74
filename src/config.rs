use crate::core::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WEBHOOK_BASE_URL: &str = "https://webhook.conexcondo.com.br/webhook";
const DEFAULT_CNPJ_REGISTRY_URL: &str = "https://brasilapi.com.br/api/cnpj/v1";

/// Synchronizer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for one fetch or write before it is reported as timed out.
    #[serde(with = "duration_ms")]
    pub fetch_timeout: Duration,

    /// Drain queued change events before refetching, so a burst costs one query.
    pub coalesce_events: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(DEFAULT_FETCH_TIMEOUT_MS),
            coalesce_events: true,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn coalesce_events(mut self, coalesce: bool) -> Self {
        self.coalesce_events = coalesce;
        self
    }

    /// Reads `CONEX_SYNC_FETCH_TIMEOUT_MS` and `CONEX_SYNC_COALESCE_EVENTS` over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("CONEX_SYNC_FETCH_TIMEOUT_MS")? {
            config.fetch_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(coalesce) = env_parse::<bool>("CONEX_SYNC_COALESCE_EVENTS")? {
            config.coalesce_events = coalesce;
        }
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

/// Exponential backoff for transport failures on webhook calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, attempt: usize, err: &SyncError) -> bool {
        attempt < self.max_attempts.max(1) && err.is_transient()
    }

    /// Backoff before retry number `attempt` (1-based), doubling up to the cap.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let base = self.base_backoff_ms.max(1);
        let cap = self.max_backoff_ms.max(base);

        let mut backoff = base;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        Duration::from_millis(backoff)
    }
}

/// Business webhook endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub base_url: String,
    pub login_path: String,
    pub registration_path: String,
    pub knowledge_table_path: String,
    pub upload_path: String,
    pub training_url_path: String,
    pub cnpj_registry_url: String,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_WEBHOOK_BASE_URL.to_string(),
            login_path: "login-challenge".to_string(),
            registration_path: "validar_cadastro".to_string(),
            knowledge_table_path: "cod-gerenciartabela".to_string(),
            upload_path: "cod-uploadfile".to_string(),
            training_url_path: "cod-treinamentourl".to_string(),
            cnpj_registry_url: DEFAULT_CNPJ_REGISTRY_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
        }
    }
}

impl WebhookConfig {
    pub fn new(base_url: &str) -> Self {
        Self::default().base_url(base_url)
    }

    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn cnpj_registry_url(mut self, url: &str) -> Self {
        self.cnpj_registry_url = url.trim().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Reads `CONEX_WEBHOOK_BASE_URL`, `CONEX_WEBHOOK_TIMEOUT_MS` and
    /// `CONEX_WEBHOOK_MAX_ATTEMPTS` over the defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("CONEX_WEBHOOK_BASE_URL") {
            config = config.base_url(&url);
        }
        if let Some(ms) = env_parse::<u64>("CONEX_WEBHOOK_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms.max(1));
        }
        if let Some(attempts) = env_parse::<usize>("CONEX_WEBHOOK_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts.max(1);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = read_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, url) in [
            ("base_url", &self.base_url),
            ("cnpj_registry_url", &self.cnpj_registry_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SyncError::Config(format!("{name} must be http(s): '{url}'")));
            }
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SyncError::Config(format!("invalid value for {name}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        SyncError::Config(format!("failed to read '{}': {}", path.display(), err))
    })?;
    serde_json::from_str(&raw)
        .map_err(|err| SyncError::Config(format!("invalid config '{}': {}", path.display(), err)))
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
