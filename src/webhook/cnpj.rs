use super::digits_only;
use crate::config::WebhookConfig;
use crate::core::{Result, SyncError};
use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CNPJ_PARTS: Regex =
        Regex::new(r"^(\d{2})(\d{3})(\d{3})(\d{4})(\d{2})$").expect("valid cnpj regex");
    static ref CEP_PARTS: Regex = Regex::new(r"^(\d{5})(\d{3})$").expect("valid cep regex");
}

/// `12345678000195` -> `12.345.678/0001-95`. Input that is not 14 digits is returned as digits.
pub fn format_cnpj(cnpj: &str) -> String {
    let digits = digits_only(cnpj);
    CNPJ_PARTS
        .replace(&digits, "$1.$2.$3/$4-$5")
        .into_owned()
}

pub fn format_cep(cep: &str) -> String {
    let digits = digits_only(cep);
    CEP_PARTS.replace(&digits, "$1-$2").into_owned()
}

/// `1133334444` -> `(11) 33334444`; the first two digits are the area code.
pub fn format_phone(ddd_phone: &str) -> String {
    let digits = digits_only(ddd_phone);
    if digits.len() <= 2 {
        return String::new();
    }
    format!("({}) {}", &digits[..2], &digits[2..])
}

/// Raw registry answer; only the fields the signup form prefills.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RegistryRecord {
    razao_social: String,
    nome_fantasia: Option<String>,
    logradouro: String,
    numero: String,
    complemento: Option<String>,
    bairro: String,
    municipio: String,
    uf: String,
    cep: String,
    ddd_telefone_1: Option<String>,
    email: Option<String>,
}

/// Company data used to prefill the signup form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyProfile {
    pub cnpj: String,
    pub legal_name: String,
    pub trade_name: String,
    pub street: String,
    pub number: String,
    pub complement: String,
    pub district: String,
    pub city: String,
    pub state: String,
    pub cep: String,
    pub phone: String,
    pub email: String,
}

impl CompanyProfile {
    /// Maps a registry JSON answer. A blank trade name falls back to the legal name.
    pub fn from_registry(cnpj: &str, body: &str) -> Result<Self> {
        let record: RegistryRecord = serde_json::from_str(body)?;
        let trade_name = record
            .nome_fantasia
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| record.razao_social.clone());
        Ok(Self {
            cnpj: format_cnpj(cnpj),
            legal_name: record.razao_social,
            trade_name,
            street: record.logradouro,
            number: record.numero,
            complement: record.complemento.unwrap_or_default(),
            district: record.bairro,
            city: record.municipio,
            state: record.uf,
            cep: format_cep(&record.cep),
            phone: record
                .ddd_telefone_1
                .as_deref()
                .map(format_phone)
                .unwrap_or_default(),
            email: record.email.unwrap_or_default(),
        })
    }
}

/// Public CNPJ registry lookup.
#[derive(Debug, Clone)]
pub struct CnpjRegistry {
    http: reqwest::Client,
    base_url: String,
}

impl CnpjRegistry {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| SyncError::Http(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: config.cnpj_registry_url.clone(),
        })
    }

    pub fn lookup_url(&self, cnpj: &str) -> Result<String> {
        let digits = digits_only(cnpj);
        if digits.len() != 14 {
            return Err(SyncError::Config(format!(
                "CNPJ must have 14 digits, got {}",
                digits.len()
            )));
        }
        Ok(format!("{}/{}", self.base_url, digits))
    }

    pub async fn lookup(&self, cnpj: &str) -> Result<CompanyProfile> {
        let url = self.lookup_url(cnpj)?;
        debug!("looking up CNPJ at {}", url);

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("CNPJ registry answered {} for {}", status, url);
            return Err(SyncError::Webhook {
                status: status.as_u16().to_string(),
                message: body,
            });
        }
        CompanyProfile::from_registry(cnpj, &body)
    }
}
