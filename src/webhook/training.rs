use super::{WebhookClient, discriminator, unexpected};
use crate::core::{Result, SyncError};
use reqwest::multipart::{Form, Part};
use serde_json::Value;

pub const PDF_MIME: &str = "application/pdf";

/// A document to ingest into a knowledge base. Only PDFs are accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingFile {
    pub company_id: String,
    pub base_id: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl TrainingFile {
    pub fn pdf(company_id: &str, base_id: &str, file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            company_id: company_id.to_string(),
            base_id: base_id.to_string(),
            file_name: file_name.to_string(),
            content_type: PDF_MIME.to_string(),
            bytes,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.content_type != PDF_MIME {
            return Err(SyncError::Config(format!(
                "only PDF files can be uploaded, got '{}'",
                self.content_type
            )));
        }
        if self.base_id.trim().is_empty() {
            return Err(SyncError::Config("a knowledge base must be selected".into()));
        }
        Ok(())
    }

    fn form(&self) -> Result<Form> {
        let part = Part::bytes(self.bytes.clone())
            .file_name(self.file_name.clone())
            .mime_str(&self.content_type)?;
        Ok(Form::new()
            .part("file", part)
            .text("empresaUid", self.company_id.clone())
            .text("baseUid", self.base_id.clone()))
    }
}

/// A web page to ingest, with the summary shown in the training list.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingUrl {
    pub company_id: String,
    pub base_id: String,
    pub summary: String,
    pub url: String,
}

impl TrainingUrl {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(SyncError::Config("url is required".into()));
        }
        if self.summary.trim().is_empty() {
            return Err(SyncError::Config("summary is required".into()));
        }
        if self.base_id.trim().is_empty() {
            return Err(SyncError::Config("a knowledge base must be selected".into()));
        }
        Ok(())
    }

    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("baseUid", self.base_id.clone()),
            ("empresaUid", self.company_id.clone()),
            ("resumo", self.summary.trim().to_string()),
            ("tipo", "URL".to_string()),
            ("url", self.url.trim().to_string()),
        ]
    }

    fn form(&self) -> Form {
        self.fields()
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
    }
}

/// `status == "success"` is the only accepted answer; returns the stored file URL if any.
pub fn parse_training_response(body: &Value) -> Result<Option<String>> {
    match discriminator(body, "status") {
        Some("success") => Ok(discriminator(body, "url").map(str::to_string)),
        _ => Err(unexpected(body, "status")),
    }
}

impl WebhookClient {
    /// Uploads a PDF and returns the URL the backend stored it under.
    pub async fn upload_training_file(&self, file: &TrainingFile) -> Result<String> {
        file.validate()?;
        let path = self.config().upload_path.clone();
        let body = self.post_form(&path, || file.form()).await?;
        parse_training_response(&body)?
            .ok_or_else(|| SyncError::Decode("upload answer carried no url".into()))
    }

    pub async fn submit_training_url(&self, training: &TrainingUrl) -> Result<()> {
        training.validate()?;
        let path = self.config().training_url_path.clone();
        let body = self.post_form(&path, || Ok(training.form())).await?;
        parse_training_response(&body).map(|_| ())
    }
}
