use super::{WebhookClient, digits_only, discriminator, unexpected};
use crate::core::Result;
use serde_json::{Value, json};

/// Outcome of the two login-challenge steps.
#[derive(Debug, Clone, PartialEq)]
pub enum LoginChallenge {
    /// The WhatsApp number is known and a code was sent; `profile` is the raw
    /// user payload (user id, name) the second step needs.
    Authorized { user_id: Option<String>, profile: Value },
    NotFound,
    Valid { user_id: String, company_id: String },
    Invalid,
}

pub fn login_code_request(whatsapp: &str) -> Value {
    json!({ "acao": "validarWpp", "whatsapp": digits_only(whatsapp) })
}

pub fn login_code_verification(user_id: &str, code: &str) -> Value {
    json!({ "acao": "login", "token": code.trim(), "userId": user_id })
}

pub fn parse_code_request(body: &Value) -> Result<LoginChallenge> {
    match discriminator(body, "status") {
        Some("autorizado") => Ok(LoginChallenge::Authorized {
            user_id: discriminator(body, "userUid").map(str::to_string),
            profile: body.clone(),
        }),
        Some("inexistente") => Ok(LoginChallenge::NotFound),
        _ => Err(unexpected(body, "status")),
    }
}

pub fn parse_code_verification(body: &Value) -> Result<LoginChallenge> {
    match discriminator(body, "status") {
        Some("valido") => {
            let user_id = discriminator(body, "userId");
            let company_id = discriminator(body, "empresaId");
            match (user_id, company_id) {
                (Some(user_id), Some(company_id)) => Ok(LoginChallenge::Valid {
                    user_id: user_id.to_string(),
                    company_id: company_id.to_string(),
                }),
                _ => Err(unexpected(body, "status")),
            }
        }
        Some("invalido") => Ok(LoginChallenge::Invalid),
        _ => Err(unexpected(body, "status")),
    }
}

impl WebhookClient {
    /// Asks the backend to send a one-time code to a WhatsApp number.
    pub async fn request_login_code(&self, whatsapp: &str) -> Result<LoginChallenge> {
        let path = self.config().login_path.clone();
        let body = self.post_json(&path, &login_code_request(whatsapp)).await?;
        parse_code_request(&body)
    }

    /// Exchanges the one-time code for the user and company identifiers.
    pub async fn verify_login_code(&self, user_id: &str, code: &str) -> Result<LoginChallenge> {
        let path = self.config().login_path.clone();
        let body = self
            .post_json(&path, &login_code_verification(user_id, code))
            .await?;
        parse_code_verification(&body)
    }
}
