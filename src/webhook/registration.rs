use super::{WebhookClient, digits_only, discriminator, unexpected};
use crate::core::{Result, SyncError};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationStart {
    Accepted { company_name: String },
    InvalidCnpj,
    Rejected { status: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationCompletion {
    Created,
    Failed,
}

/// Second-step signup form.
#[derive(Debug, Clone, PartialEq)]
pub struct SignupDetails {
    pub cnpj: String,
    pub whatsapp: String,
    pub name: String,
    pub password: String,
}

impl SignupDetails {
    /// Mirrors the form's checks: 11-digit mobile number, non-blank name and password.
    pub fn validate(&self) -> Result<()> {
        if digits_only(&self.whatsapp).len() != 11 {
            return Err(SyncError::Config("whatsapp must have 11 digits".into()));
        }
        if self.name.trim().is_empty() || self.password.trim().is_empty() {
            return Err(SyncError::Config("name and password are required".into()));
        }
        Ok(())
    }
}

pub fn registration_start_body(cnpj: &str, email: &str) -> Value {
    json!({ "cnpj": digits_only(cnpj), "email": email.trim() })
}

pub fn registration_completion_body(details: &SignupDetails) -> Value {
    json!({
        "acao": "concluir",
        "empresaCnpj": digits_only(&details.cnpj),
        "whatsapp": digits_only(&details.whatsapp),
        "nome": details.name,
        "senha": details.password,
    })
}

pub fn parse_registration_start(body: &Value) -> Result<RegistrationStart> {
    if discriminator(body, "acao") != Some("cadastroEmpresa") {
        return Err(unexpected(body, "acao"));
    }
    Ok(match discriminator(body, "status") {
        Some("ok") => RegistrationStart::Accepted {
            company_name: discriminator(body, "empresaNome")
                .unwrap_or_default()
                .to_string(),
        },
        Some("cnpjInvalido") => RegistrationStart::InvalidCnpj,
        other => RegistrationStart::Rejected {
            status: other.unwrap_or_default().to_string(),
        },
    })
}

pub fn parse_registration_completion(body: &Value) -> Result<RegistrationCompletion> {
    match discriminator(body, "user") {
        Some("criado") => Ok(RegistrationCompletion::Created),
        Some("erro") => Ok(RegistrationCompletion::Failed),
        _ => Err(unexpected(body, "user")),
    }
}

impl WebhookClient {
    pub async fn start_registration(&self, cnpj: &str, email: &str) -> Result<RegistrationStart> {
        let digits = digits_only(cnpj);
        if digits.len() != 14 {
            return Ok(RegistrationStart::InvalidCnpj);
        }
        let path = self.config().registration_path.clone();
        let body = self
            .post_json(&path, &registration_start_body(&digits, email))
            .await?;
        parse_registration_start(&body)
    }

    pub async fn complete_registration(
        &self,
        details: &SignupDetails,
    ) -> Result<RegistrationCompletion> {
        details.validate()?;
        let path = self.config().registration_path.clone();
        let body = self
            .post_json(&path, &registration_completion_body(details))
            .await?;
        parse_registration_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_requires_company_registration_action() {
        let body = json!({"acao": "cadastroEmpresa", "status": "ok", "empresaNome": "Condo SA"});
        assert_eq!(
            parse_registration_start(&body).expect("parsed"),
            RegistrationStart::Accepted {
                company_name: "Condo SA".into()
            }
        );
        assert!(parse_registration_start(&json!({"status": "ok"})).is_err());
    }

    #[test]
    fn signup_details_are_checked_before_sending() {
        let details = SignupDetails {
            cnpj: "12.345.678/0001-95".into(),
            whatsapp: "(11) 9876-543".into(),
            name: "Ana".into(),
            password: "s3cret".into(),
        };
        assert!(details.validate().is_err());
    }
}
