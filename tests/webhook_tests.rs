use conex_sync::webhook::auth::{
    login_code_request, login_code_verification, parse_code_request, parse_code_verification,
};
use conex_sync::webhook::registration::{
    parse_registration_completion, parse_registration_start, registration_completion_body,
    registration_start_body,
};
use conex_sync::webhook::training::parse_training_response;
use conex_sync::webhook::{
    CompanyProfile, KnowledgeTableRequest, LoginChallenge, RegistrationCompletion,
    RegistrationStart, SignupDetails, WebhookClient,
};
use conex_sync::{RetryPolicy, SyncError, WebhookConfig};
use serde_json::json;
use std::time::Duration;

#[test]
fn test_login_challenge_round() {
    assert_eq!(
        login_code_request("(11) 91234-5678"),
        json!({"acao": "validarWpp", "whatsapp": "11912345678"})
    );

    let authorized = parse_code_request(&json!({
        "status": "autorizado",
        "userUid": "U1",
        "userNome": "Ana"
    }))
    .unwrap();
    match authorized {
        LoginChallenge::Authorized { user_id, profile } => {
            assert_eq!(user_id.as_deref(), Some("U1"));
            assert_eq!(profile["userNome"], "Ana");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(
        parse_code_request(&json!({"status": "inexistente"})).unwrap(),
        LoginChallenge::NotFound
    );

    assert_eq!(
        login_code_verification("U1", " 123456 "),
        json!({"acao": "login", "token": "123456", "userId": "U1"})
    );
    assert_eq!(
        parse_code_verification(&json!({"status": "invalido"})).unwrap(),
        LoginChallenge::Invalid
    );
}

#[test]
fn test_unknown_login_status_is_an_error() {
    let err = parse_code_verification(&json!({"status": "expirado"})).unwrap_err();
    assert_eq!(
        err,
        SyncError::Webhook {
            status: "expirado".into(),
            message: "unexpected webhook response".into()
        }
    );
}

#[test]
fn test_registration_start_outcomes() {
    assert_eq!(
        registration_start_body("12.345.678/0001-95", " sindico@condo.com "),
        json!({"cnpj": "12345678000195", "email": "sindico@condo.com"})
    );
    assert_eq!(
        parse_registration_start(&json!({"acao": "cadastroEmpresa", "status": "cnpjInvalido"}))
            .unwrap(),
        RegistrationStart::InvalidCnpj
    );
    assert_eq!(
        parse_registration_start(&json!({"acao": "cadastroEmpresa", "status": "jaCadastrado"}))
            .unwrap(),
        RegistrationStart::Rejected {
            status: "jaCadastrado".into()
        }
    );
}

#[test]
fn test_registration_completion() {
    let details = SignupDetails {
        cnpj: "12.345.678/0001-95".into(),
        whatsapp: "(11) 91234-5678".into(),
        name: "Ana".into(),
        password: "s3cret".into(),
    };
    details.validate().unwrap();
    assert_eq!(
        registration_completion_body(&details),
        json!({
            "acao": "concluir",
            "empresaCnpj": "12345678000195",
            "whatsapp": "11912345678",
            "nome": "Ana",
            "senha": "s3cret"
        })
    );
    assert_eq!(
        parse_registration_completion(&json!({"user": "criado"})).unwrap(),
        RegistrationCompletion::Created
    );
    assert_eq!(
        parse_registration_completion(&json!({"user": "erro"})).unwrap(),
        RegistrationCompletion::Failed
    );
    assert!(parse_registration_completion(&json!({"status": "ok"})).is_err());
}

#[test]
fn test_knowledge_table_create_body() {
    let body = KnowledgeTableRequest::Create {
        company_id: "T1".into(),
        user_id: "U1".into(),
        name: "Regimento".into(),
        project_id: "P1".into(),
    }
    .body();
    assert_eq!(body["acao"], "criarTabela");
    assert_eq!(body["projetoUid"], "P1");
    assert!(body.get("baseUid").is_none());
}

#[test]
fn test_training_answers() {
    assert_eq!(parse_training_response(&json!({"status": "success"})).unwrap(), None);
    assert!(parse_training_response(&json!({"status": "erro"})).is_err());
}

#[test]
fn test_company_profile_from_registry() {
    let body = json!({
        "razao_social": "CONDOMINIO EDIFICIO AURORA",
        "nome_fantasia": "",
        "logradouro": "RUA DAS FLORES",
        "numero": "100",
        "complemento": null,
        "bairro": "CENTRO",
        "municipio": "SAO PAULO",
        "uf": "SP",
        "cep": "01310100",
        "ddd_telefone_1": "1133334444",
        "email": null,
        "qsa": []
    })
    .to_string();

    let profile = CompanyProfile::from_registry("12345678000195", &body).unwrap();
    assert_eq!(profile.cnpj, "12.345.678/0001-95");
    assert_eq!(profile.trade_name, "CONDOMINIO EDIFICIO AURORA");
    assert_eq!(profile.cep, "01310-100");
    assert_eq!(profile.phone, "(11) 33334444");
    assert_eq!(profile.complement, "");
    assert_eq!(profile.email, "");
}

#[test]
fn test_client_config_endpoints() {
    let config = WebhookConfig::new("https://hooks.example.com/webhook/")
        .request_timeout(Duration::from_secs(3))
        .retry(RetryPolicy::none());
    let client = WebhookClient::new(config).unwrap();

    assert_eq!(
        client.config().endpoint(&client.config().upload_path),
        "https://hooks.example.com/webhook/cod-uploadfile"
    );
    assert_eq!(client.config().retry.max_attempts, 1);
}

#[tokio::test]
async fn test_unreachable_webhook_surfaces_http_error() {
    let config = WebhookConfig::new("http://127.0.0.1:9")
        .request_timeout(Duration::from_millis(500))
        .retry(RetryPolicy {
            max_attempts: 2,
            base_backoff_ms: 1,
            max_backoff_ms: 1,
        });
    let client = WebhookClient::new(config).unwrap();

    let err = client.request_login_code("11912345678").await.unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}
