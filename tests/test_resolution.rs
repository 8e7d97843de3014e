//! Variable, environment and macro resolution seen from the wire
mod common;

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use reqflow::config::EngineConfig;
use reqflow::context::{ResolvingContext, Scope};
use reqflow::crypto::{Encryptor, HmacEncryptor};
use reqflow::engine::StepExecutor;
use reqflow::environment::System;
use reqflow::errors::ErrorKind;
use reqflow::models::request::Request;
use reqflow::models::result::StepStatus;

use common::{engine, engine_with_systems, TEST_SECRET};

#[tokio::test]
async fn test_request_without_placeholders_is_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .and(header("x-plain", "value"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&EngineConfig::default());
    let req = Request::new("plain", "GET", format!("{}/plain", server.uri())).with_header("X-Plain", "value");
    let result = engine.execute_step(&req, &ResolvingContext::new()).await;

    assert_eq!(result.status, StepStatus::Passed);
    let history = result.history_request.unwrap();
    assert_eq!(history.url, req.url);
    assert_eq!(history.headers, req.headers);
}

#[tokio::test]
async fn test_scope_precedence() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/local"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut ctx = ResolvingContext::new();
    ctx.set(Scope::Globals, "base", server.uri());
    ctx.set(Scope::Globals, "segment", "globals");
    ctx.set(Scope::Environment, "segment", "environment");
    ctx.set(Scope::Local, "segment", "local");

    let engine = engine(&EngineConfig::default());
    let req = Request::new("scoped", "GET", "${base}/${segment}");
    let result = engine.execute_step(&req, &ctx).await;
    assert_eq!(result.status, StepStatus::Passed, "{:?}", result.error);
}

#[tokio::test]
async fn test_environment_parameters_and_encrypted_values() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/invoices"))
        .and(header("x-api-key", "k3y"))
        .and(header("x-secret", "hunter2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let systems = vec![System::new("Billing").with_connection(
        "Primary",
        [("host", server.uri()), ("path", "invoices".into()), ("key", "k3y".into())],
    )];
    let engine = engine_with_systems(&EngineConfig::default(), systems);
    let sealed = HmacEncryptor::new(TEST_SECRET).encrypt("hunter2").unwrap();

    let mut ctx = ResolvingContext::new().with_environment_id("test");
    ctx.set(Scope::Environment, "secret", sealed);
    let req = Request::new("env", "GET", "${ENV.Billing.Primary.host}/${ENV.billing.primary.PATH}")
        .with_header("X-Api-Key", "{EncryptedParameterENV.Billing.Primary.key}")
        .with_header("X-Secret", "${secret}");
    let result = engine.execute_step(&req, &ctx).await;

    assert_eq!(result.status, StepStatus::Passed, "{:?}", result.error);
    let history = result.history_request.unwrap();
    assert_eq!(history.url, format!("{}/invoices", server.uri()));
    assert_eq!(history.header("X-Api-Key"), Some("******"));
    assert_eq!(history.header("X-Secret"), Some("******"));
}

#[tokio::test]
async fn test_macro_value_shared_by_live_and_history() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(&EngineConfig::default());
    let req = Request::new("macro", "GET", server.uri()).with_header("X-Request-Id", "${uuid}");
    let result = engine.execute_step(&req, &ResolvingContext::new()).await;

    let history = result.history_request.unwrap();
    let recorded = history.header("X-Request-Id").unwrap();
    assert_ne!(recorded, "${uuid}");

    let received = server.received_requests().await.unwrap();
    let sent = received[0].headers.get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(sent, recorded);
}

#[tokio::test]
async fn test_unresolved_environment_parameters_are_aggregated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let systems = vec![System::new("Billing").with_connection("Primary", [("path", "invoices")])];
    let engine = engine_with_systems(&EngineConfig::default(), systems);
    let req = Request::new("missing", "GET", format!("{}/${{ENV.Billing.Primary.path}}", server.uri()))
        .with_header("X-One", "${ENV.Billing.Primary.user}")
        .with_header("X-Two", "${ENV.Audit.Main.token}");
    let ctx = ResolvingContext::new().with_environment_id("test");
    let result = engine.execute_step(&req, &ctx).await;

    assert_eq!(result.status, StepStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::VariableNotFound);
    assert!(error.message.contains("ENV.Billing.Primary.user"));
    assert!(error.message.contains("ENV.Audit.Main.token"));
    assert!(!error.message.contains("path"));
}
