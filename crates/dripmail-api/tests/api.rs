use axum::http::StatusCode;
use axum_test::TestServer;
use dripmail_api::{create_router, AppState};
use dripmail_common::config::{ApiConfig, SchedulerConfig};
use dripmail_core::DripEngine;
use dripmail_storage::{MemoryStore, Repositories};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

fn test_server() -> (TestServer, Arc<DripEngine>) {
    let repos = Repositories::memory(MemoryStore::new());
    let engine = Arc::new(DripEngine::from_config(
        repos.clone(),
        &SchedulerConfig::default(),
    ));
    let state = AppState::new(repos, engine.clone());
    let router = create_router(state, &ApiConfig::default());
    (TestServer::new(router).unwrap(), engine)
}

fn two_step_sequence() -> Value {
    json!({
        "name": "Onboarding",
        "steps": [
            {
                "step_number": 1,
                "subject_template": "Welcome {firstName}",
                "body_template": "<p>Hi {firstName}</p>",
                "delay_days": 0
            },
            {
                "step_number": 2,
                "subject_template": "Checking in",
                "body_template": "<p>How is {company} doing?</p>",
                "delay_days": 2
            }
        ]
    })
}

async fn create_sequence(server: &TestServer) -> String {
    let response = server
        .post("/api/v1/sequences")
        .json(&two_step_sequence())
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["id"].as_str().unwrap().to_string()
}

async fn create_campaign(server: &TestServer, sequence_id: &str, contacts: Value) -> Value {
    let response = server
        .post("/api/v1/campaigns")
        .json(&json!({
            "name": "Spring launch",
            "sequence_id": sequence_id,
            "from_email": "team@example.com",
            "smtp_config": {
                "host": "smtp.example.com",
                "port": 587,
                "user": "mailer",
                "password": "hunter2",
                "secure": false
            },
            "contacts": contacts
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_health_endpoints() {
    let (server, _) = test_server();

    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "healthy");

    server.get("/health/live").await.assert_status_ok();

    let response = server.get("/health/ready").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ready");
    assert_eq!(body["armed_timers"], 0);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let (server, _) = test_server();

    let response = server.get("/openapi.json").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["openapi"], "3.0.3");
    assert!(body["paths"]["/api/v1/campaigns/{campaign_id}/start"].is_object());
}

#[tokio::test]
async fn test_sequence_crud() {
    let (server, _) = test_server();
    let id = create_sequence(&server).await;

    let response = server.get(&format!("/api/v1/sequences/{}", id)).await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["name"], "Onboarding");
    assert_eq!(body["steps"].as_array().unwrap().len(), 2);
    assert_eq!(body["steps"][1]["delay_days"], 2);

    let list = server.get("/api/v1/sequences").await.json::<Value>();
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let response = server
        .put(&format!("/api/v1/sequences/{}", id))
        .json(&json!({
            "name": "Onboarding v2",
            "steps": [{
                "step_number": 1,
                "subject_template": "Hello",
                "body_template": "<p>Hello</p>"
            }]
        }))
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["name"], "Onboarding v2");
    assert_eq!(body["steps"].as_array().unwrap().len(), 1);

    server
        .delete(&format!("/api/v1/sequences/{}", id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .get(&format!("/api/v1/sequences/{}", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sequence_validation_errors() {
    let (server, _) = test_server();

    let response = server
        .post("/api/v1/sequences")
        .json(&json!({
            "name": "",
            "steps": [
                {"step_number": 1, "subject_template": "A", "body_template": "a"},
                {"step_number": 3, "subject_template": "B", "body_template": "b", "delay_days": -1}
            ]
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body = response.json::<Value>();
    assert_eq!(body["error"], "validation_error");
    let fields: Vec<&str> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"steps"));
    assert!(fields.contains(&"steps[1].delay_days"));
}

#[tokio::test]
async fn test_sequence_rejects_unbounded_delay() {
    let (server, _) = test_server();

    let response = server
        .post("/api/v1/sequences")
        .json(&json!({
            "name": "Forever",
            "steps": [
                {"step_number": 1, "subject_template": "A", "body_template": "a", "delay_days": 2147483647}
            ]
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body = response.json::<Value>();
    assert_eq!(body["details"][0]["field"], "steps[0].delay_days");
}

#[tokio::test]
async fn test_sequence_in_use_cannot_change() {
    let (server, _) = test_server();
    let sequence_id = create_sequence(&server).await;
    create_campaign(&server, &sequence_id, json!([])).await;

    let response = server
        .delete(&format!("/api/v1/sequences/{}", sequence_id))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "conflict");

    server
        .put(&format!("/api/v1/sequences/{}", sequence_id))
        .json(&two_step_sequence())
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_create_campaign_hides_password() {
    let (server, _) = test_server();
    let sequence_id = create_sequence(&server).await;

    let created = create_campaign(
        &server,
        &sequence_id,
        json!([
            {"email": "Ada@Example.com", "firstName": "Ada"},
            {"email": "grace@example.com", "firstName": "Grace"},
            {"email": "ada@example.com", "firstName": "Again"}
        ]),
    )
    .await;

    assert_eq!(created["added"], 2);
    assert_eq!(created["errors"].as_array().unwrap().len(), 1);
    assert_eq!(created["errors"][0]["index"], 2);
    assert_eq!(created["campaign"]["status"], "draft");
    assert_eq!(created["campaign"]["smtp"]["host"], "smtp.example.com");
    assert!(created["campaign"]["smtp"].get("password").is_none());
    assert!(!created.to_string().contains("hunter2"));

    let id = created["campaign"]["id"].as_str().unwrap();
    let body = server
        .get(&format!("/api/v1/campaigns/{}", id))
        .await
        .json::<Value>();
    assert_eq!(body["contacts"]["pending"], 2);
    assert!(!body.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_create_campaign_validation() {
    let (server, _) = test_server();
    let sequence_id = create_sequence(&server).await;

    let response = server
        .post("/api/v1/campaigns")
        .json(&json!({
            "name": "Broken",
            "sequence_id": sequence_id,
            "from_email": "not-an-address",
            "smtp_config": {"host": "", "port": 587},
            "contacts": [{"firstName": "Nobody"}]
        }))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let fields: Vec<String> = response.json::<Value>()["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        fields,
        vec!["from_email", "smtp_config.host", "contacts[0].email"]
    );
}

#[tokio::test]
async fn test_create_campaign_unknown_sequence() {
    let (server, _) = test_server();

    let response = server
        .post("/api/v1/campaigns")
        .json(&json!({
            "name": "Orphan",
            "sequence_id": uuid::Uuid::new_v4(),
            "from_email": "team@example.com",
            "smtp_config": {"host": "smtp.example.com", "port": 25}
        }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_campaign_lifecycle() {
    let (server, engine) = test_server();
    let sequence_id = create_sequence(&server).await;
    let created = create_campaign(
        &server,
        &sequence_id,
        json!([
            {"email": "ada@example.com", "firstName": "Ada"},
            {"email": "grace@example.com", "firstName": "Grace"}
        ]),
    )
    .await;
    let id = created["campaign"]["id"].as_str().unwrap().to_string();

    let response = server.post(&format!("/api/v1/campaigns/{}/start", id)).await;
    response.assert_status_ok();
    let report = response.json::<Value>();
    assert_eq!(report["affected"], 2);
    assert_eq!(report["scheduled"], 2);
    assert_eq!(engine.timers().armed_count().await, 2);

    let contacts = server
        .get(&format!("/api/v1/campaigns/{}/contacts", id))
        .await
        .json::<Value>();
    for contact in contacts["data"].as_array().unwrap() {
        assert_eq!(contact["status"], "active");
        assert_eq!(contact["current_step_number"], 0);
        assert!(contact["next_send_time"].is_string());
    }

    // Starting twice is a conflict
    let response = server.post(&format!("/api/v1/campaigns/{}/start", id)).await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(
        response.json::<Value>()["message"],
        "Cannot start a campaign that is active"
    );

    let response = server
        .post(&format!("/api/v1/campaigns/{}/contacts", id))
        .json(&json!([
            {"email": "linus@example.com", "firstName": "Linus"},
            {"email": "ada@example.com"},
            {"name": "no email"}
        ]))
        .await;
    response.assert_status_ok();
    let report = response.json::<Value>();
    assert_eq!(report["added"], 1);
    assert_eq!(report["errors"].as_array().unwrap().len(), 2);
    assert_eq!(engine.timers().armed_count().await, 3);

    let response = server.post(&format!("/api/v1/campaigns/{}/pause", id)).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["affected"], 3);
    assert_eq!(engine.timers().armed_count().await, 0);

    let body = server
        .get(&format!("/api/v1/campaigns/{}", id))
        .await
        .json::<Value>();
    assert_eq!(body["status"], "paused");
    assert_eq!(body["contacts"]["paused"], 3);

    // Contacts can only be added while active
    server
        .post(&format!("/api/v1/campaigns/{}/contacts", id))
        .json(&json!([{"email": "late@example.com"}]))
        .await
        .assert_status(StatusCode::CONFLICT);
    server
        .post(&format!("/api/v1/campaigns/{}/retry-failed", id))
        .await
        .assert_status(StatusCode::CONFLICT);

    let response = server.post(&format!("/api/v1/campaigns/{}/start", id)).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["affected"], 3);
    assert_eq!(engine.timers().armed_count().await, 3);

    let response = server
        .post(&format!("/api/v1/campaigns/{}/retry-failed", id))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["affected"], 0);

    server
        .delete(&format!("/api/v1/campaigns/{}", id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    assert_eq!(engine.timers().armed_count().await, 0);
    server
        .get(&format!("/api/v1/campaigns/{}/contacts", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_campaign_operations() {
    let (server, _) = test_server();
    let id = uuid::Uuid::new_v4();

    for path in ["start", "pause", "retry-failed"] {
        let response = server
            .post(&format!("/api/v1/campaigns/{}/{}", id, path))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "not_found");
    }

    server
        .get(&format!("/api/v1/campaigns/{}", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .delete(&format!("/api/v1/campaigns/{}", id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
