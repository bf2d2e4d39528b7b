//! HTTP API tests against an in-memory engine.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use sendguard::api::{AppState, create_router};
use sendguard::config::ServerConfig;
use sendguard_core::alerter::MemoryAlerter;
use sendguard_core::executor::{DryRunExecutor, Executor};
use sendguard_core::settings::CommandTemplates;
use sendguard_core::{Engine, Isp, Running, Settings, db};
use serde_json::{Value, json};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    engine: Arc<Engine>,
    running: Running,
}

async fn app(secret: Option<&str>) -> TestApp {
    let executor: Arc<dyn Executor> = Arc::new(DryRunExecutor::new(CommandTemplates::default()));
    let engine = Arc::new(
        Engine::open(
            Settings::default(),
            db::in_memory().await.unwrap(),
            executor,
            Arc::new(MemoryAlerter::new()),
        )
        .await
        .unwrap(),
    );
    let running = engine.start().unwrap();
    let state = AppState::new(Arc::clone(&engine), secret.map(str::to_string));
    TestApp {
        router: create_router(state, &ServerConfig::default()),
        engine,
        running,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_and_overview() {
    let app = app(None).await;

    let (status, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["executor_available"], true);

    let (status, body) = send(&app.router, get("/api/overview")).await;
    assert_eq!(status, StatusCode::OK);
    let overview: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(overview["isps"].as_array().unwrap().len(), Isp::ALL.len());
    let agents = &overview["agents"];
    let total: u64 = ["idle", "active", "firing", "paused", "degraded"]
        .iter()
        .map(|s| agents[s].as_u64().unwrap())
        .sum();
    assert_eq!(total, 36);
    assert_eq!(agents["firing"], 0);

    app.running.stop().await;
}

#[tokio::test]
async fn test_unknown_isp_is_not_found() {
    let app = app(None).await;
    let (status, body) = send(&app.router, get("/api/isps/hotmail.example/dashboard")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("unknown ISP"));

    let (status, _) = send(&app.router, get("/api/isps/yahoo/dashboard")).await;
    assert_eq!(status, StatusCode::OK);
    app.running.stop().await;
}

#[tokio::test]
async fn test_global_suppression_lifecycle() {
    let app = app(None).await;
    let add = json!({"email": "Blocked@Example.com", "reason": "legal request"});

    let (status, body) = send(&app.router, post_json("/api/suppressions/global", &add)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.contains("blocked@example.com"));
    let (status, body) = send(&app.router, post_json("/api/suppressions/global", &add)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"added\":false"));

    let (_, body) = send(
        &app.router,
        get("/api/suppressions/global/check/blocked@example.com"),
    )
    .await;
    assert!(body.contains("\"allowed\":false"));

    let (status, csv) = send(&app.router, get("/api/suppressions/global/export.csv")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(csv.matches("blocked@example.com").count(), 1);

    let delete = || {
        Request::delete("/api/suppressions/global/blocked@example.com")
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(send(&app.router, delete()).await.0, StatusCode::NO_CONTENT);
    assert_eq!(send(&app.router, delete()).await.0, StatusCode::NOT_FOUND);
    assert!(app.engine.hub.check_send("blocked@example.com"));

    let (status, _) = send(
        &app.router,
        post_json("/api/suppressions/global", &json!({"email": "no-at-sign"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.running.stop().await;
}

#[tokio::test]
async fn test_webhook_secret_is_enforced() {
    let app = app(Some("s3cret")).await;
    let event = json!({"kind": "open", "email": "reader@gmail.com", "campaign_id": "spring"});

    let (status, _) = send(&app.router, post_json("/webhooks/engagement", &event)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::post("/webhooks/engagement")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Secret", "s3cret")
        .body(Body::from(event.to_string()))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    app.running.stop().await;
}

#[tokio::test]
async fn test_accounting_webhook_suppresses_hard_bounce() {
    let app = app(None).await;
    let line = "b,2024-01-15 10:23:45-0500,,news@brand.example,gone@yahoo.com,,failed,5.1.1,\
                smtp;550 5.1.1 user unknown,mta5.am0.yahoodns.net,bad-mailbox\n";
    let request = Request::post("/webhooks/accounting")
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from(line))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body.contains("\"accepted\":1"));

    for _ in 0..100 {
        if app.engine.hub.is_suppressed("gone@yahoo.com") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (_, body) = send(&app.router, get("/api/suppressions/global/check/gone@yahoo.com")).await;
    assert!(body.contains("\"allowed\":false"));

    let (_, body) = send(&app.router, get("/api/isps/yahoo/suppressions")).await;
    assert!(body.contains("gone@yahoo.com"));
    app.running.stop().await;
}

#[tokio::test]
async fn test_one_click_unsubscribe() {
    let app = app(None).await;
    let request = Request::post("/webhooks/unsubscribe?email=leaver@gmail.com&campaign_id=spring")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("List-Unsubscribe=One-Click"))
        .unwrap();
    assert_eq!(send(&app.router, request).await.0, StatusCode::ACCEPTED);

    let request = Request::post("/webhooks/unsubscribe")
        .body(Body::from("List-Unsubscribe=One-Click"))
        .unwrap();
    assert_eq!(send(&app.router, request).await.0, StatusCode::BAD_REQUEST);
    app.running.stop().await;
}

#[tokio::test]
async fn test_pause_and_resume_agent() {
    let app = app(None).await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/isps/gmail/agents/deferral/pause",
            &json!({"reason": "maintenance window"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let state: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(state["status"], "paused");

    let resume = Request::post("/api/isps/gmail/agents/deferral/resume")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, resume).await;
    assert_eq!(status, StatusCode::OK);
    let state: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(state["status"], "active");

    let unknown = Request::post("/api/isps/gmail/agents/spam/pause")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, unknown).await.0, StatusCode::NOT_FOUND);
    app.running.stop().await;
}

#[tokio::test]
async fn test_override_is_recorded_as_operator_decision() {
    let app = app(None).await;
    let (status, body) = send(
        &app.router,
        post_json(
            "/api/isps/microsoft/agents/deferral/override",
            &json!({"action": "throttle_queue", "queue": "outlook.com", "max_msg_rate": 500,
                    "max_connections": 2, "reason": "manual slow-down"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let decision: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(decision["operator"], true);

    let (_, body) = send(&app.router, get("/api/decisions?operator=true&isp=microsoft")).await;
    let decisions: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(decisions.len(), 1);
    app.running.stop().await;
}

#[tokio::test]
async fn test_rules_validation_and_crud() {
    let app = app(None).await;
    let rule = json!({
        "isp": "yahoo",
        "agent_type": "bounce",
        "metric": "bounce_rate_1h",
        "comparison": "gte",
        "threshold": 0.03,
        "description": "tighter bounce limit"
    });

    let (status, body) = send(&app.router, post_json("/api/rules", &rule)).await;
    assert_eq!(status, StatusCode::CREATED);
    let created: Value = serde_json::from_str(&body).unwrap();
    let id = created["id"].as_i64().unwrap();

    let mut invalid = rule.clone();
    invalid["threshold"] = json!(2.5);
    let (status, _) = send(&app.router, post_json("/api/rules", &invalid)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let delete = Request::delete(format!("/api/rules/{id}"))
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app.router, delete).await.0, StatusCode::NO_CONTENT);
    let (_, body) = send(&app.router, get("/api/rules")).await;
    assert_eq!(body, "[]");
    app.running.stop().await;
}

#[tokio::test]
async fn test_taught_verdict_appears_in_stats() {
    let app = app(None).await;
    let teach = json!({"isp": "apple", "agent_type": "complaint", "verdict": "wont",
                       "note": "seasonal list cleanup"});
    let (status, _) = send(&app.router, post_json("/api/convictions", &teach)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = send(&app.router, get("/api/convictions/stats?isp=apple")).await;
    let stats: Vec<Value> = serde_json::from_str(&body).unwrap();
    let complaint = stats
        .iter()
        .find(|s| s["agent_type"] == "complaint")
        .unwrap();
    assert_eq!(complaint["wont"], 1);

    let (_, body) = send(&app.router, get("/api/convictions?isp=apple&verdict=wont")).await;
    let convictions: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(convictions.len(), 1);
    app.running.stop().await;
}
