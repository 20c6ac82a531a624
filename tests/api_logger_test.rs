/// Integration tests for the capture middleware, end to end through SQLite
use api_logger::{
    capture::{
        api_logger_middleware, ApiLogger, AuthenticatedUser, NewLogRecord, RecordWriter,
    },
    config::{LoggerConfig, OverflowPolicy, QueueConfig},
    handlers::{self, logs_api::LogApiState},
    server::create_router,
    store::{LogDb, LogFilter, Sort},
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware, Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    db: Arc<LogDb>,
    logger: Arc<ApiLogger>,
}

async fn app(cfg: LoggerConfig) -> TestApp {
    let db = Arc::new(LogDb::in_memory().await.unwrap());
    let logger = Arc::new(ApiLogger::from_config(&cfg, db.clone()).unwrap());
    let state = LogApiState { db: db.clone(), slow_threshold_ms: cfg.slow_request_threshold_ms };

    TestApp { router: create_router(logger.clone(), state), db, logger }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned())
}

async fn records(db: &LogDb) -> Vec<api_logger::capture::LogRecord> {
    db.export_logs(&LogFilter::default(), Sort::default()).await.unwrap()
}

/// Responses too large to buffer are logged once the client has read them
async fn wait_for_count(db: &LogDb, count: u64) {
    for _ in 0..200 {
        if db.count().await.unwrap() >= count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {} records", count);
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("host", "api.example.com")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "api.example.com")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_sensitive_body_is_redacted() {
    let app = app(LoggerConfig::default()).await;

    let (status, body) = send(
        &app.router,
        post_json("/api/test", r#"{"username":"u","password":"secret123"}"#),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    // The client still sees its own payload
    assert!(body.contains("secret123"));

    let logs = records(&app.db).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].method, "POST");
    assert_eq!(logs[0].url, "http://api.example.com/api/test");
    assert_eq!(logs[0].request_body.as_deref(), Some("[Sensitive content redacted]"));
    assert_eq!(logs[0].response_body.as_deref(), Some("[Sensitive content redacted]"));
    assert!(!serde_json::to_string(&logs[0]).unwrap().contains("secret123"));
}

#[tokio::test]
async fn test_plain_body_is_stored_verbatim() {
    let app = app(LoggerConfig::default()).await;

    send(&app.router, post_json("/api/test", r#"{"name":"widget"}"#)).await;

    let logs = records(&app.db).await;
    assert_eq!(logs[0].request_body.as_deref(), Some(r#"{"name":"widget"}"#));
    assert_eq!(logs[0].response_status, 200);
    assert!(logs[0].response_time_ms >= 0.0);
}

#[tokio::test]
async fn test_sensitive_headers_are_redacted() {
    let app = app(LoggerConfig::default()).await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/test")
        .header("host", "api.example.com")
        .header("authorization", "Bearer x")
        .header("content-type", "application/json")
        .header("user-agent", "integration-test/1.0")
        .body(Body::empty())
        .unwrap();
    send(&app.router, request).await;

    let logs = records(&app.db).await;
    assert_eq!(logs[0].request_headers.get("Authorization"), Some("[REDACTED]"));
    assert_eq!(logs[0].request_headers.get("Content-Type"), Some("application/json"));
    assert_eq!(logs[0].user_agent.as_deref(), Some("integration-test/1.0"));
}

#[tokio::test]
async fn test_disabled_logger_records_nothing() {
    let app = app(LoggerConfig { enabled: false, ..Default::default() }).await;

    let (status, _) = send(&app.router, get("/api/test")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.db.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_excluded_path_method_and_status() {
    let cfg = LoggerConfig {
        excluded_paths: vec!["/api/test".to_string()],
        ..Default::default()
    };
    let excluded_path = app(cfg).await;
    let (status, _) = send(&excluded_path.router, get("/api/test")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(excluded_path.db.count().await.unwrap(), 0);

    let app = app(LoggerConfig::default()).await;

    let options = Request::builder()
        .method("OPTIONS")
        .uri("/api/test")
        .body(Body::empty())
        .unwrap();
    send(&app.router, options).await;

    let (status, _) = send(&app.router, get("/api/test?status=404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    assert_eq!(app.db.count().await.unwrap(), 0);

    let (status, _) = send(&app.router, get("/api/test?status=500")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.db.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_excluded_ip() {
    let cfg = LoggerConfig {
        excluded_ips: vec!["10.0.0.9".to_string()],
        ..Default::default()
    };
    let app = app(cfg).await;

    for ip in ["10.0.0.9", "10.0.0.8"] {
        let mut request = get("/api/test");
        let addr: SocketAddr = format!("{}:5555", ip).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        send(&app.router, request).await;
    }

    let logs = records(&app.db).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].ip_address.as_deref(), Some("10.0.0.8"));
}

#[tokio::test]
async fn test_correlation_id_from_header_or_generated() {
    let app = app(LoggerConfig::default()).await;

    let mut request = get("/api/test?n=1");
    request
        .headers_mut()
        .insert("x-correlation-id", "abc-123".parse().unwrap());
    send(&app.router, request).await;
    send(&app.router, get("/api/test?n=2")).await;

    let logs = records(&app.db).await;
    let tagged = logs.iter().find(|r| r.url.ends_with("n=1")).unwrap();
    let generated = logs.iter().find(|r| r.url.ends_with("n=2")).unwrap();

    assert_eq!(tagged.correlation_id, "abc-123");
    let uuid = uuid::Uuid::parse_str(&generated.correlation_id).unwrap();
    assert_eq!(uuid.get_version_num(), 4);
}

#[tokio::test]
async fn test_metadata_captures_route_and_query() {
    let app = app(LoggerConfig::default()).await;

    let request = Request::builder()
        .uri("/api/test/42?status=201&tag=a&tag=b")
        .header("host", "api.example.com")
        .header("accept", "application/json")
        .header("referer", "https://app.example.com/orders")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::CREATED);

    let logs = records(&app.db).await;
    let metadata = &logs[0].metadata;
    assert_eq!(metadata["route_name"], "/api/test/:id");
    assert_eq!(metadata["route_action"], "demo.echo");
    assert_eq!(metadata["route_parameters"], serde_json::json!({ "id": "42" }));
    assert_eq!(metadata["query_parameters"]["status"], "201");
    assert_eq!(metadata["query_parameters"]["tag"], serde_json::json!(["a", "b"]));
    assert_eq!(metadata["accept"], "application/json");
    assert_eq!(metadata["referer"], "https://app.example.com/orders");
    assert!(metadata["origin"].is_null());
}

#[tokio::test]
async fn test_route_without_parameters_records_empty_object() {
    let app = app(LoggerConfig::default()).await;

    send(&app.router, get("/api/test")).await;

    let logs = records(&app.db).await;
    assert_eq!(logs[0].metadata["route_name"], "/api/test");
    assert_eq!(logs[0].metadata["route_parameters"], serde_json::json!({}));
}

#[tokio::test]
async fn test_oversized_body_is_replaced() {
    let app = app(LoggerConfig { max_body_size: 16, ..Default::default() }).await;

    let payload = r#"{"description":"a fairly long body"}"#;
    let (_, body) = send(&app.router, post_json("/api/test", payload)).await;
    assert!(body.contains("a fairly long body"));

    wait_for_count(&app.db, 1).await;
    let logs = records(&app.db).await;
    assert_eq!(logs[0].request_body.as_deref(), Some("[Content too large to log]"));
    assert_eq!(logs[0].response_body.as_deref(), Some("[Content too large to log]"));
}

#[tokio::test]
async fn test_authenticated_user_is_recorded() {
    let db = Arc::new(LogDb::in_memory().await.unwrap());
    let logger = Arc::new(ApiLogger::from_config(&LoggerConfig::default(), db.clone()).unwrap());

    // The auth layer sits outside the logger, as a host application would mount it
    let router = handlers::demo::routes()
        .layer(middleware::from_fn_with_state(logger, api_logger_middleware))
        .layer(Extension(AuthenticatedUser("user-42".to_string())));

    send(&router, get("/api/test")).await;

    let logs = records(&db).await;
    assert_eq!(logs[0].user_id.as_deref(), Some("user-42"));
    assert_eq!(logs[0].session_id, None);
}

#[tokio::test]
async fn test_queued_mode_persists_after_flush() {
    let cfg = LoggerConfig {
        use_queue: true,
        queue: QueueConfig {
            capacity: 64,
            overflow: OverflowPolicy::Block,
            batch_size: 10,
            flush_interval_ms: 60_000,
        },
        ..Default::default()
    };
    let app = app(cfg).await;

    for i in 0..3 {
        let (status, _) = send(&app.router, get(&format!("/api/test?i={}", i))).await;
        assert_eq!(status, StatusCode::OK);
    }

    app.logger.sink().flush().await;

    assert_eq!(app.db.count().await.unwrap(), 3);
    assert_eq!(app.logger.sink().dropped(), 0);
}

struct BrokenStore;

#[async_trait]
impl RecordWriter for BrokenStore {
    async fn write(&self, _record: &NewLogRecord) -> anyhow::Result<i64> {
        anyhow::bail!("disk full")
    }
}

#[tokio::test]
async fn test_storage_failure_is_invisible_to_client() {
    let logger = Arc::new(
        ApiLogger::from_config(&LoggerConfig::default(), Arc::new(BrokenStore)).unwrap(),
    );
    let router = handlers::demo::routes()
        .layer(middleware::from_fn_with_state(logger, api_logger_middleware));

    let (status, body) = send(&router, post_json("/api/test", r#"{"a":1}"#)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"a\":1"));
}

#[tokio::test]
async fn test_management_api_is_not_logged() {
    let app = app(LoggerConfig::default()).await;

    send(&app.router, get("/logs")).await;
    send(&app.router, get("/health")).await;

    assert_eq!(app.db.count().await.unwrap(), 0);
}
