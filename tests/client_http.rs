//! Drives `ApiClient` against a canned hyper server.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use groupscholar_dropout_dashboard::client::{ApiClient, ClientConfig, DashboardApi};
use groupscholar_dropout_dashboard::models::{LoginOutcome, PredictionInput, RiskLevel};
use groupscholar_dropout_dashboard::DashboardError;

const TOKEN: &str = "test-token";

#[derive(Debug, Clone)]
struct Captured {
    method: String,
    path: String,
    headers: HeaderMap,
    body: String,
}

/// Answers every request with the same canned response and records what it
/// was sent.
struct StubServer {
    url: String,
    requests: Arc<Mutex<Vec<Captured>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    async fn start(status: u16, content_type: &'static str, reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let captured = Arc::clone(&captured);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req: Request<Incoming>| {
                        let captured = Arc::clone(&captured);
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body
                                .collect()
                                .await
                                .map(|collected| collected.to_bytes())
                                .unwrap_or_default();
                            captured.lock().unwrap().push(Captured {
                                method: parts.method.to_string(),
                                path: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body: String::from_utf8_lossy(&body).into_owned(),
                            });
                            let response = Response::builder()
                                .status(status)
                                .header(CONTENT_TYPE, content_type)
                                .body(Full::new(Bytes::from_static(reply.as_bytes())))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        StubServer {
            url,
            requests,
            task,
        }
    }

    fn client(&self) -> ApiClient {
        client(self.url.clone())
    }

    fn only_request(&self) -> Captured {
        let requests = self.requests.lock().unwrap();
        assert_eq!(requests.len(), 1, "expected exactly one request");
        requests[0].clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn client(base_url: String) -> ApiClient {
    ApiClient::new(&ClientConfig {
        base_url,
        csrf_token: TOKEN.to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn fetch_records_sends_token_and_parses() {
    let body = r#"{"records":[
        {"student_id":"S12345","timestamp":"2023-05-15 14:30:00","risk_level":"Low","risk_probability":0.25},
        {"student_id":"S67890","timestamp":"2023-05-15T15:45:00Z","sentiment_score_percent":64}
    ]}"#;
    let server = StubServer::start(200, "application/json", body).await;

    let records = server.client().fetch_records().await.unwrap();
    let request = server.only_request();

    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/api/records");
    assert_eq!(request.headers.get("x-csrftoken").unwrap(), TOKEN);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].risk_level, Some(RiskLevel::Low));
    assert_eq!(records[1].risk_level, None);
    assert_eq!(records[1].sentiment_score_percent, Some(64.0));
}

#[tokio::test]
async fn server_error_message_reaches_caller() {
    let server = StubServer::start(500, "application/json", r#"{"error":"db down"}"#).await;

    let err = server.client().fetch_records().await.unwrap_err();

    assert_eq!(err.to_string(), "db down");
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn malformed_body_is_parse_failure() {
    let server = StubServer::start(200, "text/html", "<html>maintenance</html>").await;

    let err = server.client().fetch_records().await.unwrap_err();

    assert!(matches!(err, DashboardError::Parse { ref raw } if raw.contains("maintenance")));
}

#[tokio::test]
async fn unreachable_server_is_fetch_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(format!("http://{addr}")).fetch_records().await.unwrap_err();
    assert!(matches!(err, DashboardError::Fetch { status: None, .. }));
}

#[tokio::test]
async fn retrain_posts_and_accepts_empty_body() {
    let server = StubServer::start(200, "application/json", "").await;

    server.client().retrain().await.unwrap();
    let request = server.only_request();
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/admin/retrain");
    assert_eq!(request.headers.get("x-csrftoken").unwrap(), TOKEN);
}

#[tokio::test]
async fn retrain_failure_uses_server_message() {
    let server = StubServer::start(403, "application/json", r#"{"error":"Unauthorized"}"#).await;

    let err = server.client().retrain().await.unwrap_err();
    assert_eq!(err.to_string(), "Unauthorized");
}

#[tokio::test]
async fn predict_submits_form_fields() {
    let server = StubServer::start(
        200,
        "application/json",
        r#"{"risk_level":"Medium","risk_percentage":45,"risk_probability":0.45,"timestamp":"2026-01-01 10:00:00"}"#,
    )
    .await;

    let result = server
        .client()
        .predict(PredictionInput {
            student_id: "S1".to_string(),
            attendance: 70.0,
            assignment_score: 65.5,
            test_score: 60.0,
        })
        .await
        .unwrap();
    let request = server.only_request();

    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/predict");
    assert_eq!(
        request.headers.get(CONTENT_TYPE).unwrap(),
        "application/x-www-form-urlencoded"
    );
    assert!(request.body.contains("student_id=S1"));
    assert!(request.body.contains("assignment_score=65.5"));
    assert_eq!(result.risk_level, RiskLevel::Medium);
    assert_eq!(result.risk_percentage, 45.0);
}

#[tokio::test]
async fn sentiment_result_is_decoded() {
    let server = StubServer::start(
        200,
        "application/json",
        r#"{"sentiment_score":0.5,"sentiment_score_percent":75,"sentiment_label":"Positive"}"#,
    )
    .await;

    let result = server.client().analyze_sentiment("great and helpful").await.unwrap();
    let request = server.only_request();

    assert!(request.body.starts_with("text=great+and+helpful&"));
    assert!(request.body.contains(&format!("csrf_token={TOKEN}")));
    assert_eq!(result.sentiment_score_percent, 75.0);
}

#[tokio::test]
async fn login_json_error_and_redirect() {
    let server = StubServer::start(401, "application/json", r#"{"error":"Bad password"}"#).await;
    let err = server.client().login("admin", "wrong").await.unwrap_err();
    assert_eq!(err.to_string(), "Bad password");

    let server = StubServer::start(200, "application/json", r#"{"redirect":"/admin/dashboard"}"#).await;
    let outcome = server.client().login("admin", "admin123").await.unwrap();
    assert_eq!(outcome, LoginOutcome::Redirect("/admin/dashboard".to_string()));
    assert_eq!(server.only_request().path, "/login");
}

#[tokio::test]
async fn login_rejects_blank_username_without_request() {
    let err = client("http://127.0.0.1:9".to_string())
        .login("", "secret")
        .await
        .unwrap_err();
    assert!(matches!(err, DashboardError::Action { .. }));
}

#[tokio::test]
async fn export_writes_csv_and_counts_rows() {
    let csv = "student_id,timestamp,risk_level\nS1,2026-01-01 10:00:00,Low\nS2,2026-01-02 11:00:00,High\n";
    let server = StubServer::start(200, "text/csv", csv).await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.csv");

    let rows = server.client().export_records(&out).await.unwrap();

    assert_eq!(rows, 2);
    assert_eq!(server.only_request().path, "/api/export");
    assert_eq!(std::fs::read_to_string(&out).unwrap(), csv);
}

#[tokio::test]
async fn malformed_export_leaves_no_file() {
    let server = StubServer::start(200, "text/csv", "a,b\n1,2,3\n").await;
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("records.csv");

    let err = server.client().export_records(&out).await.unwrap_err();

    assert!(matches!(err, DashboardError::Csv(_)));
    assert!(!out.exists());
}
