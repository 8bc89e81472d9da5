use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;

use crate::error::{DashboardError, Result};
use crate::forms;
use crate::models::{
    ErrorBody, LoginOutcome, PredictionInput, PredictionResult, Record, RecordsEnvelope,
    SentimentResult,
};

/// Sent as `X-CSRFToken`; header names are case-insensitive on the wire.
pub const CSRF_HEADER: &str = "x-csrftoken";

const RECORDS_FALLBACK: &str = "An error occurred while loading dashboard data";
const RETRAIN_FALLBACK: &str = "An error occurred during model retraining";
const PREDICT_FALLBACK: &str = "An error occurred during prediction";
const SENTIMENT_FALLBACK: &str = "An error occurred during sentiment analysis";
const EXPORT_FALLBACK: &str = "An error occurred while exporting records";

/// Server calls the polling loop depends on.
pub trait DashboardApi: Send + Sync + 'static {
    fn fetch_records(&self) -> impl Future<Output = Result<Vec<Record>>> + Send;

    fn predict(&self, input: PredictionInput) -> impl Future<Output = Result<PredictionResult>> + Send;

    fn retrain(&self) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub csrf_token: String,
    pub timeout: Duration,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    csrf_token: String,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if !config.csrf_token.is_empty() {
            let value = HeaderValue::from_str(&config.csrf_token).map_err(|_| {
                DashboardError::action("configure client", "anti-forgery token is not a valid header value")
            })?;
            headers.insert(CSRF_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(ApiClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            csrf_token: config.csrf_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn analyze_sentiment(&self, text: &str) -> Result<SentimentResult> {
        let response = self
            .http
            .post(self.url("/sentiment"))
            .form(&[("text", text), ("csrf_token", self.csrf_token.as_str())])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_json(status, &body, SENTIMENT_FALLBACK)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome> {
        forms::validate_login(username, password)?;

        let requested = self.url("/login");
        let response = self
            .http
            .post(&requested)
            .form(&[
                ("username", username),
                ("password", password),
                ("csrf_token", self.csrf_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        // reqwest normalises the URL, so compare against its parsed form.
        let requested = reqwest::Url::parse(&requested)
            .map(|url| url.to_string())
            .unwrap_or(requested);
        forms::interpret_login_response(&requested, &final_url, status, content_type.as_deref(), &body)
    }

    /// Downloads `/api/export` to `out` and returns the number of data rows.
    pub async fn export_records(&self, out: &Path) -> Result<usize> {
        let response = self.http.get(self.url("/api/export")).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;

        if !(200..300).contains(&status) {
            let body = String::from_utf8_lossy(&bytes);
            return Err(error_from_body(status, &body, EXPORT_FALLBACK));
        }

        let mut reader = csv::Reader::from_reader(bytes.as_ref());
        let mut rows = 0usize;
        for record in reader.records() {
            record?;
            rows += 1;
        }
        tokio::fs::write(out, &bytes).await?;
        tracing::info!(rows, path = %out.display(), "export written");
        Ok(rows)
    }
}

impl DashboardApi for ApiClient {
    async fn fetch_records(&self) -> Result<Vec<Record>> {
        let response = self.http.get(self.url("/api/records")).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let envelope: RecordsEnvelope = decode_json(status, &body, RECORDS_FALLBACK)?;
        tracing::debug!(count = envelope.records.len(), "fetched records");
        Ok(envelope.records)
    }

    async fn predict(&self, input: PredictionInput) -> Result<PredictionResult> {
        let attendance = input.attendance.to_string();
        let assignment = input.assignment_score.to_string();
        let test = input.test_score.to_string();
        let response = self
            .http
            .post(self.url("/predict"))
            .form(&[
                ("student_id", input.student_id.as_str()),
                ("attendance", attendance.as_str()),
                ("assignment_score", assignment.as_str()),
                ("test_score", test.as_str()),
                ("csrf_token", self.csrf_token.as_str()),
            ])
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_json(status, &body, PREDICT_FALLBACK)
    }

    async fn retrain(&self) -> Result<()> {
        let response = self
            .http
            .post(self.url("/admin/retrain"))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if body.trim().is_empty() && (200..300).contains(&status) {
            return Ok(());
        }
        let _: ErrorBody = decode_json(status, &body, RETRAIN_FALLBACK)?;
        Ok(())
    }
}

/// Turns a status and body into either the decoded payload or the single
/// dashboard error channel.
pub fn decode_json<T: DeserializeOwned>(status: u16, body: &str, fallback: &str) -> Result<T> {
    if !(200..300).contains(&status) {
        return Err(error_from_body(status, body, fallback));
    }
    serde_json::from_str(body).map_err(|err| {
        tracing::warn!(%err, "malformed response body");
        DashboardError::Parse {
            raw: body.to_string(),
        }
    })
}

fn error_from_body(status: u16, body: &str, fallback: &str) -> DashboardError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| fallback.to_string());
    DashboardError::Fetch {
        status: Some(status),
        message,
    }
}
