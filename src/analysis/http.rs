use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::analysis::{AnalysisError, AnalysisRequest, AnalysisService, RawFinding};

/// Blocking HTTP client for the analysis endpoint. Timeouts, connection
/// failures and 5xx responses are transient; other non-success statuses and
/// undecodable bodies are permanent.
pub struct HttpAnalysisService {
    client: reqwest::blocking::Client,
    url: String,
}

#[derive(Deserialize)]
struct ServiceResponse {
    #[serde(default)]
    findings: Vec<RawFinding>,
    error: Option<String>,
}

impl HttpAnalysisService {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Permanent(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl AnalysisService for HttpAnalysisService {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawFinding>, AnalysisError> {
        let body = json!({
            "sectionKey": request.section_key,
            "payload": request.payload,
        });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    AnalysisError::Transient(format!("request failed: {e}"))
                } else {
                    AnalysisError::Permanent(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AnalysisError::Transient(format!(
                "service returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(AnalysisError::Permanent(format!(
                "service returned {status}"
            )));
        }

        let parsed: ServiceResponse = response
            .json()
            .map_err(|e| AnalysisError::Permanent(format!("undecodable response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(AnalysisError::Permanent(error));
        }
        Ok(parsed.findings)
    }
}
