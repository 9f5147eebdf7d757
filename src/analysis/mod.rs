//! Analysis-service boundary: request/finding types, the service trait, and
//! the HTTP client implementation.

pub mod http;
pub mod payload;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use http::HttpAnalysisService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Finding as the service returns it; producers routinely omit fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFinding {
    pub severity: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub recommendation: Option<String>,
    pub evidence: Option<Value>,
}

/// Normalized finding; required fields are never empty so persistence
/// backends never see nulls.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub run_id: String,
    pub section_key: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Value>,
}

impl RawFinding {
    pub fn normalize(self, run_id: &str, section_key: &str) -> Finding {
        let severity = match self
            .severity
            .as_deref()
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("critical") => Severity::Critical,
            Some("high") => Severity::High,
            Some("low") => Severity::Low,
            _ => Severity::Medium,
        };
        Finding {
            run_id: run_id.to_string(),
            section_key: section_key.to_string(),
            severity,
            title: self
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Security Issue".to_string()),
            description: self
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| "No description provided.".to_string()),
            recommendation: self
                .recommendation
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "Review the reported configuration.".to_string()),
            evidence: self.evidence,
        }
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("transient service error: {0}")]
    Transient(String),
    #[error("permanent service error: {0}")]
    Permanent(String),
}

impl AnalysisError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalysisError::Transient(_))
    }
}

/// One bounded-size request for one section or chunk.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub section_key: String,
    pub display_name: String,
    pub chunk_index: u64,
    pub chunk_total: u64,
    pub payload: String,
}

pub trait AnalysisService: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawFinding>, AnalysisError>;
}

/// Finding-free service used when no endpoint is configured.
pub struct NullAnalysisService;

impl AnalysisService for NullAnalysisService {
    fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawFinding>, AnalysisError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn normalize_applies_defaults() {
        let finding = RawFinding::default().normalize("run_1", "Users");
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.title, "Security Issue");
        assert!(!finding.description.is_empty());
        assert!(!finding.recommendation.is_empty());
        assert!(finding.evidence.is_none());
    }

    #[test]
    fn normalize_keeps_provided_fields() {
        let raw = RawFinding {
            severity: Some("CRITICAL".to_string()),
            title: Some("Unconstrained delegation".to_string()),
            description: Some("dc1 allows delegation to any service".to_string()),
            recommendation: Some("Enable constrained delegation".to_string()),
            evidence: Some(json!({"host": "dc1"})),
        };
        let finding = raw.normalize("run_1", "DomainControllers");
        assert_eq!(finding.severity, Severity::Critical);
        assert_eq!(finding.title, "Unconstrained delegation");
        assert_eq!(finding.evidence, Some(json!({"host": "dc1"})));
        assert_eq!(finding.section_key, "DomainControllers");
    }

    #[test]
    fn unknown_severity_defaults_to_medium() {
        let raw = RawFinding {
            severity: Some("urgent".to_string()),
            ..Default::default()
        };
        assert_eq!(raw.normalize("r", "s").severity, Severity::Medium);
    }

    #[test]
    fn blank_title_is_replaced() {
        let raw = RawFinding {
            title: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(raw.normalize("r", "s").title, "Security Issue");
    }
}
