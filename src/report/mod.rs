pub mod csv;
pub mod jsonl;

use std::path::Path;

use thiserror::Error;

use crate::analysis::Finding;

/// Totals recorded once the run finalizes.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub bytes_scanned: u64,
    pub sections_present: u64,
    pub sections_absent: u64,
    pub chunks_built: u64,
    pub tasks_run: u64,
    pub tasks_failed: u64,
    pub findings_recorded: u64,
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

#[derive(Debug, Clone, Copy)]
pub enum ReportBackendKind {
    Jsonl,
    Csv,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persistence boundary for merged findings and the run summary.
pub trait FindingsSink: Send + Sync {
    fn record_finding(&self, finding: &Finding) -> Result<(), ReportError>;
    fn record_summary(&self, summary: &RunSummary) -> Result<(), ReportError>;
    fn flush(&self) -> Result<(), ReportError>;
}

/// A no-op sink for dry runs.
pub struct NullSink;

impl FindingsSink for NullSink {
    fn record_finding(&self, _finding: &Finding) -> Result<(), ReportError> {
        Ok(())
    }
    fn record_summary(&self, _summary: &RunSummary) -> Result<(), ReportError> {
        Ok(())
    }
    fn flush(&self) -> Result<(), ReportError> {
        Ok(())
    }
}

pub fn build_sink(
    backend: ReportBackendKind,
    tool_version: &str,
    config_hash: &str,
    source_path: &Path,
    source_sha256: &str,
    run_output_dir: &Path,
) -> Result<Box<dyn FindingsSink>, ReportError> {
    match backend {
        ReportBackendKind::Jsonl => Ok(Box::new(jsonl::JsonlSink::new(
            tool_version,
            config_hash,
            source_path,
            source_sha256,
            run_output_dir,
        )?)),
        ReportBackendKind::Csv => Ok(Box::new(csv::CsvSink::new(
            tool_version,
            config_hash,
            source_path,
            source_sha256,
            run_output_dir,
        )?)),
    }
}
