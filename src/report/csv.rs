use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::analysis::Finding;
use crate::report::{FindingsSink, ReportError, RunSummary};

pub struct CsvSink {
    tool_version: String,
    config_hash: String,
    source_path: String,
    source_sha256: String,
    findings_writer: Mutex<csv::Writer<File>>,
    summary_writer: Mutex<csv::Writer<File>>,
}

#[derive(Serialize)]
struct FindingCsv<'a> {
    run_id: &'a str,
    section_key: &'a str,
    severity: &'a str,
    title: &'a str,
    description: &'a str,
    recommendation: &'a str,
    evidence: String,
    tool_version: &'a str,
    config_hash: &'a str,
    source_path: &'a str,
    source_sha256: &'a str,
}

#[derive(Serialize)]
struct SummaryCsv<'a> {
    run_id: &'a str,
    bytes_scanned: u64,
    sections_present: u64,
    sections_absent: u64,
    chunks_built: u64,
    tasks_run: u64,
    tasks_failed: u64,
    findings_recorded: u64,
    critical: u64,
    high: u64,
    medium: u64,
    low: u64,
    tool_version: &'a str,
    config_hash: &'a str,
    source_path: &'a str,
    source_sha256: &'a str,
}

impl CsvSink {
    pub fn new(
        tool_version: &str,
        config_hash: &str,
        source_path: &Path,
        source_sha256: &str,
        run_output_dir: &Path,
    ) -> Result<Self, ReportError> {
        let report_dir = run_output_dir.join("reports");
        std::fs::create_dir_all(&report_dir)?;
        let findings = csv::Writer::from_path(report_dir.join("findings.csv"))?;
        let summary = csv::Writer::from_path(report_dir.join("run_summary.csv"))?;
        Ok(Self {
            tool_version: tool_version.to_string(),
            config_hash: config_hash.to_string(),
            source_path: source_path.to_string_lossy().to_string(),
            source_sha256: source_sha256.to_string(),
            findings_writer: Mutex::new(findings),
            summary_writer: Mutex::new(summary),
        })
    }
}

impl FindingsSink for CsvSink {
    fn record_finding(&self, finding: &Finding) -> Result<(), ReportError> {
        let evidence = match &finding.evidence {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let row = FindingCsv {
            run_id: &finding.run_id,
            section_key: &finding.section_key,
            severity: finding.severity.as_str(),
            title: &finding.title,
            description: &finding.description,
            recommendation: &finding.recommendation,
            evidence,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
            source_path: &self.source_path,
            source_sha256: &self.source_sha256,
        };
        let mut guard = self.findings_writer.lock().unwrap();
        guard.serialize(row)?;
        Ok(())
    }

    fn record_summary(&self, summary: &RunSummary) -> Result<(), ReportError> {
        let row = SummaryCsv {
            run_id: &summary.run_id,
            bytes_scanned: summary.bytes_scanned,
            sections_present: summary.sections_present,
            sections_absent: summary.sections_absent,
            chunks_built: summary.chunks_built,
            tasks_run: summary.tasks_run,
            tasks_failed: summary.tasks_failed,
            findings_recorded: summary.findings_recorded,
            critical: summary.critical,
            high: summary.high,
            medium: summary.medium,
            low: summary.low,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
            source_path: &self.source_path,
            source_sha256: &self.source_sha256,
        };
        let mut guard = self.summary_writer.lock().unwrap();
        guard.serialize(row)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), ReportError> {
        self.findings_writer.lock().unwrap().flush()?;
        self.summary_writer.lock().unwrap().flush()?;
        Ok(())
    }
}
