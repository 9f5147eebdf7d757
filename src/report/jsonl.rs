use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::analysis::Finding;
use crate::report::{FindingsSink, ReportError, RunSummary};

pub struct JsonlSink {
    tool_version: String,
    config_hash: String,
    source_path: String,
    source_sha256: String,
    findings_writer: Mutex<BufWriter<File>>,
    summary_writer: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct FindingRecord<'a> {
    #[serde(flatten)]
    finding: &'a Finding,
    tool_version: &'a str,
    config_hash: &'a str,
    source_path: &'a str,
    source_sha256: &'a str,
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    tool_version: &'a str,
    config_hash: &'a str,
    source_path: &'a str,
    source_sha256: &'a str,
}

impl JsonlSink {
    pub fn new(
        tool_version: &str,
        config_hash: &str,
        source_path: &Path,
        source_sha256: &str,
        run_output_dir: &Path,
    ) -> Result<Self, ReportError> {
        let report_dir = run_output_dir.join("reports");
        std::fs::create_dir_all(&report_dir)?;
        let findings = File::create(report_dir.join("findings.jsonl"))?;
        let summary = File::create(report_dir.join("run_summary.jsonl"))?;
        Ok(Self {
            tool_version: tool_version.to_string(),
            config_hash: config_hash.to_string(),
            source_path: source_path.to_string_lossy().to_string(),
            source_sha256: source_sha256.to_string(),
            findings_writer: Mutex::new(BufWriter::new(findings)),
            summary_writer: Mutex::new(BufWriter::new(summary)),
        })
    }
}

impl FindingsSink for JsonlSink {
    fn record_finding(&self, finding: &Finding) -> Result<(), ReportError> {
        let record = FindingRecord {
            finding,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
            source_path: &self.source_path,
            source_sha256: &self.source_sha256,
        };
        let mut guard = self.findings_writer.lock().unwrap();
        serde_json::to_writer(&mut *guard, &record)?;
        guard.write_all(b"\n")?;
        Ok(())
    }

    fn record_summary(&self, summary: &RunSummary) -> Result<(), ReportError> {
        let record = SummaryRecord {
            summary,
            tool_version: &self.tool_version,
            config_hash: &self.config_hash,
            source_path: &self.source_path,
            source_sha256: &self.source_sha256,
        };
        let mut guard = self.summary_writer.lock().unwrap();
        serde_json::to_writer(&mut *guard, &record)?;
        guard.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), ReportError> {
        self.findings_writer.lock().unwrap().flush()?;
        self.summary_writer.lock().unwrap().flush()?;
        Ok(())
    }
}
