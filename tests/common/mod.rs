//! Shared test infrastructure: synthetic inventory documents, a scripted
//! analysis service, and a pipeline harness over a temp directory.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use adlens::analysis::{AnalysisError, AnalysisRequest, AnalysisService, RawFinding};
use adlens::config::{self, Config};
use adlens::pipeline::{self, PipelineStats};
use adlens::report::{self, ReportBackendKind};
use adlens::source::FsBlobStore;
use adlens::store::json::JsonStore;
use adlens::store::{ProgressStore, RunProgress, RunStatus};

/// Build an inventory document with the given Users count plus small GPOs
/// and DomainInfo sections.
pub fn inventory_doc(users: usize) -> String {
    let user_elements: Vec<Value> = (0..users)
        .map(|i| json!({"samAccountName": format!("user{i}"), "enabled": i % 2 == 0}))
        .collect();
    serde_json::to_string(&json!({
        "exportedAt": "2026-01-15T10:00:00Z",
        "Users": user_elements,
        "GPOs": [{"displayName": "Default Domain Policy", "gpoStatus": "AllSettingsEnabled"}],
        "DomainInfo": {"name": "corp.local", "functionalLevel": 7},
    }))
    .expect("doc")
}

type TaskKey = (String, u64);

/// Scripted analysis service: permanent failures, counted transient
/// failures, per-call hooks, and a fixed findings yield per task.
#[derive(Default)]
pub struct MockService {
    fail_permanent: Mutex<HashSet<TaskKey>>,
    fail_transient: Mutex<HashMap<TaskKey, u32>>,
    pub calls: Mutex<Vec<TaskKey>>,
    pub findings_per_task: usize,
    #[allow(clippy::type_complexity)]
    pub on_call: Option<Box<dyn Fn(&AnalysisRequest) + Send + Sync>>,
}

impl MockService {
    pub fn yielding(findings_per_task: usize) -> Self {
        Self {
            findings_per_task,
            ..Default::default()
        }
    }

    pub fn fail_permanently(self, section: &str, chunk_index: u64) -> Self {
        self.fail_permanent
            .lock()
            .unwrap()
            .insert((section.to_string(), chunk_index));
        self
    }

    pub fn fail_transiently(self, section: &str, chunk_index: u64, times: u32) -> Self {
        self.fail_transient
            .lock()
            .unwrap()
            .insert((section.to_string(), chunk_index), times);
        self
    }

    pub fn calls_for(&self, section: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key == section)
            .count()
    }
}

impl AnalysisService for MockService {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawFinding>, AnalysisError> {
        let key = (request.section_key.clone(), request.chunk_index);
        self.calls.lock().unwrap().push(key.clone());
        if let Some(hook) = &self.on_call {
            hook(request);
        }

        {
            let mut transient = self.fail_transient.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AnalysisError::Transient("service returned 500".to_string()));
                }
            }
        }
        if self.fail_permanent.lock().unwrap().contains(&key) {
            return Err(AnalysisError::Permanent("service returned 500".to_string()));
        }

        Ok((0..self.findings_per_task)
            .map(|i| RawFinding {
                severity: Some("high".to_string()),
                title: Some(format!(
                    "issue {i} in {} chunk {}",
                    request.section_key, request.chunk_index
                )),
                description: Some("scripted finding".to_string()),
                recommendation: Some("review".to_string()),
                evidence: None,
            })
            .collect())
    }
}

pub struct TestRun {
    pub stats: PipelineStats,
    pub output_dir: PathBuf,
    pub run_output_dir: PathBuf,
    pub store: Arc<JsonStore>,
    _temp: tempfile::TempDir,
}

impl TestRun {
    pub fn status(&self) -> (RunStatus, RunProgress) {
        self.store
            .get_status("test_run")
            .expect("status query")
            .expect("run recorded")
    }

    pub fn findings_lines(&self) -> Vec<Value> {
        let path = self.run_output_dir.join("reports/findings.jsonl");
        let content = std::fs::read_to_string(path).unwrap_or_default();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("finding json"))
            .collect()
    }

    pub fn events_lines(&self) -> Vec<Value> {
        let path = self.output_dir.join("state/test_run.events.jsonl");
        let content = std::fs::read_to_string(path).unwrap_or_default();
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).expect("event json"))
            .collect()
    }
}

/// Drive the full pipeline over `doc` with a scripted service.
pub fn run_pipeline_on(
    doc: &str,
    service: Arc<dyn AnalysisService>,
    cancel_flag: Arc<AtomicBool>,
    concurrency: usize,
    tune: impl FnOnce(&mut Config),
) -> TestRun {
    let temp = tempfile::tempdir().expect("tempdir");
    let input_path = temp.path().join("input.json");
    std::fs::write(&input_path, doc).expect("write input");
    let output_dir = temp.path().join("output");
    std::fs::create_dir_all(&output_dir).expect("output dir");

    let loaded = config::load_config(None).expect("config");
    let mut cfg = loaded.config;
    cfg.run_id = "test_run".to_string();
    cfg.progress_interval_secs = 0;
    tune(&mut cfg);

    let run_output_dir = output_dir.join(&cfg.run_id);
    std::fs::create_dir_all(&run_output_dir).expect("run output dir");

    let blob = Arc::new(FsBlobStore::new(&input_path, &output_dir));
    let store = Arc::new(JsonStore::open(&output_dir).expect("store"));
    let sink = report::build_sink(
        ReportBackendKind::Jsonl,
        env!("CARGO_PKG_VERSION"),
        &loaded.config_hash,
        &input_path,
        "",
        &run_output_dir,
    )
    .expect("sink");

    let max_elements = cfg.max_elements_per_chunk;
    let stats = pipeline::run_pipeline(
        &cfg,
        blob,
        service,
        store.clone(),
        sink,
        cancel_flag,
        pipeline::PipelineOptions {
            concurrency,
            max_elements_per_chunk: max_elements,
            dry_run: false,
        },
    )
    .expect("pipeline");

    TestRun {
        stats,
        output_dir,
        run_output_dir,
        store,
        _temp: temp,
    }
}
