mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde_json::json;

use adlens::store::{RunStatus, SectionStatus};

use common::{MockService, inventory_doc, run_pipeline_on};

#[test]
fn missing_section_is_absent_and_run_completes() {
    // No GPOs key anywhere in the document.
    let doc = serde_json::to_string(&json!({
        "Users": [{"samAccountName": "alice"}],
        "DomainInfo": {"name": "corp.local"},
    }))
    .expect("doc");

    let service = Arc::new(MockService::yielding(1));
    let run = run_pipeline_on(
        &doc,
        service.clone(),
        Arc::new(AtomicBool::new(false)),
        2,
        |_| {},
    );

    assert_eq!(run.stats.final_status, RunStatus::Completed);
    assert_eq!(run.stats.sections_present, 2);
    assert_eq!(service.calls_for("GPOs"), 0);

    let (status, progress) = run.status();
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(progress.per_section["GPOs"], SectionStatus::Pending);
    assert_eq!(progress.per_section["Users"], SectionStatus::Completed);
}

#[test]
fn failing_chunk_contributes_zero_findings_and_run_completes() {
    let doc = inventory_doc(2500);
    // Chunk 1 of Users (the middle of three) fails permanently.
    let service = Arc::new(MockService::yielding(1).fail_permanently("Users", 1));
    let run = run_pipeline_on(
        &doc,
        service.clone(),
        Arc::new(AtomicBool::new(false)),
        2,
        |cfg| cfg.max_elements_per_chunk = 1000,
    );

    assert_eq!(run.stats.final_status, RunStatus::Completed);
    assert_eq!(run.stats.tasks_run, 5);
    assert_eq!(run.stats.tasks_failed, 1);
    assert_eq!(run.stats.findings_recorded, 4);

    let (status, progress) = run.status();
    assert_eq!(status, RunStatus::Completed);
    assert_eq!(progress.completed, 5);
    let last_error = progress.last_error.expect("last error populated");
    assert!(last_error.contains("task_invocation_error"));

    // Chunks 0 and 2 still produced findings.
    let findings = run.findings_lines();
    let user_titles: Vec<&str> = findings
        .iter()
        .filter(|f| f["section_key"] == "Users")
        .map(|f| f["title"].as_str().expect("title"))
        .collect();
    assert_eq!(user_titles.len(), 2);
    assert!(user_titles.iter().any(|t| t.contains("chunk 0")));
    assert!(user_titles.iter().any(|t| t.contains("chunk 2")));

    // The failure is in the audit log with its chunk context.
    let events = run.events_lines();
    assert!(events.iter().any(|e| {
        e["kind"] == "task_invocation_error"
            && e["section_key"] == "Users"
            && e["chunk_index"] == 1
    }));
}

#[test]
fn no_valid_sections_fails_the_run() {
    let doc = serde_json::to_string(&json!({
        "SomethingElse": [1, 2, 3],
        "Version": "1.0",
    }))
    .expect("doc");

    let run = run_pipeline_on(
        &doc,
        Arc::new(MockService::yielding(1)),
        Arc::new(AtomicBool::new(false)),
        2,
        |_| {},
    );

    assert_eq!(run.stats.final_status, RunStatus::Failed);
    let (status, progress) = run.status();
    assert_eq!(status, RunStatus::Failed);
    assert!(
        progress
            .last_error
            .expect("last error")
            .contains("no valid sections")
    );
}

#[test]
fn transient_failure_recovers_with_retry_enabled() {
    let doc = inventory_doc(10);
    let service = Arc::new(MockService::yielding(1).fail_transiently("Users", 0, 1));
    let run = run_pipeline_on(
        &doc,
        service.clone(),
        Arc::new(AtomicBool::new(false)),
        2,
        |cfg| {
            cfg.retry.max_retries = 2;
            cfg.retry.backoff_ms = 1;
        },
    );

    assert_eq!(run.stats.final_status, RunStatus::Completed);
    assert_eq!(run.stats.tasks_failed, 0);
    assert_eq!(run.stats.findings_recorded, 3);
    // First call failed, the retry succeeded.
    assert_eq!(service.calls_for("Users"), 2);
}

#[test]
fn transient_failure_without_retries_fails_the_task_only() {
    let doc = inventory_doc(10);
    let service = Arc::new(MockService::yielding(1).fail_transiently("Users", 0, 99));
    let run = run_pipeline_on(
        &doc,
        service.clone(),
        Arc::new(AtomicBool::new(false)),
        2,
        |_| {},
    );

    assert_eq!(run.stats.final_status, RunStatus::Completed);
    assert_eq!(run.stats.tasks_failed, 1);
    assert_eq!(service.calls_for("Users"), 1);
}
