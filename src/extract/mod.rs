//! Section extraction: a per-key streaming scanner and the coordinator that
//! drives it across the configured catalog.

pub mod scan;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::SectionSpec;
use crate::progress::ProgressTracker;
use crate::source::{BlobStore, SourceError};
use crate::store::StoreError;

pub use scan::SectionScanner;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),
    #[error("progress store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed section value: {0}")]
    Malformed(String),
    #[error("no valid sections found in the document")]
    NoValidSections,
    #[error("extraction cancelled")]
    Cancelled,
}

/// One catalog entry and the value found for it, if any.
#[derive(Debug, Clone)]
pub struct ExtractedSection {
    pub spec: SectionSpec,
    pub value: Option<Value>,
}

impl ExtractedSection {
    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }
}

/// Run the scanner once per catalog key, each pass over a fresh stream.
///
/// A missing key or a malformed section value leaves that section absent and
/// the pass continues; source and progress-store failures abort. At least
/// one section must be present at the end.
pub fn extract_all(
    blob: &dyn BlobStore,
    specs: &[SectionSpec],
    scanner: &SectionScanner,
    tracker: &ProgressTracker,
    cancel: &AtomicBool,
    interval: Duration,
) -> Result<Vec<ExtractedSection>, ExtractError> {
    let mut sections = Vec::with_capacity(specs.len());
    let mut last_report = Instant::now();
    let mut bytes_before_pass: u64 = 0;
    let total_per_pass = blob.open_stream()?.len_hint();
    let total_bytes = total_per_pass.map(|len| len * specs.len() as u64);

    for (idx, spec) in specs.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            return Err(ExtractError::Cancelled);
        }
        let mut stream = blob.open_stream()?;
        let label = format!(
            "Extracting {} ({} of {})",
            spec.display_name,
            idx + 1,
            specs.len()
        );
        let mut store_err: Option<StoreError> = None;
        let mut pass_bytes: u64 = 0;
        let outcome = {
            let mut on_bytes = |bytes: u64| -> bool {
                pass_bytes = bytes;
                if cancel.load(Ordering::Relaxed) {
                    return false;
                }
                if interval.is_zero() || last_report.elapsed() >= interval {
                    last_report = Instant::now();
                    if let Err(err) = tracker.report_bytes(
                        bytes_before_pass + bytes,
                        total_bytes,
                        label.clone(),
                    ) {
                        store_err = Some(err);
                        return false;
                    }
                }
                true
            };
            scanner.extract(stream.as_mut(), &spec.key, &mut on_bytes)
        };
        if let Some(err) = store_err {
            return Err(err.into());
        }
        bytes_before_pass += pass_bytes;

        match outcome {
            Ok(Some(value)) => {
                info!("section {} extracted", spec.key);
                sections.push(ExtractedSection {
                    spec: spec.clone(),
                    value: Some(value),
                });
            }
            Ok(None) => {
                info!("section {} absent from document", spec.key);
                sections.push(ExtractedSection {
                    spec: spec.clone(),
                    value: None,
                });
            }
            Err(ExtractError::Malformed(msg)) => {
                // One corrupt section does not abort the run.
                warn!("section {} malformed: {msg}", spec.key);
                tracker.record_error(Some(&spec.key), None, "malformed_input", &msg)?;
                sections.push(ExtractedSection {
                    spec: spec.clone(),
                    value: None,
                });
            }
            Err(err) => return Err(err),
        }
    }

    if sections.iter().all(|s| !s.is_present()) {
        return Err(ExtractError::NoValidSections);
    }

    Ok(sections)
}
