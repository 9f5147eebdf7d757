//! Process-level helpers: output directory checks, resource limits, and
//! section catalog filtering.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Result, anyhow};
#[cfg(unix)]
use tracing::info;
use tracing::warn;

use crate::config::Config;
use crate::report::ReportBackendKind;
use crate::store::StoreBackendKind;

/// Convert CLI store backend to internal enum
pub fn store_backend_from_cli(backend: crate::cli::StoreBackend) -> StoreBackendKind {
    match backend {
        crate::cli::StoreBackend::Sqlite => StoreBackendKind::Sqlite,
        crate::cli::StoreBackend::Json => StoreBackendKind::Json,
    }
}

/// Convert CLI report backend to internal enum
pub fn report_backend_from_cli(backend: crate::cli::ReportBackend) -> ReportBackendKind {
    match backend {
        crate::cli::ReportBackend::Jsonl => ReportBackendKind::Jsonl,
        crate::cli::ReportBackend::Csv => ReportBackendKind::Csv,
    }
}

/// Ensure the output directory exists and is writable, warning on unsafe
/// permissions.
pub fn ensure_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_dir() {
            return Err(anyhow!(
                "output path is not a directory: {}",
                path.display()
            ));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }
    let metadata = std::fs::metadata(path)?;

    let probe_path = path.join(".adlens_write_probe");
    match OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe_path)
    {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe_path);
        }
        Err(err) => {
            return Err(anyhow!(
                "output directory is not writable: {} ({})",
                path.display(),
                err
            ));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            warn!("output directory is world-writable: {}", path.display());
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}

/// Apply optional resource limits for this process.
pub fn apply_resource_limits(
    max_memory_mib: Option<u64>,
    max_open_files: Option<u64>,
) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(mem_mib) = max_memory_mib {
            let bytes = mem_mib.saturating_mul(1024 * 1024);
            set_limit(libc::RLIMIT_AS, bytes, "address space")?;
        }
        if let Some(open_files) = max_open_files {
            set_limit(libc::RLIMIT_NOFILE, open_files, "open file descriptors")?;
        }
    }
    #[cfg(not(unix))]
    {
        if max_memory_mib.is_some() || max_open_files.is_some() {
            warn!("resource limits are only supported on Unix platforms");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn set_limit(resource: libc::__rlimit_resource_t, requested: u64, label: &str) -> Result<()> {
    unsafe {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if libc::getrlimit(resource, &mut limit) != 0 {
            return Err(anyhow!(
                "getrlimit failed for {}: {}",
                label,
                std::io::Error::last_os_error()
            ));
        }

        let requested = requested as libc::rlim_t;
        let mut new_cur = requested;
        if requested > limit.rlim_max {
            warn!(
                "requested {} limit {} exceeds hard limit {}; using {}",
                label, requested, limit.rlim_max, limit.rlim_max
            );
            new_cur = limit.rlim_max;
        }

        let new_limit = libc::rlimit {
            rlim_cur: new_cur,
            rlim_max: limit.rlim_max,
        };

        if libc::setrlimit(resource, &new_limit) != 0 {
            return Err(anyhow!(
                "setrlimit failed for {}: {}",
                label,
                std::io::Error::last_os_error()
            ));
        }
        info!("set {} limit to {}", label, new_cur);
    }
    Ok(())
}

/// Restrict the section catalog to an allow list, returning names that
/// matched nothing.
pub fn filter_sections(cfg: &mut Config, allow_list: Option<&[String]>) -> Vec<String> {
    use std::collections::HashSet;

    let mut unknown = Vec::new();
    if let Some(list) = allow_list {
        let mut allow = HashSet::new();
        for entry in list {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                continue;
            }
            allow.insert(trimmed.to_ascii_lowercase());
        }

        let known: HashSet<String> = cfg
            .sections
            .iter()
            .map(|s| s.key.to_ascii_lowercase())
            .collect();
        for entry in &allow {
            if !known.contains(entry) {
                unknown.push(entry.clone());
            }
        }

        cfg.sections
            .retain(|section| allow.contains(&section.key.to_ascii_lowercase()));
    }

    unknown.sort();
    unknown
}
