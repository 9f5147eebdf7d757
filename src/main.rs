use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use adlens::{analysis, cli, config, constants, logging, pipeline, report, source, store, util};

fn main() -> Result<()> {
    logging::init_logging();

    let cli_opts = cli::parse();

    if let Some(run_id) = cli_opts.query_status.as_deref() {
        return query_status(&cli_opts, run_id);
    }

    let input = cli_opts
        .input
        .clone()
        .context("an input path is required")?;
    let loaded = config::load_config(cli_opts.config_path.as_deref())?;
    let mut cfg = loaded.config;
    if let Some(run_id) = &cli_opts.run_id {
        cfg.run_id = run_id.clone();
    }
    if let Some(max) = cli_opts.max_elements_per_chunk {
        cfg.max_elements_per_chunk = max;
    }

    let unknown_sections = util::filter_sections(&mut cfg, cli_opts.sections.as_deref());
    for unknown in unknown_sections {
        warn!("unknown section in --sections: {unknown}");
    }
    if cli_opts.sections.is_some() && cfg.sections.is_empty() {
        bail!("no sections enabled after applying --sections filter");
    }

    util::apply_resource_limits(cli_opts.max_memory_mib, cli_opts.max_open_files)?;
    util::ensure_output_dir(&cli_opts.output)?;
    let run_output_dir = cli_opts.output.join(&cfg.run_id);
    std::fs::create_dir_all(&run_output_dir)?;

    let tool_version = env!("CARGO_PKG_VERSION");

    info!(
        "starting run_id={} input={} output={} concurrency={} max_elements_per_chunk={}",
        cfg.run_id,
        input.display(),
        run_output_dir.display(),
        cli_opts.concurrency,
        cfg.max_elements_per_chunk
    );

    let blob: Arc<dyn source::BlobStore> =
        Arc::new(source::FsBlobStore::new(&input, &cli_opts.output));

    let source_sha256 = if cli_opts.compute_source_sha256 {
        info!("computing source sha256 (full pass)");
        let hash = source::compute_sha256(blob.as_ref(), constants::HASH_READ_SIZE)?;
        info!("source sha256={hash}");
        hash
    } else {
        String::new()
    };

    let progress_store: Arc<dyn store::ProgressStore> = if cli_opts.dry_run {
        Arc::new(store::NullStore)
    } else {
        Arc::from(store::build_store(
            util::store_backend_from_cli(cli_opts.store_backend),
            &cli_opts.output,
        )?)
    };

    let sink: Box<dyn report::FindingsSink> = if cli_opts.dry_run {
        Box::new(report::NullSink)
    } else {
        report::build_sink(
            util::report_backend_from_cli(cli_opts.report_backend),
            tool_version,
            &loaded.config_hash,
            &input,
            &source_sha256,
            &run_output_dir,
        )?
    };

    let service: Arc<dyn analysis::AnalysisService> = match cli_opts.analysis_url.as_deref() {
        Some(url) => Arc::new(analysis::HttpAnalysisService::new(
            url,
            Duration::from_secs(cli_opts.analysis_timeout_secs),
        )?),
        None => {
            info!("no analysis endpoint configured; tasks will produce no findings");
            Arc::new(analysis::NullAnalysisService)
        }
    };

    let cancel_flag = Arc::new(AtomicBool::new(false));
    {
        let cancel_flag = cancel_flag.clone();
        ctrlc::set_handler(move || {
            warn!("shutdown requested; finishing in-flight tasks");
            cancel_flag.store(true, Ordering::Relaxed);
        })?;
    }

    let stats = pipeline::run_pipeline(
        &cfg,
        blob,
        service,
        progress_store,
        sink,
        cancel_flag,
        pipeline::PipelineOptions {
            concurrency: cli_opts.concurrency,
            max_elements_per_chunk: cfg.max_elements_per_chunk,
            dry_run: cli_opts.dry_run,
        },
    )?;

    info!("adlens run finished with status {}", stats.final_status);
    Ok(())
}

fn query_status(cli_opts: &cli::CliOptions, run_id: &str) -> Result<()> {
    let progress_store = store::build_store(
        util::store_backend_from_cli(cli_opts.store_backend),
        &cli_opts.output,
    )?;
    match progress_store.get_status(run_id)? {
        Some((status, progress)) => {
            let document = serde_json::json!({
                "run_id": run_id,
                "status": status,
                "progress": progress,
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        None => bail!("run {run_id} not found"),
    }
    Ok(())
}
