use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum StoreBackend {
    Sqlite,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ReportBackend {
    Jsonl,
    Csv,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Inventory export to analyze (JSON)
    #[arg(short, long, required_unless_present = "query_status")]
    pub input: Option<PathBuf>,

    /// Output directory for chunks, progress state and findings
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Override the generated run identifier
    #[arg(long)]
    pub run_id: Option<String>,

    /// Concurrent analysis calls per batch
    #[arg(long, default_value_t = num_cpus::get())]
    pub concurrency: usize,

    /// Override the per-chunk element limit from config
    #[arg(long)]
    pub max_elements_per_chunk: Option<usize>,

    /// Progress/state store backend
    #[arg(long, value_enum, default_value_t = StoreBackend::Sqlite)]
    pub store_backend: StoreBackend,

    /// Findings report backend
    #[arg(long, value_enum, default_value_t = ReportBackend::Jsonl)]
    pub report_backend: ReportBackend,

    /// Limit extraction to these section keys (comma-separated list)
    #[arg(long, value_delimiter = ',')]
    pub sections: Option<Vec<String>>,

    /// Analysis service endpoint; omitted means findings-free dry analysis
    #[arg(long)]
    pub analysis_url: Option<String>,

    /// Analysis service request timeout, in seconds
    #[arg(long, default_value_t = 120)]
    pub analysis_timeout_secs: u64,

    /// Skip chunk uploads and persistence; extraction and task construction
    /// still run
    #[arg(long)]
    pub dry_run: bool,

    /// Compute source SHA-256 before extraction (extra full pass)
    #[arg(long)]
    pub compute_source_sha256: bool,

    /// Print the persisted status of a run and exit
    #[arg(long, value_name = "RUN_ID")]
    pub query_status: Option<String>,

    /// Cap process address space, in MiB (Unix only)
    #[arg(long)]
    pub max_memory_mib: Option<u64>,

    /// Cap open file descriptors (Unix only)
    #[arg(long)]
    pub max_open_files: Option<u64>,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}

#[cfg(test)]
mod tests {
    use super::CliOptions;
    use clap::Parser;

    #[test]
    fn parses_minimal_invocation() {
        let opts = CliOptions::try_parse_from(["adlens", "--input", "export.json"]).expect("parse");
        assert!(opts.input.is_some());
        assert!(!opts.dry_run);
    }

    #[test]
    fn parses_sections_list() {
        let opts = CliOptions::try_parse_from([
            "adlens",
            "--input",
            "export.json",
            "--sections",
            "Users,GPOs,DomainInfo",
        ])
        .expect("parse");
        let sections = opts.sections.expect("sections");
        assert_eq!(sections, vec!["Users", "GPOs", "DomainInfo"]);
    }

    #[test]
    fn input_is_required_without_status_query() {
        assert!(CliOptions::try_parse_from(["adlens"]).is_err());
        let opts = CliOptions::try_parse_from(["adlens", "--query-status", "run_1"]).expect("parse");
        assert_eq!(opts.query_status.as_deref(), Some("run_1"));
    }

    #[test]
    fn parses_dry_run_flag() {
        let opts = CliOptions::try_parse_from(["adlens", "--input", "export.json", "--dry-run"])
            .expect("parse");
        assert!(opts.dry_run);
    }
}
