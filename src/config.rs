use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};

fn default_sample_size() -> usize {
    50
}

/// How one section is summarized for the analysis service. Empty
/// summary_fields keeps elements whole.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PayloadRule {
    #[serde(default)]
    pub summary_fields: Vec<String>,
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
}

/// One entry in the fixed catalog of extractable top-level sections.
#[derive(Debug, Deserialize, Clone)]
pub struct SectionSpec {
    pub key: String,
    pub display_name: String,
    pub chunkable: bool,
    #[serde(default)]
    pub payload: PayloadRule,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_id: String,
    pub max_elements_per_chunk: usize,
    pub max_prompt_chars: usize,
    pub progress_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    pub sections: Vec<SectionSpec>,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig {
        config,
        config_hash,
    })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{:08x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_loads() {
        let loaded = load_config(None).expect("config");
        let cfg = loaded.config;
        assert!(!cfg.run_id.is_empty());
        assert_eq!(cfg.max_elements_per_chunk, 10000);
        assert_eq!(cfg.max_prompt_chars, 8000);
        assert_eq!(cfg.retry.max_retries, 0);
        let keys: Vec<&str> = cfg.sections.iter().map(|s| s.key.as_str()).collect();
        assert!(keys.contains(&"Users"));
        assert!(keys.contains(&"DomainInfo"));
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn users_section_is_chunkable_with_fields() {
        let loaded = load_config(None).expect("config");
        let users = loaded
            .config
            .sections
            .iter()
            .find(|s| s.key == "Users")
            .expect("Users section");
        assert!(users.chunkable);
        assert!(
            users
                .payload
                .summary_fields
                .iter()
                .any(|f| f == "samAccountName")
        );
    }

    #[test]
    fn domain_info_is_not_chunkable() {
        let loaded = load_config(None).expect("config");
        let info = loaded
            .config
            .sections
            .iter()
            .find(|s| s.key == "DomainInfo")
            .expect("DomainInfo section");
        assert!(!info.chunkable);
    }

    #[test]
    fn config_hash_is_stable() {
        let a = load_config(None).expect("config");
        let b = load_config(None).expect("config");
        assert_eq!(a.config_hash, b.config_hash);
        assert_eq!(a.config_hash.len(), 64);
    }
}
