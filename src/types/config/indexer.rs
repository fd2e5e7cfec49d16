use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::raw_data::decoding::SerializationConfig;
use crate::types::config::contract::{
    ensure_unique_labels, load_jobs_from_path, JobConfig, JobsOrPath,
};
use crate::types::config::rpc::RpcConfig;

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Deserialize)]
pub struct IndexerConfigRaw {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub serialization: SerializationConfig,
    pub jobs: JobsOrPath,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub output_dir: PathBuf,
    pub rpc: RpcConfig,
    pub serialization: SerializationConfig,
    pub jobs: Vec<JobConfig>,
}

impl IndexerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let raw_config: IndexerConfigRaw = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

        let jobs = match raw_config.jobs {
            JobsOrPath::Inline(jobs) => jobs,
            JobsOrPath::Path(p) => load_jobs_from_path(base_dir, &p)
                .with_context(|| format!("Failed to load jobs from path {}", p))?,
        };

        for job in &jobs {
            job.validate()?;
        }
        ensure_unique_labels(&jobs)?;

        Ok(IndexerConfig {
            output_dir: raw_config.output_dir,
            rpc: raw_config.rpc,
            serialization: raw_config.serialization,
            jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::raw_data::decoding::values::QuantityEncoding;

    #[test]
    fn test_load_with_jobs_path() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("jobs")).unwrap();
        std::fs::write(
            dir.path().join("jobs/stake.json"),
            r#"[{"label": "stake", "address": "0x5954ab967bc958940b7eb73ee84797dc8a2afbb9"}]"#,
        )
        .unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{
                "rpc": {"url_env_var": "RPC_URL_MAINNET"},
                "serialization": {"quantities": "hex"},
                "jobs": "jobs"
            }"#,
        )
        .unwrap();

        let config = IndexerConfig::load(&config_path).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.serialization.quantities, QuantityEncoding::Hex);
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].label, "stake");
    }

    #[test]
    fn test_missing_or_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(IndexerConfig::load(&dir.path().join("nope.json")).is_err());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{").unwrap();
        assert!(IndexerConfig::load(&path).is_err());
    }
}
