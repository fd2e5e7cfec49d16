use std::collections::HashSet;
use std::path::Path;

use alloy::primitives::Address;
use anyhow::Context;
use serde::Deserialize;

use crate::raw_data::decoding::FieldSelector;
use crate::rpc::LogFilter;
use crate::types::config::eth_call::EthCallConfig;

/// Configuration for an event to decode
/// Signature format: "Deposit(address indexed user, uint256 amount, address recipient)"
#[derive(Debug, Clone, Deserialize)]
pub struct EventConfig {
    /// Full ABI signature string
    pub signature: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogFilterConfig {
    #[default]
    All,
    Named {
        events: Vec<String>,
    },
}

impl From<&LogFilterConfig> for LogFilter {
    fn from(config: &LogFilterConfig) -> Self {
        match config {
            LogFilterConfig::All => LogFilter::All,
            LogFilterConfig::Named { events } => LogFilter::Named(events.clone()),
        }
    }
}

/// How wallet addresses are derived from the event stream and which call is
/// issued for each of them.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Event names whose records contribute addresses. Empty means every
    /// recognized event.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "FieldSelector::wallet")]
    pub selector: FieldSelector,
    /// Method name of one of the job's calls, invoked with each address.
    pub call: String,
    #[serde(default = "FieldSelector::staked_amount")]
    pub balance_selector: FieldSelector,
}

impl ExtractionConfig {
    pub fn matches_event(&self, name: &str) -> bool {
        self.events.is_empty() || self.events.iter().any(|e| e == name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Names every output file of the job.
    pub label: String,
    pub address: Address,
    pub deploy_block: Option<u64>,
    pub end_block: Option<u64>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
    #[serde(default)]
    pub filter: LogFilterConfig,
    #[serde(default)]
    pub calls: Vec<EthCallConfig>,
    #[serde(default)]
    pub extraction: Option<ExtractionConfig>,
    /// Also write `{label}_events_formatted.json`, a block-ordered projection
    /// of the full stream.
    #[serde(default)]
    pub write_formatted: bool,
}

impl JobConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.label.is_empty()
                && self
                    .label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "Invalid job label '{}'",
            self.label
        );

        if let (Some(deploy), Some(end)) = (self.deploy_block, self.end_block) {
            if deploy > end {
                tracing::warn!(
                    "Job {}: deploy_block {} is after end_block {}, no windows will run",
                    self.label,
                    deploy,
                    end
                );
            }
        }

        if let Some(extraction) = &self.extraction {
            anyhow::ensure!(
                self.calls.iter().any(|c| c.method_name() == extraction.call),
                "Job {}: extraction call '{}' is not among its calls",
                self.label,
                extraction.call
            );
        }
        Ok(())
    }
}

pub type Jobs = Vec<JobConfig>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum JobsOrPath {
    Inline(Jobs),
    Path(String),
}

pub fn load_jobs_from_path(base_dir: &Path, path: &str) -> anyhow::Result<Jobs> {
    let full_path = base_dir.join(path);

    if full_path.is_dir() {
        load_jobs_from_dir(&full_path)
    } else {
        load_jobs_from_file(&full_path)
    }
}

fn load_jobs_from_file(path: &Path) -> anyhow::Result<Jobs> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to load jobs file at {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse jobs file at {}", path.display()))
}

fn load_jobs_from_dir(path: &Path) -> anyhow::Result<Jobs> {
    let mut entries: Vec<_> = std::fs::read_dir(path)
        .with_context(|| format!("Failed to read jobs directory at {}", path.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "json")
                .unwrap_or(false)
        })
        .collect();

    entries.sort_by_key(|e| e.path());

    let mut merged = Jobs::new();
    for entry in entries {
        merged.extend(load_jobs_from_file(&entry.path())?);
    }
    Ok(merged)
}

/// Labels name output files, so they must be unique across all jobs.
pub fn ensure_unique_labels(jobs: &[JobConfig]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for job in jobs {
        anyhow::ensure!(
            seen.insert(job.label.as_str()),
            "Duplicate job label '{}'",
            job.label
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    const JOB: &str = r#"{
        "label": "stake",
        "address": "0x5954aB967Bc958940b7EB73ee84797Dc8a2AFbb9",
        "deploy_block": 14400533,
        "events": [
            {"signature": "Deposit(address indexed user, uint256 amount, address recipient)"}
        ],
        "filter": {"type": "named", "events": ["Deposit"]},
        "calls": [
            {
                "function": "getAllStakes(address)",
                "output_type": "(uint256,uint256,uint256,uint256,uint256,(uint256,uint256))[]"
            }
        ],
        "extraction": {"events": ["Deposit"], "call": "getAllStakes"}
    }"#;

    #[test]
    fn test_parse_job_with_defaults() {
        let job: JobConfig = serde_json::from_str(JOB).unwrap();
        job.validate().unwrap();

        assert_eq!(job.deploy_block, Some(14_400_533));
        assert_eq!(job.end_block, None);
        assert!(matches!(&job.filter, LogFilterConfig::Named { events } if events == &["Deposit"]));

        let extraction = job.extraction.unwrap();
        assert_eq!(extraction.selector, FieldSelector::wallet());
        assert_eq!(extraction.balance_selector, FieldSelector::staked_amount());
        assert!(extraction.matches_event("Deposit"));
        assert!(!extraction.matches_event("Withdraw"));
    }

    #[test]
    fn test_minimal_job() {
        let job: JobConfig = serde_json::from_str(
            r#"{"label": "bare", "address": "0x0000000000000000000000000000000000000001"}"#,
        )
        .unwrap();
        job.validate().unwrap();
        assert!(matches!(job.filter, LogFilterConfig::All));
        assert!(job.extraction.is_none());
    }

    #[test]
    fn test_validation_errors() {
        let mut job: JobConfig = serde_json::from_str(JOB).unwrap();
        job.calls.clear();
        assert!(job.validate().is_err());

        let mut job: JobConfig = serde_json::from_str(JOB).unwrap();
        job.label = "../escape".into();
        assert!(job.validate().is_err());

        let job: JobConfig = serde_json::from_str(JOB).unwrap();
        assert!(ensure_unique_labels(&[job.clone(), job]).is_err());
    }

    #[test]
    fn test_load_jobs_from_dir_merges_sorted() {
        let dir = TempDir::new().unwrap();
        let job_b = JOB.replace("\"stake\"", "\"b\"");
        std::fs::write(dir.path().join("2.json"), format!("[{}]", job_b)).unwrap();
        std::fs::write(dir.path().join("1.json"), format!("[{}]", JOB)).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let jobs = load_jobs_from_path(dir.path(), ".").unwrap();
        let labels: Vec<_> = jobs.iter().map(|j| j.label.as_str()).collect();
        assert_eq!(labels, vec!["stake", "b"]);
    }
}
