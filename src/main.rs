mod raw_data;
mod rpc;
mod storage;
mod types;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use raw_data::decoding::EventRegistry;
use raw_data::pipeline::{run_job, RunOptions};
use rpc::{ContractLedger, LogFilter, RpcClient};
use types::config::contract::JobConfig;
use types::config::indexer::IndexerConfig;

const DEFAULT_CONFIG_PATH: &str = "config/config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let retry_failed = args.iter().any(|a| a == "--retry-failed");
    let skip_calls = args.iter().any(|a| a == "--skip-calls");
    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) => PathBuf::from(
            args.get(i + 1)
                .context("--config requires a path argument")?,
        ),
        None => PathBuf::from(DEFAULT_CONFIG_PATH),
    };

    let config = IndexerConfig::load(&config_path)?;
    load_required_env_vars(&config)?;

    if retry_failed {
        tracing::info!("Retry mode: resubmitting only previously failed windows and calls");
    }
    tracing::info!(
        "Loaded config from {} with {} job(s)",
        config_path.display(),
        config.jobs.len()
    );

    let client = Arc::new(RpcClient::new(config.rpc.client_config()?)?);
    let options = RunOptions {
        output_dir: config.output_dir.clone(),
        serialization: config.serialization,
        concurrency: config.rpc.concurrency(),
        window_size: config.rpc.window_size(),
        retry_failed,
        skip_calls,
    };
    tracing::info!(
        "RPC concurrency {}, window size {}, output dir {}",
        options.concurrency,
        options.window_size,
        options.output_dir.display()
    );

    let mut incomplete = Vec::new();
    for job in &config.jobs {
        if !process_job(job, client.clone(), &options).await? {
            incomplete.push(job.label.as_str());
        }
    }

    if incomplete.is_empty() {
        tracing::info!("All jobs processed successfully");
    } else {
        tracing::warn!(
            "Jobs with failed windows or calls: {:?}. Rerun with --retry-failed to resubmit them",
            incomplete
        );
    }
    Ok(())
}

/// Ensures the RPC URL env var is set, loading .env if needed.
fn load_required_env_vars(config: &IndexerConfig) -> anyhow::Result<()> {
    let var = config.rpc.url_env_var.as_str();
    if env::var(var).is_ok() {
        return Ok(());
    }

    dotenvy::dotenv()
        .with_context(|| format!("Missing env var {} and failed to load .env file", var))?;

    anyhow::ensure!(
        env::var(var).is_ok(),
        "Missing required env var after loading .env: {}",
        var
    );
    Ok(())
}

/// Runs one job. Returns whether every window and call succeeded.
async fn process_job(
    job: &JobConfig,
    client: Arc<RpcClient>,
    options: &RunOptions,
) -> anyhow::Result<bool> {
    tracing::info!("Processing job: {} ({})", job.label, job.address);

    let events = Arc::new(
        EventRegistry::from_configs(&job.events)
            .with_context(|| format!("Invalid event signatures for job {}", job.label))?,
    );
    if events.is_empty() {
        tracing::warn!(
            "Job {} declares no event signatures, records will be kept undecoded",
            job.label
        );
    } else {
        tracing::info!("Job {}: {} event signatures", job.label, events.len());
    }
    let ledger = ContractLedger::new(
        client,
        job.address,
        &events,
        &LogFilter::from(&job.filter),
        &job.calls,
    )
    .with_context(|| format!("Invalid contract description for job {}", job.label))?;

    let report = run_job(Arc::new(ledger), job, events, options).await?;

    let failed_calls = report.calls.as_ref().map_or(0, |c| c.failed.len());
    tracing::info!(
        "Job {} done: {}/{} windows, {} records, {} addresses, {} calls ({} failed), {} non-zero balances",
        job.label,
        report.logs.succeeded,
        report.logs.windows,
        report.logs.records_written,
        report.addresses,
        report.calls.as_ref().map_or(0, |c| c.outcomes.len()),
        failed_calls,
        report.balances
    );
    for failed in &report.logs.failed {
        tracing::warn!("Job {}: window {} failed: {}", job.label, failed.range, failed.error);
    }
    for failed in &report.logs.carried_over {
        tracing::warn!(
            "Job {}: window {} from an earlier run is still missing: {}",
            job.label,
            failed.range,
            failed.error
        );
    }

    Ok(report.logs.outstanding() == 0 && failed_calls == 0)
}
