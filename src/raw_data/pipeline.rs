use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use crate::raw_data::decoding::{CanonicalValue, EventRegistry, LogRecord, SerializationConfig};
use crate::raw_data::derived::{extract_addresses, filter_nonzero_balances, format_events};
use crate::raw_data::historical::eth_calls::{
    calls_label, collect_eth_calls, load_failed_calls, CallOutcome, EthCallCollectionReport,
};
use crate::raw_data::historical::logs::{collect_logs, load_failed_ranges, LogCollectionReport};
use crate::raw_data::historical::ranges::{partition, DEFAULT_DEPLOY_BLOCK};
use crate::rpc::Ledger;
use crate::storage::{JsonLinesSink, SnapshotSink};
use crate::types::config::contract::JobConfig;
use crate::types::task::{CallTask, FetchTask};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub serialization: SerializationConfig,
    pub concurrency: NonZeroUsize,
    pub window_size: u64,
    /// Resubmit only what the previous run recorded as failed.
    pub retry_failed: bool,
    /// Stop after the event stream.
    pub skip_calls: bool,
}

#[derive(Debug)]
pub struct JobReport {
    pub logs: LogCollectionReport,
    pub addresses: usize,
    pub calls: Option<EthCallCollectionReport>,
    pub balances: usize,
}

pub fn balances_label(label: &str) -> String {
    format!("{}_balances", label)
}

pub fn formatted_label(label: &str) -> String {
    format!("{}_events_formatted", label)
}

/// Run one job end to end: event stream, derived addresses, call snapshot
/// and the non-zero balance snapshot.
pub async fn run_job<L: Ledger>(
    ledger: Arc<L>,
    job: &JobConfig,
    events: Arc<EventRegistry>,
    options: &RunOptions,
) -> anyhow::Result<JobReport> {
    let label = job.label.as_str();
    let stream = JsonLinesSink::new(&options.output_dir);
    let snapshots = SnapshotSink::new(&options.output_dir);

    let fetch_tasks = if options.retry_failed {
        let tasks = load_failed_ranges(&snapshots, label)
            .with_context(|| format!("Failed to read failed ranges for {}", label))?;
        tracing::info!("Resubmitting {} failed windows for {}", tasks.len(), label);
        tasks
    } else {
        let end_block = match job.end_block {
            Some(end) => end,
            None => ledger
                .block_number()
                .await
                .with_context(|| format!("Failed to fetch chain height for {}", label))?,
        };
        let deploy_block = job.deploy_block.unwrap_or(DEFAULT_DEPLOY_BLOCK);
        tracing::info!(
            "Job {}: blocks {}-{}, window size {}",
            label,
            deploy_block,
            end_block,
            options.window_size
        );
        partition(deploy_block, end_block, options.window_size)
            .map(|range| FetchTask { range })
            .collect()
    };

    let logs = collect_logs(
        ledger.clone(),
        label,
        fetch_tasks,
        events,
        options.serialization,
        options.concurrency,
        &stream,
        &snapshots,
    )
    .await
    .with_context(|| format!("Log collection failed for {}", label))?;

    let mut report = JobReport {
        logs,
        addresses: 0,
        calls: None,
        balances: 0,
    };

    let wants_calls = job.extraction.is_some() && !options.skip_calls;
    if !wants_calls && !job.write_formatted {
        return Ok(report);
    }

    let records: Vec<LogRecord> = stream
        .read(label)
        .with_context(|| format!("Failed to read event stream for {}", label))?;

    if job.write_formatted {
        snapshots
            .write(&formatted_label(label), &format_events(&records))
            .with_context(|| format!("Failed to write formatted events for {}", label))?;
    }

    let Some(extraction) = job.extraction.as_ref() else {
        return Ok(report);
    };
    if options.skip_calls {
        tracing::info!("Skipping eth_calls for {}", label);
        return Ok(report);
    }
    let addresses = extract_addresses(
        &records,
        |name| extraction.matches_event(name),
        extraction.selector,
    );
    report.addresses = addresses.len();
    tracing::info!("Job {}: {} unique addresses", label, addresses.len());

    let (call_tasks, previous) = if options.retry_failed {
        let previous: Vec<CallOutcome> = snapshots
            .read(&calls_label(label))
            .with_context(|| format!("Failed to read call snapshot for {}", label))?
            .unwrap_or_default();
        let mut tasks = load_failed_calls(&snapshots, label)
            .with_context(|| format!("Failed to read failed calls for {}", label))?;

        // Windows recovered on this run may have surfaced new addresses.
        let known: HashSet<CallTask> = previous
            .iter()
            .map(CallOutcome::task)
            .chain(tasks.iter().cloned())
            .collect();
        tasks.extend(
            address_tasks(&extraction.call, addresses)
                .into_iter()
                .filter(|t| !known.contains(t)),
        );
        (tasks, previous)
    } else {
        (address_tasks(&extraction.call, addresses), Vec::new())
    };

    let calls = collect_eth_calls(
        ledger,
        label,
        call_tasks,
        previous,
        options.serialization,
        options.concurrency,
        &snapshots,
    )
    .await
    .with_context(|| format!("eth_call collection failed for {}", label))?;

    let balances = filter_nonzero_balances(&calls.outcomes, extraction.balance_selector);
    snapshots
        .write(&balances_label(label), &balances)
        .with_context(|| format!("Failed to write balances for {}", label))?;

    report.balances = balances.len();
    report.calls = Some(calls);
    Ok(report)
}

fn address_tasks(method: &str, addresses: impl IntoIterator<Item = String>) -> Vec<CallTask> {
    addresses
        .into_iter()
        .map(|address| CallTask::new(method, vec![CanonicalValue::text(address)]))
        .collect()
}
