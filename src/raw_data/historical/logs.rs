use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::raw_data::decoding::{
    normalize_log, EventRegistry, LogRecord, NormalizeError, SerializationConfig,
};
use crate::raw_data::historical::ranges::BlockRange;
use crate::rpc::{spawn_settled, Ledger, RpcError, Settlement};
use crate::storage::{JsonLinesSink, SinkError, SnapshotSink};
use crate::types::task::FetchTask;

#[derive(Debug, Error)]
pub enum LogCollectionError {
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Executor failed: {0}")]
    Executor(String),
}

/// Why a single window settled as failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("malformed log: {0}")]
    Malformed(#[from] NormalizeError),
}

/// A window that did not make it into the stream, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRange {
    pub range: BlockRange,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct LogCollectionReport {
    pub windows: usize,
    pub succeeded: usize,
    pub records_written: usize,
    pub failed: Vec<FailedRange>,
    /// Earlier failures outside this run's windows, still awaiting a retry.
    pub carried_over: Vec<FailedRange>,
}

impl LogCollectionReport {
    /// Every window the failure ledger holds after this run.
    pub fn outstanding(&self) -> usize {
        self.failed.len() + self.carried_over.len()
    }
}

pub fn failed_ranges_label(label: &str) -> String {
    format!("{}_failed_ranges", label)
}

/// Fetch every window, appending each successful window's records to the
/// label's stream as soon as it settles.
///
/// Failed windows are logged, collected in the report and written to
/// `{label}_failed_ranges.json` so they can be resubmitted. Entries already in
/// that ledger are kept for the blocks this run did not cover. A sink failure
/// is fatal.
#[allow(clippy::too_many_arguments)]
pub async fn collect_logs<L: Ledger>(
    ledger: Arc<L>,
    label: &str,
    tasks: Vec<FetchTask>,
    events: Arc<EventRegistry>,
    serialization: SerializationConfig,
    concurrency: NonZeroUsize,
    stream: &JsonLinesSink,
    snapshots: &SnapshotSink,
) -> Result<LogCollectionReport, LogCollectionError> {
    let previous: Vec<FailedRange> = snapshots
        .read(&failed_ranges_label(label))?
        .unwrap_or_default();
    let mut submitted: Vec<BlockRange> = tasks.iter().map(|t| t.range).collect();
    submitted.sort_by_key(|r| r.start);

    let mut report = LogCollectionReport {
        windows: tasks.len(),
        carried_over: carry_over(previous, &submitted),
        ..Default::default()
    };

    tracing::info!(
        "Collecting logs for {}: {} windows, concurrency {}",
        label,
        report.windows,
        concurrency
    );

    let (result_tx, mut result_rx) = mpsc::channel(concurrency.get());
    let handle = spawn_settled(
        tasks,
        concurrency,
        move |task: FetchTask| {
            let ledger = ledger.clone();
            let events = events.clone();
            async move { fetch_window(ledger.as_ref(), &events, &serialization, task.range).await }
        },
        result_tx,
    );

    while let Some(result) = result_rx.recv().await {
        let range = result.task.range;
        match result.outcome {
            Settlement::Succeeded(records) => {
                let written = match stream.append(label, &records) {
                    Ok(n) => n,
                    Err(e) => {
                        handle.abort();
                        return Err(e.into());
                    }
                };
                report.succeeded += 1;
                report.records_written += written;
                tracing::info!(
                    "Logs {} {}: {} records ({}/{} windows done)",
                    label,
                    range,
                    written,
                    report.succeeded + report.failed.len(),
                    report.windows
                );
            }
            outcome => {
                let error = outcome.error_message().unwrap_or_default();
                tracing::warn!("Logs {} {} failed: {}", label, range, error);
                report.failed.push(FailedRange { range, error });
            }
        }
    }

    handle
        .await
        .map_err(|e| LogCollectionError::Executor(e.to_string()))?;

    report.failed.sort_by_key(|f| f.range.start);
    let mut outstanding: Vec<&FailedRange> =
        report.failed.iter().chain(&report.carried_over).collect();
    outstanding.sort_by_key(|f| f.range.start);
    snapshots.write(&failed_ranges_label(label), &outstanding)?;

    tracing::info!(
        "Logs {} complete: {}/{} windows, {} records, {} failed, {} carried over",
        label,
        report.succeeded,
        report.windows,
        report.records_written,
        report.failed.len(),
        report.carried_over.len()
    );

    Ok(report)
}

/// Keep the parts of earlier failures that no window of this run covers.
fn carry_over(previous: Vec<FailedRange>, submitted: &[BlockRange]) -> Vec<FailedRange> {
    previous
        .into_iter()
        .flat_map(|failed| {
            failed
                .range
                .subtract(submitted)
                .into_iter()
                .map(move |range| FailedRange {
                    range,
                    error: failed.error.clone(),
                })
        })
        .collect()
}

async fn fetch_window<L: Ledger>(
    ledger: &L,
    events: &EventRegistry,
    serialization: &SerializationConfig,
    range: BlockRange,
) -> Result<Vec<LogRecord>, FetchError> {
    let logs = ledger.get_logs(range).await?;
    let records = logs
        .iter()
        .map(|log| normalize_log(log, events, serialization))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Windows recorded as failed by a previous run, ready for resubmission.
pub fn load_failed_ranges(
    snapshots: &SnapshotSink,
    label: &str,
) -> Result<Vec<FetchTask>, SinkError> {
    let failed: Vec<FailedRange> = snapshots
        .read(&failed_ranges_label(label))?
        .unwrap_or_default();
    Ok(failed
        .into_iter()
        .map(|f| FetchTask { range: f.range })
        .collect())
}
