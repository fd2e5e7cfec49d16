use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raw_data::decoding::{normalize_value, CanonicalValue, SerializationConfig};
use crate::rpc::{execute_settled, Ledger, Settlement};
use crate::storage::{SinkError, SnapshotSink};
use crate::types::task::CallTask;

#[derive(Debug, Error)]
pub enum EthCallCollectionError {
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Succeeded,
    Failed,
}

/// One settled call as it appears in the `{label}_calls.json` snapshot.
/// Failed calls are kept with `result = null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub method: String,
    pub args: Vec<CanonicalValue>,
    pub result: Option<CanonicalValue>,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Succeeded
    }

    pub fn task(&self) -> CallTask {
        CallTask::new(self.method.clone(), self.args.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCall {
    pub task: CallTask,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct EthCallCollectionReport {
    /// Every outcome now in the snapshot, in submission order.
    pub outcomes: Vec<CallOutcome>,
    pub succeeded: usize,
    pub failed: Vec<FailedCall>,
}

pub fn calls_label(label: &str) -> String {
    format!("{}_calls", label)
}

pub fn failed_calls_label(label: &str) -> String {
    format!("{}_failed_calls", label)
}

/// Run every call task, then write the outcomes as one snapshot.
///
/// With `previous` outcomes (a resubmission of failed calls), outcomes for
/// the same method and arguments are replaced in place and new ones are
/// appended, so the snapshot always holds the union.
#[allow(clippy::too_many_arguments)]
pub async fn collect_eth_calls<L: Ledger>(
    ledger: Arc<L>,
    label: &str,
    tasks: Vec<CallTask>,
    previous: Vec<CallOutcome>,
    serialization: SerializationConfig,
    concurrency: NonZeroUsize,
    snapshots: &SnapshotSink,
) -> Result<EthCallCollectionReport, EthCallCollectionError> {
    let total = tasks.len();
    tracing::info!(
        "Collecting {} eth_calls for {}, concurrency {}",
        total,
        label,
        concurrency
    );

    let mut results = execute_settled(tasks, concurrency, move |task: CallTask| {
        let ledger = ledger.clone();
        async move { ledger.call(&task).await }
    })
    .await;
    results.sort_by_key(|r| r.index);

    let mut report = EthCallCollectionReport::default();
    let mut fresh = Vec::with_capacity(results.len());

    for result in results {
        let task = result.task;
        let outcome = match result.outcome {
            Settlement::Succeeded(value) => {
                report.succeeded += 1;
                CallOutcome {
                    method: task.method,
                    args: task.args,
                    result: Some(normalize_value(&value, &serialization)),
                    status: CallStatus::Succeeded,
                    error: None,
                }
            }
            outcome => {
                let error = outcome.error_message().unwrap_or_default();
                tracing::warn!("eth_call {} failed: {}", task, error);
                report.failed.push(FailedCall {
                    task: task.clone(),
                    error: error.clone(),
                });
                CallOutcome {
                    method: task.method,
                    args: task.args,
                    result: None,
                    status: CallStatus::Failed,
                    error: Some(error),
                }
            }
        };
        fresh.push(outcome);
    }

    report.outcomes = merge_outcomes(previous, fresh);

    snapshots.write(&calls_label(label), &report.outcomes)?;
    snapshots.write(&failed_calls_label(label), &report.failed)?;

    tracing::info!(
        "eth_calls {} complete: {}/{} succeeded, {} failed",
        label,
        report.succeeded,
        total,
        report.failed.len()
    );

    Ok(report)
}

fn merge_outcomes(previous: Vec<CallOutcome>, fresh: Vec<CallOutcome>) -> Vec<CallOutcome> {
    if previous.is_empty() {
        return fresh;
    }

    let mut merged = previous;
    let positions: HashMap<CallTask, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, o)| (o.task(), i))
        .collect();

    for outcome in fresh {
        match positions.get(&outcome.task()) {
            Some(&i) => merged[i] = outcome,
            None => merged.push(outcome),
        }
    }
    merged
}

/// Calls recorded as failed by a previous run, ready for resubmission.
pub fn load_failed_calls(
    snapshots: &SnapshotSink,
    label: &str,
) -> Result<Vec<CallTask>, SinkError> {
    let failed: Vec<FailedCall> = snapshots
        .read(&failed_calls_label(label))?
        .unwrap_or_default();
    Ok(failed.into_iter().map(|f| f.task).collect())
}
