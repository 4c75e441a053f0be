use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::FatalError;
use crate::reconcile::{FlowReset, ResetOutcome, TriggerReconciler};

/// Counts per outcome of a reset batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub reset: usize,
    pub created: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} reset, {} created, {} failed, {} skipped",
            self.reset, self.created, self.failed, self.skipped
        )
    }
}

/// Per-id results of a reset batch, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub results: Vec<FlowReset>,
    /// Ids left unprocessed because cancellation was requested.
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &FlowReset> {
        self.results.iter().filter(|result| result.outcome.is_failed())
    }

    pub fn successes(&self) -> impl Iterator<Item = &FlowReset> {
        self.results.iter().filter(|result| !result.outcome.is_failed())
    }

    pub fn cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled() && self.failures().next().is_none()
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            skipped: self.skipped.len(),
            ..BatchSummary::default()
        };
        for result in &self.results {
            match result.outcome {
                ResetOutcome::Reset { .. } => summary.reset += 1,
                ResetOutcome::Created { .. } => summary.created += 1,
                ResetOutcome::Failed(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Resets a list of flows one at a time, in input order.
///
/// A failed flow never stops the batch. Cancellation is honoured only between
/// flows, so a flow whose trigger was deleted always gets its create call.
pub struct BatchOrchestrator {
    reconciler: TriggerReconciler,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(reconciler: TriggerReconciler, cancel: CancellationToken) -> Self {
        Self { reconciler, cancel }
    }

    pub async fn run<S: AsRef<str>>(&self, ids: &[S]) -> Result<BatchReport, FatalError> {
        let mut report = BatchReport::default();
        for (position, id) in ids.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(
                    remaining = ids.len() - position,
                    "cancellation requested; stopping before the next flow"
                );
                report.skipped = ids[position..]
                    .iter()
                    .map(|id| id.as_ref().to_string())
                    .collect();
                break;
            }
            let result = self.reconciler.reset(id.as_ref()).await?;
            report.results.push(result);
        }
        info!(summary = %report.summary(), "trigger reset batch finished");
        Ok(report)
    }
}
