use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::bail;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trigger_core::{
    AuditLister, AuditListing, AuditRow, BatchOrchestrator, BatchReport, FatalError, FlowReset,
    PlatformClient, RetryPolicy, TriggerReconciler, TriggerResolver,
};

use crate::config::RunConfig;
use crate::output::OutputTable;

/// Which modes a `run` invocation executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub flow_ids: Vec<String>,
    pub list_flows: bool,
}

impl RunPlan {
    pub fn new(flow_ids: Vec<String>, list_flows: bool) -> anyhow::Result<Self> {
        if flow_ids.is_empty() && !list_flows {
            bail!("nothing to do: set flow_trigger_ids or enable output_list_flows");
        }
        Ok(Self {
            flow_ids,
            list_flows,
        })
    }

    pub fn from_config(config: &RunConfig) -> anyhow::Result<Self> {
        Self::new(
            config.flow_ids().to_vec(),
            config.parameters.output_list_flows,
        )
    }

    pub fn resets(&self) -> bool {
        !self.flow_ids.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ResetMode,
    ListMode,
    Aggregating,
    Emitting,
    Done,
}

/// A flow the run could not handle, with the reason shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFailure {
    pub flow_id: String,
    pub reason: String,
}

impl fmt::Display for FlowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.flow_id, self.reason)
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub reset: Option<BatchReport>,
    pub rows: Vec<AuditRow>,
    pub failures: Vec<FlowFailure>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0:#}")]
    Config(anyhow::Error),
    #[error(transparent)]
    Aborted(#[from] FatalError),
    #[error("{} flow(s) failed", .failures.len())]
    FlowsFailed {
        failures: Vec<FlowFailure>,
        cancelled: bool,
    },
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl RunError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Aborted(_) | Self::FlowsFailed { .. } => 1,
            Self::Internal(_) => 2,
        }
    }

    pub fn failures(&self) -> &[FlowFailure] {
        match self {
            Self::FlowsFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Drives one invocation: reset mode, listing mode, then the output table.
pub struct Runner {
    client: Arc<dyn PlatformClient>,
    retry: RetryPolicy,
    flow_component: String,
    cancel: CancellationToken,
    phase: Phase,
}

impl Runner {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        retry: RetryPolicy,
        flow_component: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            retry,
            flow_component: flow_component.into(),
            cancel,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn lister(&self) -> AuditLister {
        AuditLister::new(self.client.clone(), self.retry.clone())
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }

    /// Executes `plan` and writes the output table.
    ///
    /// Run-wide errors abort before anything is written. Per-flow failures
    /// still produce the table and are then returned as
    /// [`RunError::FlowsFailed`].
    pub async fn execute(
        &mut self,
        plan: &RunPlan,
        output: &OutputTable,
    ) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();

        if plan.resets() {
            self.enter(Phase::ResetMode);
            let resolver = TriggerResolver::new(self.client.clone(), self.retry.clone());
            let reconciler = TriggerReconciler::new(resolver, self.flow_component.clone());
            let batch = BatchOrchestrator::new(reconciler, self.cancel.clone());
            let report = batch.run(plan.flow_ids.as_slice()).await?;
            info!(summary = %report.summary(), "reset mode finished");
            summary.cancelled = report.cancelled();
            summary.reset = Some(report);
        }

        let listing = if plan.list_flows && !self.cancel.is_cancelled() {
            self.enter(Phase::ListMode);
            Some(self.lister().list().await?)
        } else {
            if plan.list_flows {
                warn!("run cancelled; skipping flow listing");
                summary.cancelled = true;
            }
            None
        };

        self.enter(Phase::Aggregating);
        summary.rows = self
            .aggregate(summary.reset.as_ref(), listing.as_ref())
            .await?;
        summary.failures = collect_failures(summary.reset.as_ref(), listing.as_ref());

        self.enter(Phase::Emitting);
        output.write(&summary.rows).map_err(RunError::Internal)?;

        self.enter(Phase::Done);
        if summary.is_success() {
            Ok(summary)
        } else {
            Err(RunError::FlowsFailed {
                failures: summary.failures,
                cancelled: summary.cancelled,
            })
        }
    }

    /// Builds the output rows. Listing rows come first in listing order;
    /// flows reset successfully but absent from the listing follow in
    /// request order. Every row of a reset flow carries its last outcome.
    async fn aggregate(
        &self,
        report: Option<&BatchReport>,
        listing: Option<&AuditListing>,
    ) -> Result<Vec<AuditRow>, RunError> {
        let mut rows: Vec<AuditRow> = listing.map(|listing| listing.rows.clone()).unwrap_or_default();
        let Some(report) = report else {
            return Ok(rows);
        };

        let outcomes = last_outcomes(report);
        let mut present: HashSet<String> = rows
            .iter()
            .map(|row| row.flow_id.to_string())
            .collect();
        for result in report.successes() {
            let Some(flow) = &result.flow else { continue };
            if !present.insert(flow.id.to_string()) {
                continue;
            }
            rows.push(self.post_reset_row(result).await?);
        }
        for row in &mut rows {
            if let Some(outcome) = outcomes.get(row.flow_id.as_str()) {
                row.reset_outcome = Some((*outcome).to_string());
            }
        }
        Ok(rows)
    }

    async fn post_reset_row(&self, result: &FlowReset) -> Result<AuditRow, RunError> {
        let Some(flow) = &result.flow else {
            return Err(RunError::Internal(anyhow::anyhow!(
                "reset of `{}` succeeded without a resolved flow",
                result.requested_id
            )));
        };
        let summary = flow.summary();
        match self.lister().audit_flow(&summary).await {
            Ok(row) => Ok(row),
            Err(err) if err.is_fatal() => Err(FatalError::Unauthorized(err).into()),
            Err(err) => {
                warn!(flow_id = %flow.id, error = %err, "post-reset audit failed");
                let mut row = AuditRow::unknown(&summary);
                if let Some(trigger) = result.outcome.trigger() {
                    row.has_trigger = true;
                    row.trigger_id = Some(trigger.id.clone());
                }
                Ok(row)
            }
        }
    }
}

/// Outcome label of the last reset attempt per flow id.
fn last_outcomes(report: &BatchReport) -> BTreeMap<String, &'static str> {
    report
        .results
        .iter()
        .filter_map(|result| {
            let flow = result.flow.as_ref()?;
            Some((flow.id.to_string(), result.outcome.label()))
        })
        .collect()
}

fn collect_failures(report: Option<&BatchReport>, listing: Option<&AuditListing>) -> Vec<FlowFailure> {
    let mut failures = Vec::new();
    if let Some(report) = report {
        for result in report.failures() {
            let reason = result
                .outcome
                .failure()
                .map(ToString::to_string)
                .unwrap_or_else(|| "reset failed".to_string());
            failures.push(FlowFailure {
                flow_id: result.requested_id.clone(),
                reason,
            });
        }
        for skipped in &report.skipped {
            failures.push(FlowFailure {
                flow_id: skipped.clone(),
                reason: "not processed: run cancelled".to_string(),
            });
        }
    }
    if let Some(listing) = listing {
        for failure in &listing.failures {
            failures.push(FlowFailure {
                flow_id: failure.flow_id.clone(),
                reason: format!("listing: {}", failure.reason),
            });
        }
    }
    failures
}
