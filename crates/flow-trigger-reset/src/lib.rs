//! Resets flow triggers on the orchestration platform and audits which flows
//! have one. The binary wires configuration, logging and the Storage API
//! client around the entry points below.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use trigger_core::{HttpPlatformClient, PlatformClient};

pub mod config;
pub mod output;
pub mod report;
pub mod run;
pub mod telemetry;

pub use config::{Environment, Overrides, Parameters, RunConfig};
pub use output::OutputTable;
pub use report::SelectElement;
pub use run::{FlowFailure, Phase, RunError, RunPlan, RunSummary, Runner};

/// Storage API client for `config`.
pub fn connect(config: &RunConfig) -> Result<Arc<dyn PlatformClient>, RunError> {
    let client = HttpPlatformClient::new(config.platform.clone())
        .map_err(|err| RunError::Internal(anyhow!(err).context("failed to build HTTP client")))?;
    Ok(Arc::new(client))
}

fn runner(
    client: Arc<dyn PlatformClient>,
    config: &RunConfig,
    cancel: CancellationToken,
) -> Runner {
    Runner::new(
        client,
        config.retry.clone(),
        config.parameters.flow_component_id.clone(),
        cancel,
    )
}

/// Resets the configured flows and/or lists all flows, then writes the
/// output table.
pub async fn run(
    client: Arc<dyn PlatformClient>,
    config: &RunConfig,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let plan = RunPlan::from_config(config).map_err(RunError::Config)?;
    let output = OutputTable::new(&config.data_dir);
    runner(client, config, cancel).execute(&plan, &output).await
}

/// Flows that have a trigger, as select elements. Flows whose trigger could
/// not be inspected are left out and reported as failures.
pub async fn list_flows(
    client: Arc<dyn PlatformClient>,
    config: &RunConfig,
) -> Result<Vec<SelectElement>, RunError> {
    let listing = runner(client, config, CancellationToken::new())
        .lister()
        .list()
        .await?;
    let elements = report::select_elements(&listing);
    if listing.is_complete() {
        return Ok(elements);
    }
    for failure in &listing.failures {
        warn!(flow_id = %failure.flow_id, reason = %failure.reason, "flow left out of the listing");
    }
    Err(RunError::FlowsFailed {
        failures: listing
            .failures
            .into_iter()
            .map(|failure| FlowFailure {
                flow_id: failure.flow_id,
                reason: failure.reason,
            })
            .collect(),
        cancelled: false,
    })
}

/// Markdown detail of the configured flows' triggers and selected tables.
/// Returns the table together with the flows that could not be read.
pub async fn flow_detail(
    client: Arc<dyn PlatformClient>,
    config: &RunConfig,
) -> Result<(String, Vec<FlowFailure>), RunError> {
    if config.flow_ids().is_empty() {
        return Err(RunError::Config(anyhow!(
            "flow-detail needs flow_trigger_ids or --flow-id"
        )));
    }
    let listing = runner(client, config, CancellationToken::new())
        .lister()
        .list_requested(config.flow_ids())
        .await?;
    let markdown = report::flow_detail_markdown(&listing.rows);
    let failures = listing
        .failures
        .into_iter()
        .map(|failure| FlowFailure {
            flow_id: failure.flow_id,
            reason: failure.reason,
        })
        .collect();
    Ok((markdown, failures))
}
