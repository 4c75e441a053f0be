use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{FatalError, PlatformError, PlatformResult};
use crate::model::{
    ActivationState, FlowConfigId, FlowSummary, TableDetail, Trigger, TriggerId, TriggerStatus,
    parse_timestamp,
};
use crate::platform::{PageToken, PlatformClient};
use crate::policy::{RetryPolicy, retry_transient};

/// Freshness of one table selected by a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFreshness {
    pub table_id: String,
    /// `None` when the table no longer exists.
    pub detail: Option<TableDetail>,
    /// Whether the trigger ran at or after the table's last import. `None`
    /// when the table is missing or has never been imported.
    pub is_expected: Option<bool>,
}

impl TableFreshness {
    pub fn assess(trigger: &Trigger, table_id: &str, detail: Option<TableDetail>) -> Self {
        let is_expected = detail.as_ref().and_then(|table| {
            let imported = table.last_import_at()?;
            Some(match trigger.last_run_at() {
                Some(last_run) => last_run >= imported,
                None => false,
            })
        });
        Self {
            table_id: table_id.to_string(),
            detail,
            is_expected,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.detail.is_none()
    }

    pub fn last_import_date(&self) -> Option<&str> {
        self.detail
            .as_ref()
            .and_then(|table| table.last_import_date.as_deref())
    }
}

/// One row of the `flows_with_trigger` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRow {
    pub flow_id: FlowConfigId,
    pub flow_name: String,
    pub activation: ActivationState,
    pub has_trigger: bool,
    pub trigger_status: TriggerStatus,
    pub trigger_id: Option<TriggerId>,
    pub trigger_last_run: Option<String>,
    pub tables: Vec<TableFreshness>,
    /// Set when the flow's trigger was reset in this run.
    pub reset_outcome: Option<String>,
}

impl AuditRow {
    pub fn without_trigger(flow: &FlowSummary) -> Self {
        Self {
            flow_id: flow.id.clone(),
            flow_name: flow.name.clone(),
            activation: flow.activation(),
            has_trigger: false,
            trigger_status: TriggerStatus::None,
            trigger_id: None,
            trigger_last_run: None,
            tables: Vec::new(),
            reset_outcome: None,
        }
    }

    /// Row for a flow whose trigger could not be inspected.
    pub fn unknown(flow: &FlowSummary) -> Self {
        Self {
            trigger_status: TriggerStatus::Unknown,
            ..Self::without_trigger(flow)
        }
    }

    pub fn with_trigger(flow: &FlowSummary, trigger: &Trigger, tables: Vec<TableFreshness>) -> Self {
        Self {
            has_trigger: true,
            trigger_status: status_of(&tables),
            trigger_id: Some(trigger.id.clone()),
            trigger_last_run: trigger.last_run.clone(),
            tables,
            ..Self::without_trigger(flow)
        }
    }

    pub fn table_ids(&self) -> Vec<&str> {
        self.tables
            .iter()
            .map(|table| table.table_id.as_str())
            .collect()
    }

    /// Most recent last-import date among the selected tables, as reported.
    pub fn latest_import(&self) -> Option<&str> {
        self.tables
            .iter()
            .filter_map(|table| {
                let raw = table.last_import_date()?;
                Some((parse_timestamp(raw)?, raw))
            })
            .max_by_key(|(imported, _)| *imported)
            .map(|(_, raw)| raw)
    }

    /// `Some(false)` if any selected table was imported after the last run,
    /// `Some(true)` if every table is known to be covered, `None` otherwise.
    pub fn tables_expected(&self) -> Option<bool> {
        if self.tables.iter().any(|table| table.is_expected == Some(false)) {
            return Some(false);
        }
        let all_covered = !self.tables.is_empty()
            && self.tables.iter().all(|table| table.is_expected == Some(true));
        all_covered.then_some(true)
    }
}

fn status_of(tables: &[TableFreshness]) -> TriggerStatus {
    if tables.iter().any(TableFreshness::is_missing) {
        TriggerStatus::Error
    } else if tables.iter().any(|table| table.is_expected == Some(false)) {
        TriggerStatus::Pending
    } else {
        TriggerStatus::Ok
    }
}

/// A flow whose trigger could not be inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFailure {
    pub flow_id: String,
    pub reason: String,
}

/// Rows of an audit pass plus the flows that could not be inspected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditListing {
    pub rows: Vec<AuditRow>,
    pub failures: Vec<ListingFailure>,
}

impl AuditListing {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Read-only enumeration of flows and their trigger state.
#[derive(Clone)]
pub struct AuditLister {
    client: Arc<dyn PlatformClient>,
    retry: RetryPolicy,
}

impl AuditLister {
    pub fn new(client: Arc<dyn PlatformClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Drains every page of the flow listing.
    ///
    /// Flows are unique by id in the result. A page that brings no new flow
    /// ends the listing: the endpoint ignored the paging parameters and sent
    /// everything again.
    pub async fn list_all_flows(&self) -> PlatformResult<Vec<FlowSummary>> {
        let mut flows = Vec::new();
        let mut seen_ids = HashSet::new();
        let mut seen_tokens = HashSet::new();
        let mut page: Option<PageToken> = None;
        loop {
            let current = page.as_ref();
            let batch = retry_transient(&self.retry, "list_flows", || {
                self.client.list_flows(current)
            })
            .await?;
            let fetched = batch.flows.len();
            let before = flows.len();
            flows.extend(
                batch
                    .flows
                    .into_iter()
                    .filter(|flow| seen_ids.insert(flow.id.clone())),
            );
            let added = flows.len() - before;
            debug!(
                page = current.map(PageToken::as_str),
                fetched, added, "fetched flow page"
            );
            let Some(next) = batch.next else { break };
            if added == 0 {
                debug!(
                    page = current.map(PageToken::as_str),
                    "flow page repeated earlier flows; listing complete"
                );
                break;
            }
            if !seen_tokens.insert(next.clone()) {
                return Err(PlatformError::Decode {
                    reason: format!("flow listing repeated page token `{}`", next.as_str()),
                });
            }
            page = Some(next);
        }
        Ok(flows)
    }

    /// Audits every flow in the project.
    pub async fn list(&self) -> Result<AuditListing, FatalError> {
        let flows = self.list_all_flows().await.map_err(FatalError::enumeration)?;
        info!(flows = flows.len(), "auditing flow triggers");
        let mut listing = AuditListing::default();
        for flow in &flows {
            self.push_row(&mut listing, flow).await?;
        }
        Ok(listing)
    }

    /// Audits the requested flows only; unknown ids are reported as failures.
    pub async fn list_requested<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> Result<AuditListing, FatalError> {
        let mut listing = AuditListing::default();
        for raw in ids {
            let raw = raw.as_ref();
            let flow = match self.get_flow(raw).await {
                Ok(flow) => flow,
                Err(err) if err.is_fatal() => return Err(FatalError::Unauthorized(err)),
                Err(err) => {
                    warn!(flow_id = raw, error = %err, "flow lookup failed");
                    listing.failures.push(ListingFailure {
                        flow_id: raw.to_string(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };
            self.push_row(&mut listing, &flow).await?;
        }
        Ok(listing)
    }

    /// Builds the row for one flow, reading its trigger and selected tables.
    pub async fn audit_flow(&self, flow: &FlowSummary) -> PlatformResult<AuditRow> {
        let trigger = retry_transient(&self.retry, "get_trigger", || {
            self.client.get_trigger(&flow.id)
        })
        .await?;
        let Some(trigger) = trigger else {
            return Ok(AuditRow::without_trigger(flow));
        };
        let mut tables = Vec::with_capacity(trigger.tables.len());
        for table in &trigger.tables {
            let detail = retry_transient(&self.retry, "get_table", || {
                self.client.get_table(&table.table_id)
            })
            .await?;
            if detail.is_none() {
                warn!(flow_id = %flow.id, table_id = %table.table_id, "trigger selects a missing table");
            }
            tables.push(TableFreshness::assess(&trigger, &table.table_id, detail));
        }
        Ok(AuditRow::with_trigger(flow, &trigger, tables))
    }

    async fn get_flow(&self, raw: &str) -> PlatformResult<FlowSummary> {
        let flow_id = FlowConfigId::parse(raw)?;
        let flow = retry_transient(&self.retry, "get_flow", || self.client.get_flow(&flow_id))
            .await?;
        Ok(flow.summary())
    }

    async fn push_row(
        &self,
        listing: &mut AuditListing,
        flow: &FlowSummary,
    ) -> Result<(), FatalError> {
        match self.audit_flow(flow).await {
            Ok(row) => listing.rows.push(row),
            Err(err) if err.is_fatal() => return Err(FatalError::Unauthorized(err)),
            Err(err) => {
                warn!(flow_id = %flow.id, error = %err, "trigger lookup failed");
                listing.failures.push(ListingFailure {
                    flow_id: flow.id.to_string(),
                    reason: err.to_string(),
                });
                listing.rows.push(AuditRow::unknown(flow));
            }
        }
        Ok(())
    }
}
