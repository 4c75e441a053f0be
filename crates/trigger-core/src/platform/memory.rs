use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DEFAULT_FLOW_COMPONENT, FlowPage, PageToken, PlatformClient};
use crate::error::{PlatformError, PlatformResult};
use crate::model::{
    FlowConfig, FlowConfigId, TableDetail, Trigger, TriggerDefinition, TriggerId, TriggerTable,
};

/// Platform operations, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    ListFlows,
    GetFlow,
    GetTrigger,
    DeleteTrigger,
    CreateTrigger,
    GetTable,
}

/// One recorded call against [`InMemoryPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    ListFlows { page: Option<String> },
    GetFlow { flow_id: String },
    GetTrigger { flow_id: String },
    DeleteTrigger { flow_id: String, trigger_id: String },
    CreateTrigger { flow_id: String },
    GetTable { table_id: String },
}

impl PlatformCall {
    pub fn operation(&self) -> Operation {
        match self {
            Self::ListFlows { .. } => Operation::ListFlows,
            Self::GetFlow { .. } => Operation::GetFlow,
            Self::GetTrigger { .. } => Operation::GetTrigger,
            Self::DeleteTrigger { .. } => Operation::DeleteTrigger,
            Self::CreateTrigger { .. } => Operation::CreateTrigger,
            Self::GetTable { .. } => Operation::GetTable,
        }
    }

    fn subject(&self) -> Option<&str> {
        match self {
            Self::ListFlows { .. } => None,
            Self::GetFlow { flow_id }
            | Self::GetTrigger { flow_id }
            | Self::DeleteTrigger { flow_id, .. }
            | Self::CreateTrigger { flow_id } => Some(flow_id),
            Self::GetTable { table_id } => Some(table_id),
        }
    }
}

struct Fault {
    operation: Operation,
    subject: Option<String>,
    error: PlatformError,
    remaining: usize,
}

struct MemoryState {
    flows: Vec<FlowConfig>,
    triggers: BTreeMap<FlowConfigId, Trigger>,
    tables: BTreeMap<String, TableDetail>,
    faults: Vec<Fault>,
    calls: Vec<PlatformCall>,
    next_trigger: u64,
}

/// In-process [`PlatformClient`] that records every call.
///
/// Flows are listed in insertion order, `page_size` at a time. Faults
/// registered with [`InMemoryPlatform::fail`] are raised before the call
/// touches any state.
pub struct InMemoryPlatform {
    page_size: usize,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            state: Mutex::new(MemoryState {
                flows: Vec::new(),
                triggers: BTreeMap::new(),
                tables: BTreeMap::new(),
                faults: Vec::new(),
                calls: Vec::new(),
                next_trigger: 1,
            }),
        }
    }

    pub fn insert_flow(&self, flow: FlowConfig) {
        let mut state = self.state.lock();
        state.flows.retain(|existing| existing.id != flow.id);
        state.flows.push(flow);
    }

    pub fn insert_trigger(&self, trigger: Trigger) {
        self.state
            .lock()
            .triggers
            .insert(trigger.configuration_id.clone(), trigger);
    }

    pub fn insert_table(&self, table: TableDetail) {
        self.state.lock().tables.insert(table.id.clone(), table);
    }

    pub fn trigger(&self, flow_id: &str) -> Option<Trigger> {
        let state = self.state.lock();
        state
            .triggers
            .iter()
            .find(|(id, _)| id.as_str() == flow_id)
            .map(|(_, trigger)| trigger.clone())
    }

    /// Makes the next `times` calls of `operation` fail with `error`. With a
    /// `subject` only calls about that flow (or table) id are affected.
    pub fn fail(
        &self,
        operation: Operation,
        subject: Option<&str>,
        error: PlatformError,
        times: usize,
    ) {
        self.state.lock().faults.push(Fault {
            operation,
            subject: subject.map(str::to_string),
            error,
            remaining: times,
        });
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    fn record(&self, call: PlatformCall) -> PlatformResult<()> {
        let mut state = self.state.lock();
        let operation = call.operation();
        let fault = state.faults.iter_mut().find(|fault| {
            fault.remaining > 0
                && fault.operation == operation
                && fault
                    .subject
                    .as_deref()
                    .is_none_or(|subject| Some(subject) == call.subject())
        });
        let result = match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        };
        state.calls.push(call);
        result
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn list_flows(&self, page: Option<&PageToken>) -> PlatformResult<FlowPage> {
        self.record(PlatformCall::ListFlows {
            page: page.map(|token| token.as_str().to_string()),
        })?;
        let offset = match page {
            Some(token) => token.as_str().parse::<usize>().map_err(|_| {
                PlatformError::Decode {
                    reason: format!("invalid page token `{}`", token.as_str()),
                }
            })?,
            None => 0,
        };
        let state = self.state.lock();
        let flows: Vec<_> = state
            .flows
            .iter()
            .skip(offset)
            .take(self.page_size)
            .map(FlowConfig::summary)
            .collect();
        let end = offset + flows.len();
        let next = (end < state.flows.len()).then(|| PageToken::new(end.to_string()));
        Ok(FlowPage { flows, next })
    }

    async fn get_flow(&self, flow_id: &FlowConfigId) -> PlatformResult<FlowConfig> {
        self.record(PlatformCall::GetFlow {
            flow_id: flow_id.to_string(),
        })?;
        let state = self.state.lock();
        state
            .flows
            .iter()
            .find(|flow| &flow.id == flow_id)
            .cloned()
            .ok_or_else(|| PlatformError::not_found(format!("flow `{flow_id}`")))
    }

    async fn get_trigger(&self, flow_id: &FlowConfigId) -> PlatformResult<Option<Trigger>> {
        self.record(PlatformCall::GetTrigger {
            flow_id: flow_id.to_string(),
        })?;
        Ok(self.state.lock().triggers.get(flow_id).cloned())
    }

    async fn delete_trigger(&self, trigger: &Trigger) -> PlatformResult<()> {
        self.record(PlatformCall::DeleteTrigger {
            flow_id: trigger.configuration_id.to_string(),
            trigger_id: trigger.id.to_string(),
        })?;
        let mut state = self.state.lock();
        match state.triggers.get(&trigger.configuration_id) {
            Some(existing) if existing.id == trigger.id => {
                state.triggers.remove(&trigger.configuration_id);
                Ok(())
            }
            _ => Err(PlatformError::not_found(format!("trigger `{}`", trigger.id))),
        }
    }

    async fn create_trigger(
        &self,
        flow_id: &FlowConfigId,
        definition: &TriggerDefinition,
    ) -> PlatformResult<Trigger> {
        self.record(PlatformCall::CreateTrigger {
            flow_id: flow_id.to_string(),
        })?;
        let mut state = self.state.lock();
        if let Some(existing) = state.triggers.get(flow_id) {
            return Err(PlatformError::Conflict {
                reason: format!("flow `{flow_id}` already has trigger {}", existing.id),
            });
        }
        let id = TriggerId::new(format!("trg-{}", state.next_trigger));
        state.next_trigger += 1;
        let trigger = Trigger {
            id,
            component: definition.component.clone(),
            configuration_id: flow_id.clone(),
            run_with_token_id: definition.params.run_with_token_id,
            cool_down_period_minutes: definition.params.cool_down_period_minutes,
            last_run: None,
            tables: definition
                .params
                .table_ids
                .iter()
                .map(|table_id| TriggerTable {
                    table_id: table_id.clone(),
                })
                .collect(),
            extras: definition.params.extras.clone(),
        };
        state.triggers.insert(flow_id.clone(), trigger.clone());
        Ok(trigger)
    }

    async fn get_table(&self, table_id: &str) -> PlatformResult<Option<TableDetail>> {
        self.record(PlatformCall::GetTable {
            table_id: table_id.to_string(),
        })?;
        Ok(self.state.lock().tables.get(table_id).cloned())
    }
}

/// Trigger shaped like the platform's, for seeding fakes.
pub fn sample_trigger(id: &str, flow_id: &FlowConfigId, table_ids: &[&str]) -> Trigger {
    Trigger {
        id: TriggerId::new(id),
        component: DEFAULT_FLOW_COMPONENT.to_string(),
        configuration_id: flow_id.clone(),
        run_with_token_id: Some(1),
        cool_down_period_minutes: Some(5),
        last_run: None,
        tables: table_ids
            .iter()
            .map(|table_id| TriggerTable {
                table_id: table_id.to_string(),
            })
            .collect(),
        extras: BTreeMap::new(),
    }
}
