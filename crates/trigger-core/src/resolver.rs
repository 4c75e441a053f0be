use std::sync::Arc;

use tracing::debug;

use crate::error::PlatformResult;
use crate::model::{FlowConfig, FlowConfigId, Trigger};
use crate::platform::PlatformClient;
use crate::policy::{RetryPolicy, retry_transient};

/// A requested flow together with its current trigger, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub flow: FlowConfig,
    pub trigger: Option<Trigger>,
}

/// Maps flow ids to their current trigger resource.
#[derive(Clone)]
pub struct TriggerResolver {
    client: Arc<dyn PlatformClient>,
    retry: RetryPolicy,
}

impl TriggerResolver {
    pub fn new(client: Arc<dyn PlatformClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolves a caller-supplied id. Malformed and unknown ids fail with
    /// `NotFound`; a known flow without a trigger resolves with `trigger: None`.
    pub async fn resolve(&self, raw_id: &str) -> PlatformResult<Resolution> {
        let flow_id = FlowConfigId::parse(raw_id)?;
        let flow = retry_transient(&self.retry, "get_flow", || self.client.get_flow(&flow_id)).await?;
        let trigger = self.trigger_for(&flow_id).await?;
        debug!(
            flow_id = %flow_id,
            flow_name = %flow.name,
            trigger_id = trigger.as_ref().map(|t| t.id.as_str()),
            "resolved flow trigger"
        );
        Ok(Resolution { flow, trigger })
    }

    pub async fn trigger_for(&self, flow_id: &FlowConfigId) -> PlatformResult<Option<Trigger>> {
        retry_transient(&self.retry, "get_trigger", || self.client.get_trigger(flow_id)).await
    }
}
