//! Capability surface over the orchestration platform's Storage API.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::PlatformResult;
use crate::model::{FlowConfig, FlowConfigId, FlowSummary, TableDetail, Trigger, TriggerDefinition};

mod http;
mod memory;

pub use http::{HttpPlatformClient, TOKEN_HEADER};
pub use memory::{InMemoryPlatform, Operation, PlatformCall, sample_trigger};

/// Component id under which flows are stored when not configured otherwise.
pub const DEFAULT_FLOW_COMPONENT: &str = "keboola.orchestrator";

/// Opaque continuation token of a paginated flow listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageToken(String);

impl PageToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One page of the flow listing; `next` is `None` on the last page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPage {
    pub flows: Vec<FlowSummary>,
    pub next: Option<PageToken>,
}

/// Storage API token. Kept out of `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Connection settings injected into [`HttpPlatformClient`].
#[derive(Debug, Clone)]
pub struct PlatformSettings {
    pub base_url: Url,
    pub credential: Credential,
    pub flow_component: String,
    pub page_size: u32,
    pub request_timeout: Duration,
}

impl PlatformSettings {
    pub fn new(base_url: Url, credential: Credential) -> Self {
        Self {
            base_url,
            credential,
            flow_component: DEFAULT_FLOW_COMPONENT.to_string(),
            page_size: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Calls the reset and audit logic needs from the platform.
///
/// Implementations report failures as [`crate::PlatformError`] and never
/// retry on their own; callers wrap each call with
/// [`crate::policy::retry_transient`].
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Returns one page of flows; `None` requests the first page.
    async fn list_flows(&self, page: Option<&PageToken>) -> PlatformResult<FlowPage>;

    async fn get_flow(&self, flow_id: &FlowConfigId) -> PlatformResult<FlowConfig>;

    /// `Ok(None)` when the flow exists but has no trigger.
    async fn get_trigger(&self, flow_id: &FlowConfigId) -> PlatformResult<Option<Trigger>>;

    async fn delete_trigger(&self, trigger: &Trigger) -> PlatformResult<()>;

    async fn create_trigger(
        &self,
        flow_id: &FlowConfigId,
        definition: &TriggerDefinition,
    ) -> PlatformResult<Trigger>;

    /// `Ok(None)` when the table does not exist.
    async fn get_table(&self, table_id: &str) -> PlatformResult<Option<TableDetail>>;
}
