use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info, warn};

use crate::error::{FatalError, PlatformError, PlatformResult};
use crate::model::{FlowConfig, FlowConfigId, Trigger, TriggerDefinition, TriggerId};
use crate::policy::retry_transient;
use crate::resolver::{Resolution, TriggerResolver};

/// Why a flow could not be reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The flow id is malformed or unknown to the platform.
    NotFound,
    /// Transient transport failures outlasted the retry budget.
    Transport,
    /// The platform reported a state that contradicts the reset (e.g. a
    /// trigger still present when creating).
    Conflict,
    /// The platform refused the request.
    Rejected,
    /// Neither the flow nor an existing trigger defines the trigger to create.
    MissingDefinition,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Transport => "transport",
            Self::Conflict => "conflict",
            Self::Rejected => "rejected",
            Self::MissingDefinition => "missing_definition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_platform(stage: &str, err: &PlatformError) -> Self {
        let kind = match err {
            PlatformError::NotFound { .. } => FailureKind::NotFound,
            PlatformError::Transient { .. } => FailureKind::Transport,
            PlatformError::Conflict { .. } => FailureKind::Conflict,
            PlatformError::Unauthorized { .. }
            | PlatformError::Rejected { .. }
            | PlatformError::Decode { .. } => FailureKind::Rejected,
        };
        Self::new(kind, format!("{stage} failed: {err}"))
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

/// Result of resetting one flow's trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum ResetOutcome {
    /// An existing trigger was deleted and a new one created.
    Reset { previous: TriggerId, trigger: Trigger },
    /// The flow had no trigger; one was created.
    Created { trigger: Trigger },
    Failed(FailureReason),
}

impl ResetOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Reset { .. } => "reset",
            Self::Created { .. } => "created",
            Self::Failed(_) => "failed",
        }
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        match self {
            Self::Reset { trigger, .. } | Self::Created { trigger } => Some(trigger),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Outcome for one requested id.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowReset {
    pub requested_id: String,
    /// `None` when the id could not be resolved to a flow.
    pub flow: Option<FlowConfig>,
    pub outcome: ResetOutcome,
}

impl FlowReset {
    fn failed(requested_id: &str, flow: Option<FlowConfig>, reason: FailureReason) -> Self {
        Self {
            requested_id: requested_id.to_string(),
            flow,
            outcome: ResetOutcome::Failed(reason),
        }
    }
}

/// Drops and recreates the trigger of a single flow.
#[derive(Clone)]
pub struct TriggerReconciler {
    resolver: TriggerResolver,
    flow_component: String,
}

impl TriggerReconciler {
    pub fn new(resolver: TriggerResolver, flow_component: impl Into<String>) -> Self {
        Self {
            resolver,
            flow_component: flow_component.into(),
        }
    }

    /// Resets the trigger of `requested_id`.
    ///
    /// Per-flow problems come back as [`ResetOutcome::Failed`]; only errors
    /// that would fail every later flow as well (a rejected credential) are
    /// returned as `Err`. The delete is always issued before the create.
    pub async fn reset(&self, requested_id: &str) -> Result<FlowReset, FatalError> {
        let Resolution {
            flow,
            trigger: previous,
        } = match self.resolver.resolve(requested_id).await {
            Ok(resolution) => resolution,
            Err(err) => return fail(requested_id, None, "resolve", err),
        };

        let definition = match build_definition(&self.flow_component, &flow, previous.as_ref()) {
            Ok(definition) => definition,
            Err(reason) => {
                warn!(flow_id = %flow.id, %reason, "trigger reset skipped");
                return Ok(FlowReset::failed(requested_id, Some(flow), reason));
            }
        };

        if let Some(existing) = &previous {
            info!(
                flow_id = %flow.id,
                flow_name = %flow.name,
                trigger_id = %existing.id,
                "resetting trigger"
            );
            match self.delete(existing).await {
                Ok(()) => {}
                Err(err) if err.is_already_absent() => {
                    debug!(trigger_id = %existing.id, error = %err, "trigger already absent");
                }
                Err(err) => return fail(requested_id, Some(flow), "delete trigger", err),
            }
        } else {
            info!(flow_id = %flow.id, flow_name = %flow.name, "flow has no trigger; creating one");
        }

        let trigger = match self.create(&flow.id, &definition).await {
            Ok(trigger) => trigger,
            Err(err) => return fail(requested_id, Some(flow), "create trigger", err),
        };
        info!(flow_id = %flow.id, trigger_id = %trigger.id, "trigger created");

        let outcome = match previous {
            Some(previous) => ResetOutcome::Reset {
                previous: previous.id,
                trigger,
            },
            None => ResetOutcome::Created { trigger },
        };
        Ok(FlowReset {
            requested_id: requested_id.to_string(),
            flow: Some(flow),
            outcome,
        })
    }

    async fn delete(&self, trigger: &Trigger) -> PlatformResult<()> {
        let client = self.resolver.client();
        retry_transient(self.resolver.retry_policy(), "delete_trigger", || {
            client.delete_trigger(trigger)
        })
        .await
    }

    /// Creates the trigger. A create whose response was lost may still have
    /// landed, so every retry first checks whether the trigger now exists and
    /// adopts it instead of creating a second one.
    async fn create(
        &self,
        flow_id: &FlowConfigId,
        definition: &TriggerDefinition,
    ) -> PlatformResult<Trigger> {
        let client = self.resolver.client();
        let attempts = AtomicU32::new(0);
        retry_transient(self.resolver.retry_policy(), "create_trigger", || {
            let retrying = attempts.fetch_add(1, Ordering::SeqCst) > 0;
            async move {
                if retrying && let Some(landed) = client.get_trigger(flow_id).await? {
                    debug!(%flow_id, trigger_id = %landed.id, "adopting trigger from lost create");
                    return Ok(landed);
                }
                client.create_trigger(flow_id, definition).await
            }
        })
        .await
    }
}

/// Builds the trigger to create. The flow's stored definition wins; without
/// one, the existing trigger's parameters are carried over.
pub fn build_definition(
    flow_component: &str,
    flow: &FlowConfig,
    previous: Option<&Trigger>,
) -> Result<TriggerDefinition, FailureReason> {
    let stored = flow.stored_trigger().map_err(|err| {
        FailureReason::new(
            FailureKind::MissingDefinition,
            format!("stored trigger definition is invalid: {err}"),
        )
    })?;
    let params = match (stored, previous) {
        (Some(params), _) => params,
        (None, Some(trigger)) => trigger.params(),
        (None, None) => {
            return Err(FailureReason::new(
                FailureKind::MissingDefinition,
                "flow has no trigger and stores no trigger definition",
            ));
        }
    };
    if params.table_ids.is_empty() {
        return Err(FailureReason::new(
            FailureKind::MissingDefinition,
            "trigger definition selects no tables",
        ));
    }
    let component = previous
        .map(|trigger| trigger.component.clone())
        .unwrap_or_else(|| flow_component.to_string());
    Ok(TriggerDefinition {
        component,
        configuration_id: flow.id.clone(),
        params,
    })
}

fn fail(
    requested_id: &str,
    flow: Option<FlowConfig>,
    stage: &str,
    err: PlatformError,
) -> Result<FlowReset, FatalError> {
    if err.is_fatal() {
        return Err(FatalError::Unauthorized(err));
    }
    let reason = FailureReason::from_platform(stage, &err);
    warn!(flow_id = requested_id, %reason, "trigger reset failed");
    Ok(FlowReset::failed(requested_id, flow, reason))
}
