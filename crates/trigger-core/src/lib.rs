//! Core of the flow trigger reset tool.
//!
//! This crate talks to the orchestration platform through the
//! [`PlatformClient`] capability trait, resolves flow ids to their triggers,
//! drops and recreates triggers one flow at a time and builds the audit
//! listing that ends up in the `flows_with_trigger` table.

#![forbid(unsafe_code)]

pub mod audit;
pub mod batch;
pub mod error;
pub mod model;
pub mod platform;
pub mod policy;
pub mod reconcile;
pub mod resolver;

pub use audit::{AuditListing, AuditLister, AuditRow, ListingFailure, TableFreshness};
pub use batch::{BatchOrchestrator, BatchReport, BatchSummary};
pub use error::{FatalError, PlatformError, PlatformResult};
pub use model::{
    ActivationState, FlowConfig, FlowConfigId, FlowSummary, TableDetail, Trigger,
    TriggerDefinition, TriggerId, TriggerParams, TriggerStatus,
};
pub use platform::{
    Credential, FlowPage, HttpPlatformClient, InMemoryPlatform, PageToken, PlatformClient,
    PlatformSettings,
};
pub use policy::RetryPolicy;
pub use reconcile::{FailureKind, FailureReason, FlowReset, ResetOutcome, TriggerReconciler};
pub use resolver::{Resolution, TriggerResolver};
