use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PlatformError;

const MAX_ID_LEN: usize = 255;

/// Identifier of a flow configuration, unique within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FlowConfigId(String);

impl FlowConfigId {
    /// Validates a caller-supplied id. Malformed ids can never name a flow, so
    /// they are reported as not found without asking the platform.
    pub fn parse(raw: &str) -> Result<Self, PlatformError> {
        let trimmed = raw.trim();
        let well_formed = !trimmed.is_empty()
            && trimmed.len() <= MAX_ID_LEN
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
        if !well_formed {
            return Err(PlatformError::not_found(format!(
                "flow `{raw}` (malformed id)"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for FlowConfigId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        id_string(deserializer).map(Self)
    }
}

/// Identifier the platform assigns to a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TriggerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        id_string(deserializer).map(Self)
    }
}

/// Flow as returned by the configuration listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub id: FlowConfigId,
    pub name: String,
    #[serde(default, rename = "isDisabled")]
    pub is_disabled: bool,
}

impl FlowSummary {
    pub fn activation(&self) -> ActivationState {
        ActivationState::from_disabled(self.is_disabled)
    }
}

/// Full flow configuration, including the stored payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub id: FlowConfigId,
    pub name: String,
    #[serde(default, rename = "isDisabled")]
    pub is_disabled: bool,
    #[serde(default)]
    pub configuration: Value,
}

impl FlowConfig {
    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            is_disabled: self.is_disabled,
        }
    }

    /// Trigger parameters the flow stores under `configuration.trigger`.
    pub fn stored_trigger(&self) -> Result<Option<TriggerParams>, serde_json::Error> {
        match self.configuration.get("trigger") {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => TriggerParams::deserialize(raw).map(Some),
        }
    }
}

/// Whether a trigger can fire; follows the owning flow's `isDisabled` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Enabled,
    Disabled,
}

impl ActivationState {
    pub fn from_disabled(disabled: bool) -> Self {
        if disabled {
            Self::Disabled
        } else {
            Self::Enabled
        }
    }

    pub fn is_disabled(self) -> bool {
        self == Self::Disabled
    }
}

/// Parameters the platform needs to create a trigger.
///
/// The fields the platform requires are explicit; anything else found in a
/// stored definition is kept in `extras` and forwarded untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerParams {
    #[serde(
        default,
        deserialize_with = "opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_with_token_id: Option<u64>,
    #[serde(
        default,
        deserialize_with = "opt_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub cool_down_period_minutes: Option<u64>,
    #[serde(default)]
    pub table_ids: Vec<String>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

/// Body of a trigger creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDefinition {
    pub component: String,
    pub configuration_id: FlowConfigId,
    #[serde(flatten)]
    pub params: TriggerParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerTable {
    #[serde(rename = "tableId")]
    pub table_id: String,
}

/// Trigger resource as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub id: TriggerId,
    pub component: String,
    pub configuration_id: FlowConfigId,
    #[serde(default, deserialize_with = "opt_u64")]
    pub run_with_token_id: Option<u64>,
    #[serde(default, deserialize_with = "opt_u64")]
    pub cool_down_period_minutes: Option<u64>,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub tables: Vec<TriggerTable>,
    #[serde(flatten)]
    pub extras: BTreeMap<String, Value>,
}

impl Trigger {
    pub fn table_ids(&self) -> Vec<String> {
        self.tables
            .iter()
            .map(|table| table.table_id.clone())
            .collect()
    }

    /// Parameters needed to recreate this trigger as it is.
    pub fn params(&self) -> TriggerParams {
        TriggerParams {
            run_with_token_id: self.run_with_token_id,
            cool_down_period_minutes: self.cool_down_period_minutes,
            table_ids: self.table_ids(),
            extras: BTreeMap::new(),
        }
    }

    pub fn last_run_at(&self) -> Option<DateTime<FixedOffset>> {
        self.last_run.as_deref().and_then(parse_timestamp)
    }
}

/// Storage table metadata used for freshness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDetail {
    pub id: String,
    #[serde(default, rename = "lastImportDate")]
    pub last_import_date: Option<String>,
}

impl TableDetail {
    pub fn last_import_at(&self) -> Option<DateTime<FixedOffset>> {
        self.last_import_date.as_deref().and_then(parse_timestamp)
    }
}

/// Last-known trigger status reported in the audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerStatus {
    /// The flow has no trigger.
    None,
    /// Every selected table exists and the trigger ran after its last import.
    Ok,
    /// A selected table was imported after the trigger last ran.
    Pending,
    /// A selected table no longer exists.
    Error,
    /// The trigger could not be inspected.
    Unknown,
}

impl TriggerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ok => "ok",
            Self::Pending => "pending",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses the platform's timestamps, which come either as RFC 3339 or with a
/// colon-less offset (`2024-05-01T10:00:00+0200`).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%z"))
        .ok()
}

fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(D::Error::custom(format!(
            "expected a string or numeric id, found {other}"
        ))),
    }
}

fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(value)) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected an unsigned integer, found {value}"))),
        Some(Value::String(value)) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected an unsigned integer, found `{value}`"))),
        Some(other) => Err(D::Error::custom(format!(
            "expected an unsigned integer, found {other}"
        ))),
    }
}
