//! Durable records owned by the entity store.
//!
//! Every record here is write-once: the store only ever inserts them, and the
//! `(unit_id, decision_index)` pair identifies both a [`DecisionRecord`] and
//! the [`InteractionRecord`] that later reports its outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{DecisionType, Features, ParameterValues, UnitKind};

/// Length of the random record identifiers.
const SHORT_ID_LEN: usize = 8;

/// Short random identifier for records that need one besides their key.
#[must_use]
pub fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(SHORT_ID_LEN);
    id
}

/// Unique key of a decision cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecisionKey {
    pub unit_id: String,
    pub decision_index: u64,
}

impl DecisionKey {
    pub fn new(unit_id: impl Into<String>, decision_index: u64) -> Self {
        Self {
            unit_id: unit_id.into(),
            decision_index,
        }
    }
}

/// An enrolled dyad or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantUnit {
    /// External identifier, unique across all unit kinds.
    pub unit_id: String,
    pub kind: UnitKind,
    /// Everything else the registration request carried, stored verbatim
    /// (consent window, member identifiers, messaging windows, ...).
    pub metadata: Features,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Timestamped snapshot of the active policy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyParameters {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub values: ParameterValues,
}

impl PolicyParameters {
    pub fn new(values: ParameterValues) -> Self {
        Self {
            id: short_id(),
            created_at: OffsetDateTime::now_utc(),
            values,
        }
    }
}

/// A decision served to a participant unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    pub unit_id: String,
    pub decision_index: u64,
    pub decision_type: DecisionType,
    pub state: Value,
    pub action: Value,
    pub action_probability: f64,
    /// Seed of the draw, enough to replay the selection.
    pub random_seed: u64,
    /// Snapshot the action was selected under.
    pub parameters_id: String,
    pub raw_context: Features,
    /// Timestamp as sent by the caller.
    pub request_timestamp: String,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl DecisionRecord {
    #[must_use]
    pub fn key(&self) -> DecisionKey {
        DecisionKey::new(self.unit_id.clone(), self.decision_index)
    }
}

/// Observed outcome of a decision cycle together with its reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub unit_id: String,
    pub decision_index: u64,
    pub decision_type: DecisionType,
    pub raw_context: Features,
    pub action: Value,
    pub action_probability: f64,
    pub state: Value,
    pub outcome: Features,
    pub reward: Value,
    pub request_timestamp: String,
    #[serde(with = "time::serde::rfc3339")]
    pub ingested_at: OffsetDateTime,
}

impl InteractionRecord {
    #[must_use]
    pub fn key(&self) -> DecisionKey {
        DecisionKey::new(self.unit_id.clone(), self.decision_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Completed,
    Failed,
}

/// Audit entry for one run of the parameter update job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdateRequest {
    pub id: String,
    pub requested_by: String,
    pub policy: String,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub status: UpdateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_parameters_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_parameters_id: Option<String>,
    pub records_used: usize,
    pub diagnostics: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
