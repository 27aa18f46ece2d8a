//! The decision policy contract.
//!
//! A policy turns a raw context into a canonical state, picks an action for
//! that state under a parameter snapshot, turns an observed outcome into a
//! reward, and produces new parameters from collected interaction records.
//! The services only ever talk to this trait, so a strategy can be swapped
//! without touching validation or persistence.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{DecisionType, Features, InteractionRecord, ParameterValues};

/// Errors a policy reports instead of panicking on malformed input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("Invalid context: {0}")]
    InvalidContext(String),
    #[error("Invalid outcome: {0}")]
    InvalidOutcome(String),
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Update failed: {0}")]
    Update(String),
}

impl PolicyError {
    /// `true` when the caller's payload was at fault, `false` for server state.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PolicyError::InvalidContext(_) | PolicyError::InvalidOutcome(_)
        )
    }
}

/// Result of a single action selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionChoice {
    pub action: Value,
    /// Probability with which `action` was selected.
    pub probability: f64,
    /// Seed of the random draw; selecting again with it yields the same action.
    pub seed: u64,
}

/// New parameters plus whatever the algorithm wants to report about the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub parameters: ParameterValues,
    pub diagnostics: Value,
}

pub trait Policy: Send + Sync {
    /// Stable identifier recorded alongside update requests.
    fn name(&self) -> &str;

    /// Parameters used to seed the store before the first update has run.
    fn priors(&self) -> ParameterValues;

    /// Deterministic, side-effect-free transform of `context` into a state.
    fn make_state(&self, context: &Features) -> Result<Value, PolicyError>;

    /// Selects an action. Must not mutate anything shared.
    fn get_action(
        &self,
        unit_id: &str,
        state: &Value,
        parameters: &ParameterValues,
        decision_type: DecisionType,
        decision_index: u64,
    ) -> Result<ActionChoice, PolicyError>;

    /// Deterministic transform of an observed outcome into a reward.
    fn make_reward(
        &self,
        unit_id: &str,
        state: &Value,
        action: &Value,
        outcome: &Features,
    ) -> Result<Value, PolicyError>;

    /// Batch update from accumulated interaction records. Runs out of band.
    fn update(
        &self,
        old_parameters: &ParameterValues,
        data: &[InteractionRecord],
    ) -> Result<ParameterUpdate, PolicyError>;
}
