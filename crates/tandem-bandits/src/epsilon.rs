//! ε-greedy policy over the two message arms.
//!
//! With probability `epsilon` an arm is picked uniformly at random, otherwise
//! the arm with the higher estimated value is exploited. Estimates live in the
//! parameter snapshot under `values` and are only changed by [`Policy::update`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tandem_core::{
    ActionChoice, DecisionType, Features, InteractionRecord, ParameterUpdate, ParameterValues,
    Policy, PolicyError,
};

use crate::error::{BanditError, Result};
use crate::signals::{self, ArmStats};
use crate::DEFAULT_SEED;

pub const EPSILON: &str = "epsilon";
pub const VALUES: &str = "values";
const DEFAULT_EPSILON: f64 = 0.2;
const ARMS: [&str; 2] = ["0", "1"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpsilonGreedyPolicy {
    base_seed: u64,
}

impl EpsilonGreedyPolicy {
    #[must_use]
    pub fn new(base_seed: u64) -> Self {
        Self { base_seed }
    }

    fn read_epsilon(parameters: &ParameterValues) -> Result<f64> {
        let e = signals::read_f64(parameters, EPSILON)?;
        // clamp to [0.0, 1.0]; non-finite values fall back to the default
        let clamped = if e.is_finite() {
            e.clamp(0.0, 1.0)
        } else {
            DEFAULT_EPSILON
        };
        if (clamped - e).abs() > f64::EPSILON || !e.is_finite() {
            signals::report_clamp(EPSILON, e, clamped);
        }
        Ok(clamped)
    }

    fn read_values(parameters: &ParameterValues) -> Result<[f64; 2]> {
        let raw = parameters
            .get(VALUES)
            .ok_or(BanditError::MissingParameter(VALUES))?;
        let map: BTreeMap<String, f64> = serde_json::from_value(raw.clone())?;
        let mut values = [0.0; 2];
        for (arm, name) in ARMS.iter().enumerate() {
            values[arm] = *map.get(*name).ok_or(BanditError::MissingParameter(VALUES))?;
        }
        Ok(values)
    }

    /// Replays a draw: returns the chosen arm and its selection probability.
    #[must_use]
    pub fn select_with_seed(seed: u64, epsilon: f64, values: [f64; 2]) -> (usize, f64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let greedy = usize::from(values[1] > values[0]);
        let explore = rng.gen::<f64>() < epsilon;
        let arm = if explore { rng.gen_range(0..2) } else { greedy };
        let probability = if arm == greedy {
            (1.0 - epsilon) + epsilon / 2.0
        } else {
            epsilon / 2.0
        };
        (arm, probability)
    }
}

impl Default for EpsilonGreedyPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Policy for EpsilonGreedyPolicy {
    fn name(&self) -> &str {
        "epsilon_greedy"
    }

    fn priors(&self) -> ParameterValues {
        ParameterValues::from([
            (EPSILON.to_string(), json!(DEFAULT_EPSILON)),
            (VALUES.to_string(), json!({"0": 0.0, "1": 0.0})),
        ])
    }

    fn make_state(&self, context: &Features) -> std::result::Result<Value, PolicyError> {
        signals::numeric_state(context)
    }

    fn get_action(
        &self,
        unit_id: &str,
        _state: &Value,
        parameters: &ParameterValues,
        decision_type: DecisionType,
        decision_index: u64,
    ) -> std::result::Result<ActionChoice, PolicyError> {
        let epsilon = Self::read_epsilon(parameters)?;
        let values = Self::read_values(parameters)?;
        let seed = signals::derive_seed(self.base_seed, unit_id, decision_type, decision_index);
        let (arm, probability) = Self::select_with_seed(seed, epsilon, values);
        Ok(ActionChoice {
            action: json!(arm),
            probability,
            seed,
        })
    }

    fn make_reward(
        &self,
        _unit_id: &str,
        _state: &Value,
        _action: &Value,
        outcome: &Features,
    ) -> std::result::Result<Value, PolicyError> {
        signals::clicks_reward(outcome).map(|r| json!(r))
    }

    /// Replaces each observed arm's value with its mean reward. Unobserved
    /// arms and `epsilon` are carried over.
    fn update(
        &self,
        old_parameters: &ParameterValues,
        data: &[InteractionRecord],
    ) -> std::result::Result<ParameterUpdate, PolicyError> {
        let epsilon = Self::read_epsilon(old_parameters)?;
        let mut values = Self::read_values(old_parameters)?;
        let previous = values;
        let stats = ArmStats::collect(data);
        for (arm, value) in values.iter_mut().enumerate() {
            if let Some(mean) = stats.mean(arm) {
                *value = mean;
            }
        }

        let mut parameters = old_parameters.clone();
        parameters.insert(EPSILON.to_string(), json!(epsilon));
        parameters.insert(
            VALUES.to_string(),
            json!({ "0": values[0], "1": values[1] }),
        );

        Ok(ParameterUpdate {
            parameters,
            diagnostics: json!({
                "records_used": stats.used(),
                "records_skipped": stats.skipped,
                "observations": {"0": stats.count[0], "1": stats.count[1]},
                "previous_values": {"0": previous[0], "1": previous[1]},
            }),
        })
    }
}
