//! Binary action drawn with a single stored probability.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tandem_core::{
    ActionChoice, DecisionType, Features, InteractionRecord, ParameterUpdate, ParameterValues,
    Policy, PolicyError,
};

use crate::signals::{self, ArmStats};
use crate::DEFAULT_SEED;

pub const PROBABILITY_OF_ACTION: &str = "probability_of_action";
const DEFAULT_PROBABILITY: f64 = 0.5;
/// Bounds keep both arms explorable after any number of updates.
const MIN_PROBABILITY: f64 = 0.05;
const MAX_PROBABILITY: f64 = 0.95;
/// Largest change a single update may apply.
const UPDATE_STEP: f64 = 0.1;

/// Sends the intervention (`1`) with probability `probability_of_action`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BernoulliPolicy {
    base_seed: u64,
}

impl BernoulliPolicy {
    #[must_use]
    pub fn new(base_seed: u64) -> Self {
        Self { base_seed }
    }

    /// Replays a draw: returns the action and its selection probability.
    #[must_use]
    pub fn select_with_seed(seed: u64, probability: f64) -> (u8, f64) {
        let mut rng = StdRng::seed_from_u64(seed);
        if rng.gen::<f64>() < probability {
            (1, probability)
        } else {
            (0, 1.0 - probability)
        }
    }
}

impl Default for BernoulliPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Policy for BernoulliPolicy {
    fn name(&self) -> &str {
        "bernoulli"
    }

    fn priors(&self) -> ParameterValues {
        ParameterValues::from([(PROBABILITY_OF_ACTION.to_string(), json!(DEFAULT_PROBABILITY))])
    }

    fn make_state(&self, context: &Features) -> Result<Value, PolicyError> {
        signals::numeric_state(context)
    }

    fn get_action(
        &self,
        unit_id: &str,
        _state: &Value,
        parameters: &ParameterValues,
        decision_type: DecisionType,
        decision_index: u64,
    ) -> Result<ActionChoice, PolicyError> {
        let p = signals::read_unit_interval(parameters, PROBABILITY_OF_ACTION)?;
        let seed = signals::derive_seed(self.base_seed, unit_id, decision_type, decision_index);
        let (action, probability) = Self::select_with_seed(seed, p);
        Ok(ActionChoice {
            action: json!(action),
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
    ) -> Result<Value, PolicyError> {
        signals::clicks_reward(outcome).map(|r| json!(r))
    }

    /// Moves the probability one step toward the arm with the higher mean
    /// reward. Nothing changes until both arms have been observed.
    fn update(
        &self,
        old_parameters: &ParameterValues,
        data: &[InteractionRecord],
    ) -> Result<ParameterUpdate, PolicyError> {
        let previous = signals::read_unit_interval(old_parameters, PROBABILITY_OF_ACTION)?;
        let stats = ArmStats::collect(data);

        let proposed = match (stats.mean(0), stats.mean(1)) {
            (Some(m0), Some(m1)) if m1 > m0 => previous + UPDATE_STEP,
            (Some(m0), Some(m1)) if m1 < m0 => previous - UPDATE_STEP,
            _ => previous,
        };
        let next = proposed.clamp(MIN_PROBABILITY, MAX_PROBABILITY);
        if (next - proposed).abs() > f64::EPSILON {
            signals::report_clamp(PROBABILITY_OF_ACTION, proposed, next);
        }

        let mut parameters = old_parameters.clone();
        parameters.insert(PROBABILITY_OF_ACTION.to_string(), json!(next));

        Ok(ParameterUpdate {
            parameters,
            diagnostics: json!({
                "records_used": stats.used(),
                "records_skipped": stats.skipped,
                "mean_reward": {"0": stats.mean(0), "1": stats.mean(1)},
                "previous": previous,
                "probability_of_action": next,
            }),
        })
    }
}
