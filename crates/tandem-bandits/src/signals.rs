//! State, reward and statistics helpers shared by the binary-action policies.

use serde_json::{json, Value};
use tandem_core::{DecisionType, Features, InteractionRecord, ParameterValues, PolicyError};

use crate::error::{BanditError, Result};

pub const CONTEXT_CURRENT: &str = "cur_var";
pub const CONTEXT_HISTORY: &str = "past3_vars";
pub const HISTORY_LEN: usize = 3;
pub const OUTCOME_CLICKS: &str = "clicks";

/// Builds `[cur_var, past3_vars...]` from a context.
///
/// Only the two named fields are read, so extra fields and their order never
/// influence the state.
pub fn numeric_state(context: &Features) -> std::result::Result<Value, PolicyError> {
    let current = context
        .get(CONTEXT_CURRENT)
        .ok_or_else(|| PolicyError::InvalidContext(format!("{CONTEXT_CURRENT} is required")))?;
    let current = finite_number(current).ok_or_else(|| {
        PolicyError::InvalidContext(format!("{CONTEXT_CURRENT} must be a finite number"))
    })?;

    let history = context
        .get(CONTEXT_HISTORY)
        .ok_or_else(|| PolicyError::InvalidContext(format!("{CONTEXT_HISTORY} is required")))?
        .as_array()
        .ok_or_else(|| PolicyError::InvalidContext(format!("{CONTEXT_HISTORY} must be a list")))?;
    if history.len() != HISTORY_LEN {
        return Err(PolicyError::InvalidContext(format!(
            "{CONTEXT_HISTORY} must contain exactly {HISTORY_LEN} values, got {}",
            history.len()
        )));
    }

    let mut state = Vec::with_capacity(HISTORY_LEN + 1);
    state.push(current);
    for value in history {
        state.push(finite_number(value).ok_or_else(|| {
            PolicyError::InvalidContext(format!("{CONTEXT_HISTORY} must only hold finite numbers"))
        })?);
    }
    Ok(json!(state))
}

/// Reward is the click count, which must be a finite, non-negative number.
pub fn clicks_reward(outcome: &Features) -> std::result::Result<f64, PolicyError> {
    let clicks = outcome
        .get(OUTCOME_CLICKS)
        .ok_or_else(|| PolicyError::InvalidOutcome(format!("{OUTCOME_CLICKS} is required")))?;
    match finite_number(clicks) {
        Some(c) if c >= 0.0 => Ok(c),
        _ => Err(PolicyError::InvalidOutcome(format!(
            "{OUTCOME_CLICKS} must be a non-negative number"
        ))),
    }
}

/// Interprets `0`/`1` (integer or float without fraction) as an arm.
#[must_use]
pub fn binary_arm(action: &Value) -> Option<usize> {
    match action.as_f64() {
        Some(a) if a == 0.0 => Some(0),
        Some(a) if a == 1.0 => Some(1),
        _ => None,
    }
}

fn finite_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}

pub fn read_f64(parameters: &ParameterValues, name: &'static str) -> Result<f64> {
    let value = parameters
        .get(name)
        .ok_or(BanditError::MissingParameter(name))?;
    value.as_f64().ok_or(BanditError::WrongType {
        name,
        expected: "a number",
    })
}

/// Read a probability-like parameter, rejecting anything outside `[0, 1]`.
pub fn read_unit_interval(parameters: &ParameterValues, name: &'static str) -> Result<f64> {
    let value = read_f64(parameters, name)?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(BanditError::OutOfRange { name, value });
    }
    Ok(value)
}

/// Mixes the configured base seed with the request identity (FNV-1a 64).
///
/// The same unit, decision type and index always map to the same seed, so a
/// decision can be replayed for audit.
#[must_use]
pub fn derive_seed(
    base_seed: u64,
    unit_id: &str,
    decision_type: DecisionType,
    decision_index: u64,
) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            h ^= u64::from(b);
            h = h.wrapping_mul(PRIME);
        }
    };
    feed(&base_seed.to_le_bytes());
    feed(unit_id.as_bytes());
    feed(&[0xff]);
    feed(decision_type.as_str().as_bytes());
    feed(&decision_index.to_le_bytes());
    h
}

/// Reward totals per binary arm.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ArmStats {
    pub count: [usize; 2],
    pub total: [f64; 2],
    /// Records whose action or reward could not be interpreted.
    pub skipped: usize,
}

impl ArmStats {
    #[must_use]
    pub fn collect(data: &[InteractionRecord]) -> Self {
        let mut stats = Self::default();
        for record in data {
            let arm = binary_arm(&record.action);
            let reward = record.reward.as_f64().filter(|r| r.is_finite());
            match (arm, reward) {
                (Some(arm), Some(reward)) => {
                    stats.count[arm] += 1;
                    stats.total[arm] += reward;
                }
                _ => stats.skipped += 1,
            }
        }
        stats
    }

    #[must_use]
    pub fn mean(&self, arm: usize) -> Option<f64> {
        if self.count[arm] == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.count[arm] as f64;
        Some(self.total[arm] / n)
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.count[0] + self.count[1]
    }
}

pub fn report_clamp(name: &str, from: f64, to: f64) {
    #[cfg(feature = "telemetry")]
    tracing::warn!(parameter = name, from, to, "parameter clamped");
    #[cfg(not(feature = "telemetry"))]
    eprintln!("warning: parameter {name} clamped from {from} to {to}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(value: Value) -> Features {
        serde_json::from_value(value).expect("context")
    }

    #[test]
    fn state_ignores_field_order_and_extra_fields() {
        let a = context(json!({"cur_var": 25, "past3_vars": [24.5, 23.0, 22.5]}));
        let b = context(json!({"note": "x", "past3_vars": [24.5, 23.0, 22.5], "cur_var": 25}));
        let sa = numeric_state(&a).expect("state a");
        assert_eq!(sa, numeric_state(&b).expect("state b"));
        assert_eq!(sa, json!([25.0, 24.5, 23.0, 22.5]));
    }

    #[test]
    fn state_rejects_malformed_history() {
        let short = context(json!({"cur_var": 1, "past3_vars": [1, 2]}));
        assert!(matches!(
            numeric_state(&short),
            Err(PolicyError::InvalidContext(_))
        ));
        let text = context(json!({"cur_var": 1, "past3_vars": [1, "two", 3]}));
        assert!(numeric_state(&text).is_err());
        let missing = context(json!({"past3_vars": [1, 2, 3]}));
        assert!(numeric_state(&missing).is_err());
    }

    #[test]
    fn reward_requires_non_negative_clicks() {
        assert_eq!(clicks_reward(&context(json!({"clicks": 4}))), Ok(4.0));
        assert!(clicks_reward(&context(json!({"clicks": -1}))).is_err());
        assert!(clicks_reward(&context(json!({"clicks": "4"}))).is_err());
        assert!(clicks_reward(&context(json!({}))).is_err());
    }

    #[test]
    fn seed_depends_on_every_input() {
        let base = derive_seed(42, "g1", DecisionType::AyaMessage, 0);
        assert_eq!(base, derive_seed(42, "g1", DecisionType::AyaMessage, 0));
        assert_ne!(base, derive_seed(43, "g1", DecisionType::AyaMessage, 0));
        assert_ne!(base, derive_seed(42, "g2", DecisionType::AyaMessage, 0));
        assert_ne!(base, derive_seed(42, "g1", DecisionType::CpMessage, 0));
        assert_ne!(base, derive_seed(42, "g1", DecisionType::AyaMessage, 1));
    }

    #[test]
    fn binary_arm_accepts_integral_numbers_only() {
        assert_eq!(binary_arm(&json!(1)), Some(1));
        assert_eq!(binary_arm(&json!(0.0)), Some(0));
        assert_eq!(binary_arm(&json!(0.5)), None);
        assert_eq!(binary_arm(&json!("1")), None);
    }
}
