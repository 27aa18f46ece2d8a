use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tandem_core::InteractionRecord;

/// Reward totals for one group of interaction records.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStatistics {
    /// Records with a finite numeric reward.
    pub count: usize,
    pub total_reward: f64,
    /// Records whose reward was missing, non-numeric or not finite.
    pub ignored: usize,
}

impl OutcomeStatistics {
    pub fn add(&mut self, reward: &Value) {
        match reward.as_f64().filter(|r| r.is_finite()) {
            Some(r) => {
                self.count += 1;
                self.total_reward += r;
            }
            None => self.ignored += 1,
        }
    }

    /// `None` until at least one numeric reward was seen.
    #[must_use]
    pub fn mean_reward(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        Some(self.total_reward / n)
    }
}

/// Label an action is grouped under. Strings are used as-is, everything
/// else by its JSON text, so `1` and `"1"` share a bucket.
#[must_use]
pub fn action_label(action: &Value) -> String {
    match action {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Groups records by `key_fn`, skipping records it maps to `None`.
pub fn aggregate(
    records: &[InteractionRecord],
    key_fn: impl Fn(&InteractionRecord) -> Option<String>,
) -> BTreeMap<String, OutcomeStatistics> {
    let mut stats: BTreeMap<String, OutcomeStatistics> = BTreeMap::new();
    for record in records {
        if let Some(key) = key_fn(record) {
            stats.entry(key).or_default().add(&record.reward);
        }
    }
    stats
}

#[must_use]
pub fn by_action(records: &[InteractionRecord]) -> BTreeMap<String, OutcomeStatistics> {
    aggregate(records, |r| Some(action_label(&r.action)))
}
