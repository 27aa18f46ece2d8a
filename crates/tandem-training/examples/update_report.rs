//! Runs a parameter update over a handful of synthetic interactions and
//! prints the report.
//!
//! Run with: cargo run -p tandem-training --example update_report

use std::error::Error;
use std::sync::Arc;

use serde_json::json;
use tandem_bandits::BernoulliPolicy;
use tandem_core::{
    short_id, DecisionType, Features, InteractionRecord, ParticipantUnit, Policy,
    PolicyParameters, UnitKind,
};
use tandem_store::{EntityStore, LocalStore};
use tandem_training::UpdateJob;
use time::OffsetDateTime;

fn main() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(LocalStore::in_memory());
    let policy = Arc::new(BernoulliPolicy::default());

    store.insert_unit(ParticipantUnit {
        unit_id: "dyad-7".into(),
        kind: UnitKind::Dyad,
        metadata: Features::new(),
        created_at: OffsetDateTime::now_utc(),
    })?;
    store.insert_parameters(PolicyParameters::new(policy.priors()))?;

    // Messages (action 1) drew more clicks than silence (action 0).
    let observed = [(1, 3.0), (0, 0.0), (1, 5.0), (1, 2.0), (0, 1.0), (0, 0.0)];
    for (index, (action, clicks)) in observed.into_iter().enumerate() {
        store.insert_interaction(InteractionRecord {
            id: short_id(),
            unit_id: "dyad-7".into(),
            decision_index: index as u64,
            decision_type: DecisionType::AyaMessage,
            raw_context: Features::new(),
            action: json!(action),
            action_probability: 0.5,
            state: json!([20.0, 19.0, 18.5, 18.0]),
            outcome: Features::from([("clicks".to_string(), json!(clicks))]),
            reward: json!(clicks),
            request_timestamp: "2025-01-01T12:00:00".into(),
            ingested_at: OffsetDateTime::now_utc(),
        })?;
    }

    let report = UpdateJob::new(store, policy).run("example")?;

    println!("Outcomes by action:");
    for (action, stats) in &report.outcomes {
        println!(
            "  {action} -> {} records, mean reward {:.2}",
            stats.count,
            stats.mean_reward().unwrap_or(0.0)
        );
    }
    println!();
    println!("New parameters:");
    println!("{}", serde_json::to_string_pretty(&report.parameters.values)?);
    Ok(())
}
