use std::io::{self, Read};

use serde::Serialize;
use serde_json::Value;
use tandem_bandits::{PolicyKind, DEFAULT_SEED};
use tandem_core::{ActionChoice, DecisionType, Features};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Serialize)]
struct DecisionPreview {
    ts: String,
    policy: String,
    context: Features,
    state: Value,
    choice: ActionChoice,
}

fn iso8601_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Reads a context object from stdin and prints the decision the default
/// policy would take under its priors.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let context: Features = if input.trim().is_empty() {
        serde_json::from_str(r#"{"cur_var": 25, "past3_vars": [24.5, 23.0, 22.5]}"#)?
    } else {
        serde_json::from_str(&input)?
    };

    let policy = PolicyKind::default().build(DEFAULT_SEED);
    let state = policy.make_state(&context)?;
    let choice = policy.get_action("preview", &state, &policy.priors(), DecisionType::AyaMessage, 0)?;

    let preview = DecisionPreview {
        ts: iso8601_now(),
        policy: policy.name().to_string(),
        context,
        state,
        choice,
    };
    serde_json::to_writer_pretty(io::stdout(), &preview)?;
    println!();
    Ok(())
}
