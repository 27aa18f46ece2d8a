//! Request validation.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. required top-level keys are present,
//! 2. they have the right primitive types (for outcome uploads this phase
//!    also covers the members of the `data` envelope, presence first),
//! 3. `decision_type` is one of the known categories,
//! 4. the context (and outcome) carry their required sub-fields.
//!
//! Only a request that passes all four phases is handed to a service, so a
//! malformed context never reaches the policy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tandem_core::{DecisionType, Features, UnitKind};

use crate::ServiceError;

type Object = Map<String, Value>;

/// Sub-fields the request layer requires before a policy sees a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSchema {
    /// Required in every decision and outcome context.
    pub context_fields: Vec<String>,
    /// Additional context fields for particular decision types.
    pub type_context_fields: BTreeMap<DecisionType, Vec<String>>,
    /// Required in every outcome payload.
    pub outcome_fields: Vec<String>,
}

impl Default for RequestSchema {
    fn default() -> Self {
        Self {
            context_fields: vec!["cur_var".into(), "past3_vars".into()],
            type_context_fields: BTreeMap::new(),
            outcome_fields: vec!["clicks".into()],
        }
    }
}

impl RequestSchema {
    fn context_fields_for(&self, decision_type: DecisionType) -> impl Iterator<Item = &str> {
        self.context_fields
            .iter()
            .chain(self.type_context_fields.get(&decision_type).into_iter().flatten())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterUnit {
    pub unit_id: String,
    pub kind: UnitKind,
    pub metadata: Features,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub unit_id: String,
    pub decision_index: u64,
    pub decision_type: DecisionType,
    pub context: Features,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRequest {
    pub unit_id: String,
    pub decision_index: u64,
    pub decision_type: DecisionType,
    pub timestamp: String,
    pub context: Features,
    pub action: Value,
    pub action_probability: f64,
    pub state: Value,
    pub outcome: Features,
}

fn invalid(message: impl Into<String>) -> ServiceError {
    ServiceError::Validation(message.into())
}

fn as_object(body: &Value) -> Result<&Object, ServiceError> {
    body.as_object()
        .ok_or_else(|| invalid("Request body must be a JSON object."))
}

fn require_keys(obj: &Object, keys: &[&str], prefix: &str) -> Result<(), ServiceError> {
    match keys.iter().find(|k| !obj.contains_key(**k)) {
        Some(missing) => Err(invalid(format!("{prefix}{missing} is required."))),
        None => Ok(()),
    }
}

fn string_field(obj: &Object, key: &str) -> Result<String, ServiceError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("{key} must be a string.")))
}

fn index_field(obj: &Object, key: &str) -> Result<u64, ServiceError> {
    obj.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid(format!("{key} must be a non-negative integer.")))
}

fn object_field(obj: &Object, key: &str, label: &str) -> Result<Features, ServiceError> {
    obj.get(key)
        .and_then(Value::as_object)
        .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .ok_or_else(|| invalid(format!("{label} must be an object.")))
}

fn decision_type(raw: &str) -> Result<DecisionType, ServiceError> {
    DecisionType::parse(raw).ok_or_else(|| {
        let allowed: Vec<String> = DecisionType::ALL
            .iter()
            .map(|t| format!("'{t}'"))
            .collect();
        invalid(format!(
            "decision_type must be one of {}.",
            allowed.join(", ")
        ))
    })
}

fn require_sub_fields<'a>(
    payload: &Features,
    fields: impl IntoIterator<Item = &'a str>,
    label: &str,
) -> Result<(), ServiceError> {
    for field in fields {
        if !payload.contains_key(field) {
            return Err(invalid(format!("Invalid {label}. {field} is required.")));
        }
    }
    Ok(())
}

fn non_empty(unit_id: String) -> Result<String, ServiceError> {
    if unit_id.trim().is_empty() {
        return Err(invalid("unit_id must not be empty."));
    }
    Ok(unit_id)
}

/// `{unit_id, kind?, ...metadata}`. Everything besides `unit_id` and `kind`
/// is kept verbatim as metadata.
pub fn registration(body: &Value) -> Result<RegisterUnit, ServiceError> {
    let obj = as_object(body)?;
    require_keys(obj, &["unit_id"], "")?;

    let unit_id = non_empty(string_field(obj, "unit_id")?)?;
    let kind = match obj.get("kind") {
        None => UnitKind::default(),
        Some(Value::String(raw)) => UnitKind::parse(raw)
            .ok_or_else(|| invalid("kind must be 'dyad' or 'group'."))?,
        Some(_) => return Err(invalid("kind must be a string.")),
    };

    let metadata = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "unit_id" && k.as_str() != "kind")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(RegisterUnit {
        unit_id,
        kind,
        metadata,
    })
}

pub fn decision(body: &Value, schema: &RequestSchema) -> Result<DecisionRequest, ServiceError> {
    let obj = as_object(body)?;
    require_keys(
        obj,
        &["unit_id", "decision_index", "decision_type", "context", "timestamp"],
        "",
    )?;

    let unit_id = non_empty(string_field(obj, "unit_id")?)?;
    let decision_index = index_field(obj, "decision_index")?;
    let raw_type = string_field(obj, "decision_type")?;
    let context = object_field(obj, "context", "context")?;
    let timestamp = string_field(obj, "timestamp")?;

    let decision_type = decision_type(&raw_type)?;

    require_sub_fields(&context, schema.context_fields_for(decision_type), "context")?;

    Ok(DecisionRequest {
        unit_id,
        decision_index,
        decision_type,
        context,
        timestamp,
    })
}

/// `{unit_id, decision_index, decision_type, timestamp,
///   data: {context, action, action_probability, state, outcome}}`
pub fn outcome(body: &Value, schema: &RequestSchema) -> Result<OutcomeRequest, ServiceError> {
    let obj = as_object(body)?;
    require_keys(
        obj,
        &["unit_id", "decision_index", "decision_type", "timestamp", "data"],
        "",
    )?;

    let unit_id = non_empty(string_field(obj, "unit_id")?)?;
    let decision_index = index_field(obj, "decision_index")?;
    let raw_type = string_field(obj, "decision_type")?;
    let timestamp = string_field(obj, "timestamp")?;
    let data = obj
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("data must be an object."))?;

    require_keys(
        data,
        &["context", "action", "action_probability", "state", "outcome"],
        "data.",
    )?;
    let context = object_field(data, "context", "data.context")?;
    let action = data.get("action").cloned().unwrap_or(Value::Null);
    let action_probability = data
        .get("action_probability")
        .and_then(Value::as_f64)
        .filter(|p| (0.0..=1.0).contains(p))
        .ok_or_else(|| invalid("data.action_probability must be a number between 0 and 1."))?;
    let state = data.get("state").cloned().unwrap_or(Value::Null);
    let outcome = object_field(data, "outcome", "data.outcome")?;

    let decision_type = decision_type(&raw_type)?;

    require_sub_fields(&context, schema.context_fields_for(decision_type), "context")?;
    require_sub_fields(
        &outcome,
        schema.outcome_fields.iter().map(String::as_str),
        "outcome",
    )?;

    Ok(OutcomeRequest {
        unit_id,
        decision_index,
        decision_type,
        timestamp,
        context,
        action,
        action_probability,
        state,
        outcome,
    })
}
