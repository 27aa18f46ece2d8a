use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_core::{short_id, DecisionKey, DecisionRecord, Policy};
use tandem_store::{EntityStore, StoreError};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::sink::DecisionSink;
use crate::validate::{self, RequestSchema};
use crate::ServiceError;

/// What the caller gets back for a committed decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub unit_id: String,
    pub decision_index: u64,
    pub state: Value,
    pub action: Value,
    pub action_probability: f64,
    /// When the server received the request (RFC 3339, UTC).
    pub timestamp: String,
}

impl TryFrom<&DecisionRecord> for DecisionResponse {
    type Error = ServiceError;

    fn try_from(record: &DecisionRecord) -> Result<Self, Self::Error> {
        let timestamp = record
            .received_at
            .format(&Rfc3339)
            .map_err(|e| ServiceError::Internal(format!("failed to format receipt time: {e}")))?;
        Ok(Self {
            unit_id: record.unit_id.clone(),
            decision_index: record.decision_index,
            state: record.state.clone(),
            action: record.action.clone(),
            action_probability: record.action_probability,
            timestamp,
        })
    }
}

#[derive(Clone)]
pub struct DecisionService {
    store: Arc<dyn EntityStore>,
    policy: Arc<dyn Policy>,
    sink: Arc<dyn DecisionSink>,
    schema: Arc<RequestSchema>,
}

impl DecisionService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        policy: Arc<dyn Policy>,
        sink: Arc<dyn DecisionSink>,
        schema: Arc<RequestSchema>,
    ) -> Self {
        Self {
            store,
            policy,
            sink,
            schema,
        }
    }

    /// Validates, builds the state, selects an action under the latest
    /// parameter snapshot and persists the decision.
    ///
    /// Nothing is written unless every step succeeds. The `(unit_id,
    /// decision_index)` uniqueness is enforced by the store's insert, so two
    /// concurrent requests for one key end with one success and one
    /// [`ServiceError::Conflict`].
    pub fn decide(&self, body: &Value) -> Result<DecisionResponse, ServiceError> {
        let req = validate::decision(body, &self.schema)?;

        if self.store.unit(&req.unit_id)?.is_none() {
            return Err(ServiceError::NotFound("Participant unit not found.".into()));
        }
        let key = DecisionKey::new(req.unit_id.clone(), req.decision_index);
        if self.store.decision(&key)?.is_some() {
            return Err(duplicate());
        }

        let state = self.policy.make_state(&req.context)?;

        // Read fresh on every request so a new snapshot is picked up at once.
        let parameters = self
            .store
            .latest_parameters()?
            .ok_or_else(|| ServiceError::NotFound("Policy parameters not found.".into()))?;

        let choice = self.policy.get_action(
            &req.unit_id,
            &state,
            &parameters.values,
            req.decision_type,
            req.decision_index,
        )?;

        let record = DecisionRecord {
            id: short_id(),
            unit_id: req.unit_id,
            decision_index: req.decision_index,
            decision_type: req.decision_type,
            state,
            action: choice.action,
            action_probability: choice.probability,
            random_seed: choice.seed,
            parameters_id: parameters.id,
            raw_context: req.context,
            request_timestamp: req.timestamp,
            received_at: OffsetDateTime::now_utc(),
        };

        match self.store.insert_decision(record.clone()) {
            Ok(()) => {}
            Err(StoreError::Duplicate { .. }) => return Err(duplicate()),
            Err(StoreError::ForeignKey { .. }) => {
                return Err(ServiceError::NotFound("Participant unit not found.".into()))
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            unit_id = %record.unit_id,
            decision_index = record.decision_index,
            decision_type = %record.decision_type,
            action = %record.action,
            probability = record.action_probability,
            parameters_id = %record.parameters_id,
            "decision committed"
        );
        self.sink.notify(&record);

        DecisionResponse::try_from(&record)
    }
}

fn duplicate() -> ServiceError {
    ServiceError::Conflict("Decision index already exists.".into())
}
