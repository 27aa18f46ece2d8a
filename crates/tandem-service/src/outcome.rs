use std::sync::Arc;

use serde_json::Value;
use tandem_core::{short_id, DecisionKey, InteractionRecord, Policy};
use tandem_store::{EntityStore, StoreError};
use time::OffsetDateTime;

use crate::validate::{self, RequestSchema};
use crate::ServiceError;

#[derive(Clone)]
pub struct OutcomeService {
    store: Arc<dyn EntityStore>,
    policy: Arc<dyn Policy>,
    schema: Arc<RequestSchema>,
    require_prior_decision: bool,
}

impl OutcomeService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        policy: Arc<dyn Policy>,
        schema: Arc<RequestSchema>,
        require_prior_decision: bool,
    ) -> Self {
        Self {
            store,
            policy,
            schema,
            require_prior_decision,
        }
    }

    /// Stores the observed outcome together with the reward the policy
    /// derives from it. One interaction record per `(unit_id, decision_index)`.
    ///
    /// Unless `require_prior_decision` is set, the echoed context, action and
    /// state are taken as given and no matching decision has to exist.
    pub fn record(&self, body: &Value) -> Result<InteractionRecord, ServiceError> {
        let req = validate::outcome(body, &self.schema)?;

        if self.store.unit(&req.unit_id)?.is_none() {
            return Err(ServiceError::NotFound("Participant unit not found.".into()));
        }
        let key = DecisionKey::new(req.unit_id.clone(), req.decision_index);
        if self.store.interaction(&key)?.is_some() {
            return Err(duplicate());
        }
        if self.require_prior_decision && self.store.decision(&key)?.is_none() {
            return Err(ServiceError::NotFound("Decision not found.".into()));
        }

        let reward = self
            .policy
            .make_reward(&req.unit_id, &req.state, &req.action, &req.outcome)?;

        let record = InteractionRecord {
            id: short_id(),
            unit_id: req.unit_id,
            decision_index: req.decision_index,
            decision_type: req.decision_type,
            raw_context: req.context,
            action: req.action,
            action_probability: req.action_probability,
            state: req.state,
            outcome: req.outcome,
            reward,
            request_timestamp: req.timestamp,
            ingested_at: OffsetDateTime::now_utc(),
        };

        match self.store.insert_interaction(record.clone()) {
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
            reward = %record.reward,
            "outcome recorded"
        );
        Ok(record)
    }
}

fn duplicate() -> ServiceError {
    ServiceError::Conflict("Outcome already recorded for this decision index.".into())
}
