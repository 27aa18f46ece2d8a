use std::sync::Arc;

use serde_json::Value;
use tandem_core::ParticipantUnit;
use tandem_store::{EntityStore, StoreError};
use time::OffsetDateTime;

use crate::validate;
use crate::ServiceError;

/// Creates participant units. Identifiers are unique across dyads and groups.
#[derive(Clone)]
pub struct RegistrationService {
    store: Arc<dyn EntityStore>,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn register(&self, body: &Value) -> Result<ParticipantUnit, ServiceError> {
        let req = validate::registration(body)?;
        let unit = ParticipantUnit {
            unit_id: req.unit_id,
            kind: req.kind,
            metadata: req.metadata,
            created_at: OffsetDateTime::now_utc(),
        };

        match self.store.insert_unit(unit.clone()) {
            Ok(()) => {
                tracing::info!(unit_id = %unit.unit_id, kind = %unit.kind, "registered unit");
                Ok(unit)
            }
            Err(StoreError::Duplicate { .. }) => Err(ServiceError::Conflict(
                "Participant unit already exists.".into(),
            )),
            Err(err) => Err(err.into()),
        }
    }
}
