#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Out-of-band parameter updates.
//!
//! An [`UpdateJob`] reads the latest parameter snapshot and every stored
//! interaction record, asks the policy for new parameters and appends them
//! as a new snapshot. It never runs inside a decision request: decisions
//! keep reading whatever snapshot is latest until the new one is committed.
//! Every run leaves a [`ParameterUpdateRequest`] behind, whether it
//! completed or failed.

pub mod stats;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tandem_core::{
    short_id, ParameterUpdateRequest, Policy, PolicyError, PolicyParameters, UpdateStatus,
};
use tandem_store::{EntityStore, StoreError};
use thiserror::Error;
use time::OffsetDateTime;

pub use stats::OutcomeStatistics;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("no policy parameters to update from")]
    NoParameters,
    #[error("policy update failed: {0}")]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub request: ParameterUpdateRequest,
    pub parameters: PolicyParameters,
    pub outcomes: BTreeMap<String, OutcomeStatistics>,
}

pub struct UpdateJob {
    store: Arc<dyn EntityStore>,
    policy: Arc<dyn Policy>,
}

impl UpdateJob {
    pub fn new(store: Arc<dyn EntityStore>, policy: Arc<dyn Policy>) -> Self {
        Self { store, policy }
    }

    /// Runs one update. On failure an audit record with status `failed` is
    /// appended before the error is returned. Once the new snapshot is
    /// committed the run counts as completed; a failure to append its audit
    /// record is logged and the report is still returned.
    pub fn run(&self, requested_by: &str) -> Result<UpdateReport, TrainingError> {
        let mut audit = ParameterUpdateRequest {
            id: short_id(),
            requested_by: requested_by.to_string(),
            policy: self.policy.name().to_string(),
            requested_at: OffsetDateTime::now_utc(),
            finished_at: OffsetDateTime::now_utc(),
            status: UpdateStatus::Failed,
            base_parameters_id: None,
            new_parameters_id: None,
            records_used: 0,
            diagnostics: Value::Null,
            error: None,
        };

        match self.execute(&mut audit) {
            Ok((parameters, outcomes)) => {
                audit.status = UpdateStatus::Completed;
                audit.finished_at = OffsetDateTime::now_utc();
                if let Err(store_err) = self.store.append_update_request(audit.clone()) {
                    tracing::error!(
                        request = %audit.id,
                        snapshot = %parameters.id,
                        "snapshot committed but audit record was not: {store_err}"
                    );
                }
                tracing::info!(
                    request = %audit.id,
                    requested_by,
                    base = audit.base_parameters_id.as_deref().unwrap_or("-"),
                    snapshot = %parameters.id,
                    records = audit.records_used,
                    "parameter update completed"
                );
                Ok(UpdateReport {
                    request: audit,
                    parameters,
                    outcomes,
                })
            }
            Err(err) => {
                audit.error = Some(err.to_string());
                audit.finished_at = OffsetDateTime::now_utc();
                tracing::warn!(request = %audit.id, requested_by, "parameter update failed: {err}");
                if let Err(store_err) = self.store.append_update_request(audit) {
                    tracing::error!("could not record failed update: {store_err}");
                }
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        audit: &mut ParameterUpdateRequest,
    ) -> Result<(PolicyParameters, BTreeMap<String, OutcomeStatistics>), TrainingError> {
        let base = self
            .store
            .latest_parameters()?
            .ok_or(TrainingError::NoParameters)?;
        audit.base_parameters_id = Some(base.id.clone());

        let records = self.store.interactions()?;
        audit.records_used = records.len();
        let outcomes = stats::by_action(&records);

        let update = self.policy.update(&base.values, &records)?;
        let snapshot = PolicyParameters::new(update.parameters);
        audit.diagnostics = json!({
            "policy": update.diagnostics,
            "outcomes": outcomes,
        });

        self.store.insert_parameters(snapshot.clone())?;
        audit.new_parameters_id = Some(snapshot.id.clone());
        Ok((snapshot, outcomes))
    }
}
