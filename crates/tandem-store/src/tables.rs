use std::collections::BTreeMap;

use tandem_core::{
    DecisionKey, DecisionRecord, InteractionRecord, ParameterUpdateRequest, ParticipantUnit,
    PolicyParameters,
};

use crate::StoreError;

/// What a successful insert touched, so a failed commit can take it back.
#[derive(Debug)]
pub(crate) enum Undo {
    Unit(String),
    Decision(DecisionKey),
    Interaction(DecisionKey),
    Parameters,
    UpdateRequest,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) units: BTreeMap<String, ParticipantUnit>,
    pub(crate) decisions: BTreeMap<DecisionKey, DecisionRecord>,
    pub(crate) interactions: BTreeMap<DecisionKey, InteractionRecord>,
    /// Insertion order doubles as the tie breaker for equal timestamps.
    pub(crate) parameters: Vec<PolicyParameters>,
    pub(crate) update_requests: Vec<ParameterUpdateRequest>,
}

fn display_key(key: &DecisionKey) -> String {
    format!("{}#{}", key.unit_id, key.decision_index)
}

impl Tables {
    pub(crate) fn insert_unit(&mut self, unit: ParticipantUnit) -> Result<Undo, StoreError> {
        if self.units.contains_key(&unit.unit_id) {
            return Err(StoreError::Duplicate {
                table: "units",
                key: unit.unit_id,
            });
        }
        let undo = Undo::Unit(unit.unit_id.clone());
        self.units.insert(unit.unit_id.clone(), unit);
        Ok(undo)
    }

    pub(crate) fn insert_decision(&mut self, record: DecisionRecord) -> Result<Undo, StoreError> {
        let key = record.key();
        if !self.units.contains_key(&key.unit_id) {
            return Err(StoreError::ForeignKey {
                table: "decisions.unit_id",
                key: key.unit_id,
            });
        }
        if self.decisions.contains_key(&key) {
            return Err(StoreError::Duplicate {
                table: "decisions",
                key: display_key(&key),
            });
        }
        self.decisions.insert(key.clone(), record);
        Ok(Undo::Decision(key))
    }

    pub(crate) fn insert_interaction(
        &mut self,
        record: InteractionRecord,
    ) -> Result<Undo, StoreError> {
        let key = record.key();
        if !self.units.contains_key(&key.unit_id) {
            return Err(StoreError::ForeignKey {
                table: "interactions.unit_id",
                key: key.unit_id,
            });
        }
        if self.interactions.contains_key(&key) {
            return Err(StoreError::Duplicate {
                table: "interactions",
                key: display_key(&key),
            });
        }
        self.interactions.insert(key.clone(), record);
        Ok(Undo::Interaction(key))
    }

    pub(crate) fn insert_parameters(
        &mut self,
        snapshot: PolicyParameters,
    ) -> Result<Undo, StoreError> {
        if self.parameters.iter().any(|p| p.id == snapshot.id) {
            return Err(StoreError::Duplicate {
                table: "parameters",
                key: snapshot.id,
            });
        }
        self.parameters.push(snapshot);
        Ok(Undo::Parameters)
    }

    pub(crate) fn append_update_request(
        &mut self,
        request: ParameterUpdateRequest,
    ) -> Result<Undo, StoreError> {
        if self.update_requests.iter().any(|r| r.id == request.id) {
            return Err(StoreError::Duplicate {
                table: "update_requests",
                key: request.id,
            });
        }
        self.update_requests.push(request);
        Ok(Undo::UpdateRequest)
    }

    pub(crate) fn latest_parameters(&self) -> Option<&PolicyParameters> {
        self.parameters
            .iter()
            .enumerate()
            .max_by_key(|(seq, p)| (p.created_at, *seq))
            .map(|(_, p)| p)
    }

    pub(crate) fn rollback(&mut self, undo: Undo) {
        match undo {
            Undo::Unit(id) => {
                self.units.remove(&id);
            }
            Undo::Decision(key) => {
                self.decisions.remove(&key);
            }
            Undo::Interaction(key) => {
                self.interactions.remove(&key);
            }
            Undo::Parameters => {
                self.parameters.pop();
            }
            Undo::UpdateRequest => {
                self.update_requests.pop();
            }
        }
    }
}
