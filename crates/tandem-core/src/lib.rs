//! Core traits and types shared by every tandem crate.
//!
//! The crate holds the entity records kept by the store, the enumerations the
//! request layer validates against, and the [`Policy`] contract that concrete
//! decision strategies implement.

pub mod policy;
pub mod records;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub use policy::{ActionChoice, ParameterUpdate, Policy, PolicyError};
pub use records::{
    short_id, DecisionKey, DecisionRecord, InteractionRecord, ParameterUpdateRequest,
    ParticipantUnit, PolicyParameters, UpdateStatus,
};

/// Caller supplied key/value payload (context, outcome, unit metadata).
///
/// A `BTreeMap` keeps keys sorted, so two payloads that only differ in field
/// order compare and serialize identically.
pub type Features = BTreeMap<String, Value>;

/// Named policy parameters as stored in a [`PolicyParameters`] snapshot.
pub type ParameterValues = BTreeMap<String, Value>;

/// Category of message or interaction a decision is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    AyaMessage,
    CpMessage,
    DyadGame,
}

impl DecisionType {
    pub const ALL: [DecisionType; 3] = [
        DecisionType::AyaMessage,
        DecisionType::CpMessage,
        DecisionType::DyadGame,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionType::AyaMessage => "aya_message",
            DecisionType::CpMessage => "cp_message",
            DecisionType::DyadGame => "dyad_game",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of enrolled participant unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// A care partner and patient enrolled together.
    #[default]
    Dyad,
    /// Any number of members enrolled under one identifier.
    Group,
}

impl UnitKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Dyad => "dyad",
            UnitKind::Group => "group",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "dyad" => Some(UnitKind::Dyad),
            "group" => Some(UnitKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_type_parses_wire_names() {
        for t in DecisionType::ALL {
            assert_eq!(DecisionType::parse(t.as_str()), Some(t));
            let json = serde_json::to_value(t).expect("serialize");
            assert_eq!(json, Value::String(t.as_str().to_string()));
        }
        assert_eq!(DecisionType::parse("type_z"), None);
        assert_eq!(DecisionType::parse("AYA_MESSAGE"), None);
    }

    #[test]
    fn unit_kind_defaults_to_dyad() {
        assert_eq!(UnitKind::default(), UnitKind::Dyad);
        assert_eq!(UnitKind::parse("group"), Some(UnitKind::Group));
        assert_eq!(UnitKind::parse("team"), None);
    }
}
