//! Bandit policies implementing the [`Policy`](tandem_core::Policy) contract.
//!
//! Both policies choose between two message arms (`0` = no intervention,
//! `1` = intervention), derive their state from the current and last three
//! observations, and reward clicks. Which one runs is decided once at startup
//! through [`PolicyKind`].

pub mod bernoulli;
pub mod epsilon;
pub mod error;
pub mod signals;

use serde::{Deserialize, Serialize};
use std::fmt;
use tandem_core::Policy;

pub use bernoulli::BernoulliPolicy;
pub use epsilon::EpsilonGreedyPolicy;
pub use error::BanditError;

/// Seed used when the configuration does not name one.
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Bernoulli,
    EpsilonGreedy,
}

impl PolicyKind {
    #[must_use]
    pub fn build(self, base_seed: u64) -> Box<dyn Policy> {
        match self {
            PolicyKind::Bernoulli => Box::new(BernoulliPolicy::new(base_seed)),
            PolicyKind::EpsilonGreedy => Box::new(EpsilonGreedyPolicy::new(base_seed)),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Bernoulli => "bernoulli",
            PolicyKind::EpsilonGreedy => "epsilon_greedy",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
