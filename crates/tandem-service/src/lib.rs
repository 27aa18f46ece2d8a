//! Request-facing services of tandem.
//!
//! Each service validates its raw JSON payload, consults the policy where a
//! decision or reward is needed, and writes through an [`EntityStore`]. The
//! store and policy are injected at construction and shared by every
//! request; services keep no other state.

pub mod api;
mod decision;
mod error;
mod outcome;
mod registration;
pub mod sink;
pub mod validate;

use std::sync::Arc;

use tandem_core::{Policy, PolicyParameters};
use tandem_store::{EntityStore, StoreError};

pub use api::{Api, ApiResponse, Operation};
pub use decision::{DecisionResponse, DecisionService};
pub use error::{ServiceError, INTERNAL_MESSAGE};
pub use outcome::OutcomeService;
pub use registration::RegistrationService;
pub use sink::{DecisionSink, HttpForwarder, NoopSink};
pub use validate::RequestSchema;

#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Reject outcomes for which no decision was stored.
    pub require_prior_decision: bool,
    pub schema: RequestSchema,
}

/// The three services wired to one store and one policy.
#[derive(Clone)]
pub struct Services {
    pub registration: RegistrationService,
    pub decision: DecisionService,
    pub outcome: OutcomeService,
    store: Arc<dyn EntityStore>,
    policy: Arc<dyn Policy>,
}

impl Services {
    pub fn new(
        store: Arc<dyn EntityStore>,
        policy: Arc<dyn Policy>,
        sink: Arc<dyn DecisionSink>,
        options: ServiceOptions,
    ) -> Self {
        let schema = Arc::new(options.schema);
        Self {
            registration: RegistrationService::new(Arc::clone(&store)),
            decision: DecisionService::new(
                Arc::clone(&store),
                Arc::clone(&policy),
                sink,
                Arc::clone(&schema),
            ),
            outcome: OutcomeService::new(
                Arc::clone(&store),
                Arc::clone(&policy),
                schema,
                options.require_prior_decision,
            ),
            store,
            policy,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<dyn Policy> {
        &self.policy
    }
}

/// Stores the policy's priors as the first snapshot. Returns `false` and
/// writes nothing when a snapshot already exists.
pub fn seed_priors(store: &dyn EntityStore, policy: &dyn Policy) -> Result<bool, StoreError> {
    if store.latest_parameters()?.is_some() {
        return Ok(false);
    }
    let snapshot = PolicyParameters::new(policy.priors());
    tracing::info!(policy = policy.name(), snapshot = %snapshot.id, "seeding prior parameters");
    store.insert_parameters(snapshot)?;
    Ok(true)
}
