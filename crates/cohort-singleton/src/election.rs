// Singleton election policies
// Choose the primary among candidates ordered by group membership

use std::{fmt::Debug, sync::Arc};

use rand::seq::IndexedRandom;

use cohort_common::Node;
use cohort_core::Configuration;

use crate::SingletonError;

/// Chooses the primary node among the candidates of a singleton.
///
/// Every candidate evaluates the policy on its own, so a policy must return
/// the same node for the same ordered candidates on every node.
pub trait ElectionPolicy: Debug + Send + Sync + 'static {
    /// Elect a node from `candidates`, which are in membership order.
    /// Returns `None` only when there are no candidates.
    fn elect(&self, candidates: &[Node]) -> Option<Node>;

    /// Whether identical candidates always yield the identical node
    fn is_deterministic(&self) -> bool {
        true
    }
}

/// Elects preferred nodes first, then the candidate at a fixed position.
///
/// A negative position counts from the end; positions wrap around the
/// candidate count.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimpleElectionPolicy {
    position: i64,
    preferences: Vec<Node>,
}

impl SimpleElectionPolicy {
    pub fn new(position: i64) -> Self {
        Self {
            position,
            preferences: Vec::new(),
        }
    }

    /// Prefer the listed nodes, in order, whenever one of them is a candidate
    pub fn with_preferences(mut self, preferences: impl IntoIterator<Item = Node>) -> Self {
        self.preferences = preferences.into_iter().collect();
        self
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn preferences(&self) -> &[Node] {
        &self.preferences
    }
}

impl ElectionPolicy for SimpleElectionPolicy {
    fn elect(&self, candidates: &[Node]) -> Option<Node> {
        if let Some(preferred) = self
            .preferences
            .iter()
            .find(|preferred| candidates.contains(preferred))
        {
            return Some(preferred.clone());
        }

        let size = i64::try_from(candidates.len()).ok().filter(|size| *size > 0)?;
        let index = usize::try_from(self.position.rem_euclid(size)).ok()?;
        candidates.get(index).cloned()
    }
}

/// Elects a random candidate. Not usable for distributed singletons.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomElectionPolicy;

impl ElectionPolicy for RandomElectionPolicy {
    fn elect(&self, candidates: &[Node]) -> Option<Node> {
        candidates.choose(&mut rand::rng()).cloned()
    }

    fn is_deterministic(&self) -> bool {
        false
    }
}

/// Build the election policy named by `cohort.singleton.election_policy`
pub fn election_policy_from_configuration(
    config: &Configuration,
) -> Result<Arc<dyn ElectionPolicy>, SingletonError> {
    match config.election_policy().as_str() {
        "simple" => Ok(Arc::new(
            SimpleElectionPolicy::new(config.election_position())
                .with_preferences(config.election_preferences().into_iter().map(Node::new)),
        )),
        "random" => Ok(Arc::new(RandomElectionPolicy)),
        other => Err(SingletonError::Configuration(format!(
            "unknown election policy '{other}'"
        ))),
    }
}
