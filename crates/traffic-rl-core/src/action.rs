//! Action representations and action spaces

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for actions in an RL environment
pub trait Action: Clone + Debug + Send + Sync {
    /// Convert action to a vector representation
    fn to_vec(&self) -> Vec<f64>;
}

/// Trait for defining action spaces
pub trait ActionSpace: Send + Sync {
    /// The type of actions in this space
    type Action: Action;

    /// Sample a random action from the space
    fn sample(&self) -> Self::Action;

    /// Check if an action is valid within this space
    fn contains(&self, action: &Self::Action) -> bool;

    /// Get the dimensionality of the action space
    fn dim(&self) -> Option<usize>;
}

/// Continuous action (e.g., for continuous control)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContinuousAction(pub Vec<f64>);

impl Action for ContinuousAction {
    fn to_vec(&self) -> Vec<f64> {
        self.0.clone()
    }
}

/// Continuous action space (box)
#[derive(Debug, Clone)]
pub struct ContinuousSpace {
    /// Lower bounds for each dimension
    pub low: Vec<f64>,
    /// Upper bounds for each dimension
    pub high: Vec<f64>,
}

impl ContinuousSpace {
    /// Create a new continuous action space
    pub fn new(low: Vec<f64>, high: Vec<f64>) -> crate::Result<Self> {
        if low.len() != high.len() {
            return Err(crate::EnvError::DimensionMismatch {
                expected: low.len(),
                actual: high.len(),
            });
        }
        Ok(Self { low, high })
    }

    /// Repeat a per-agent `(low, high)` block `n` times
    pub fn repeated(block_low: &[f64], block_high: &[f64], n: usize) -> crate::Result<Self> {
        Self::new(block_low.repeat(n), block_high.repeat(n))
    }

    /// Sample a raw vector inside the bounds
    #[must_use]
    pub fn sample_vec(&self) -> Vec<f64> {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        self.low
            .iter()
            .zip(&self.high)
            .map(|(l, h)| if l < h { rng.gen_range(*l..*h) } else { *l })
            .collect()
    }
}

impl ActionSpace for ContinuousSpace {
    type Action = ContinuousAction;

    fn sample(&self) -> Self::Action {
        ContinuousAction(self.sample_vec())
    }

    fn contains(&self, action: &Self::Action) -> bool {
        action.0.len() == self.low.len()
            && action
                .0
                .iter()
                .zip(&self.low)
                .zip(&self.high)
                .all(|((x, l), h)| x >= l && x <= h)
    }

    fn dim(&self) -> Option<usize> {
        Some(self.low.len())
    }
}
