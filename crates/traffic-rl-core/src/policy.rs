//! Policy abstractions for action selection

use async_trait::async_trait;

use crate::{Action, ActionSpace, Observation};

/// Core policy trait for selecting actions
#[async_trait]
pub trait Policy: Send + Sync {
    /// Observation type
    type Observation: Observation;
    /// Action type
    type Action: Action;

    /// Select an action given an observation
    async fn act(&self, observation: &Self::Observation) -> crate::Result<Self::Action>;
}

/// Random policy that always selects random actions
pub struct RandomPolicy<O, A> {
    action_space: Box<dyn ActionSpace<Action = A>>,
    _observation: std::marker::PhantomData<fn() -> O>,
}

impl<O, A> RandomPolicy<O, A> {
    /// Create a new random policy over a boxed action space
    pub fn new(action_space: Box<dyn ActionSpace<Action = A>>) -> Self {
        Self {
            action_space,
            _observation: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<O, A> Policy for RandomPolicy<O, A>
where
    O: Observation,
    A: Action,
{
    type Observation = O;
    type Action = A;

    async fn act(&self, _observation: &Self::Observation) -> crate::Result<Self::Action> {
        Ok(self.action_space.sample())
    }
}

/// Policy that replays the same action every step
pub struct ConstantPolicy<O, A> {
    action: A,
    _observation: std::marker::PhantomData<fn() -> O>,
}

impl<O, A> ConstantPolicy<O, A> {
    /// Create a policy that always returns `action`
    pub fn new(action: A) -> Self {
        Self {
            action,
            _observation: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<O, A> Policy for ConstantPolicy<O, A>
where
    O: Observation,
    A: Action,
{
    type Observation = O;
    type Action = A;

    async fn act(&self, _observation: &Self::Observation) -> crate::Result<Self::Action> {
        Ok(self.action.clone())
    }
}
