//! Per-environment shaping: how observations, actions and rewards are formed

use tracing::debug;

use traffic_rl_core::Result;

use crate::action::{ActionDispatcher, Dispatch, DispatchMode, TrafficAction};
use crate::env::EpisodeState;
use crate::observation::{Layout, ObservationBuilder, TrafficObservation};
use crate::params::{BottleneckParams, MergeParams};
use crate::reward::{RewardEvaluator, RewardOutcome};
use crate::scenario::Scenario;
use crate::simulation::{Injection, SimError, SimResult, SimulationAdapter};

/// Route re-injected vehicles follow
const REINJECTION_ROUTE: &str = "route1";

/// What distinguishes one traffic environment from another.
///
/// The environment owns the simulator and the episode state and calls into
/// the strategy at fixed points of every step.
pub trait ShapingStrategy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Observation layout
    fn observer(&self) -> &ObservationBuilder;

    /// Action reader
    fn dispatcher(&self) -> &ActionDispatcher;

    /// Reward terms
    fn evaluator(&self) -> &RewardEvaluator;

    /// Observation of the current state
    fn build_observation(&self, state: &EpisodeState) -> TrafficObservation {
        self.observer().build(&state.registry, &state.tracker)
    }

    /// Commands for `action` against the slots the agent last observed
    fn dispatch_action(&self, action: &TrafficAction, state: &EpisodeState) -> Result<Dispatch> {
        self.dispatcher().dispatch(action, &state.registry, &state.tracker)
    }

    /// Reward of the post-step state
    fn evaluate_reward(&self, state: &EpisodeState, dispatch: &Dispatch, failed: bool) -> RewardOutcome {
        self.evaluator().evaluate(&state.registry, &state.tracker, dispatch, failed)
    }

    /// Extra simulator work after the side control loop has run
    fn after_step(&self, _state: &mut EpisodeState, _adapter: &mut SimulationAdapter) -> SimResult<()> {
        Ok(())
    }
}

/// Acceleration control on the merge network
#[derive(Debug, Clone)]
pub struct MergeStrategy {
    observer: ObservationBuilder,
    dispatcher: ActionDispatcher,
    evaluator: RewardEvaluator,
}

impl MergeStrategy {
    /// Strategy for `scenario`
    #[must_use]
    pub fn new(params: &MergeParams, scenario: &Scenario) -> Self {
        Self {
            observer: ObservationBuilder::new(Layout::Merge, scenario, params.num_rl),
            dispatcher: ActionDispatcher::new(DispatchMode::Accel, params.max_accel, params.max_decel),
            evaluator: RewardEvaluator::merge(params.target_velocity),
        }
    }
}

impl ShapingStrategy for MergeStrategy {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn observer(&self) -> &ObservationBuilder {
        &self.observer
    }

    fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    fn evaluator(&self) -> &RewardEvaluator {
        &self.evaluator
    }
}

/// Acceleration and lane-change control through the toll bottleneck, in
/// single- and multi-agent form
#[derive(Debug, Clone)]
pub struct BottleneckStrategy {
    name: &'static str,
    observer: ObservationBuilder,
    dispatcher: ActionDispatcher,
    evaluator: RewardEvaluator,
    add_rl_if_exit: bool,
    entry_lanes: usize,
}

impl BottleneckStrategy {
    /// One observation and one reward for the whole system
    #[must_use]
    pub fn new(params: &BottleneckParams, scenario: &Scenario, num_rl: usize, sim_step: f64) -> Self {
        Self::build(
            "bottleneck",
            Layout::Bottleneck,
            DispatchMode::AccelLaneChange,
            RewardEvaluator::bottleneck(params.target_velocity),
            params,
            scenario,
            num_rl,
            sim_step,
        )
    }

    /// One observation and one reward per slot
    #[must_use]
    pub fn multi_agent(params: &BottleneckParams, scenario: &Scenario, num_rl: usize, sim_step: f64) -> Self {
        Self::build(
            "multi_agent_bottleneck",
            Layout::MultiAgent,
            DispatchMode::MultiAgent,
            RewardEvaluator::multi_agent(params.target_velocity),
            params,
            scenario,
            num_rl,
            sim_step,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        name: &'static str,
        layout: Layout,
        mode: DispatchMode,
        evaluator: RewardEvaluator,
        params: &BottleneckParams,
        scenario: &Scenario,
        num_rl: usize,
        sim_step: f64,
    ) -> Self {
        Self {
            name,
            observer: ObservationBuilder::new(layout, scenario, num_rl),
            dispatcher: ActionDispatcher::new(mode, params.max_accel, params.max_decel)
                .with_cooldown(params.cooldown_steps(sim_step)),
            evaluator,
            add_rl_if_exit: params.add_rl_if_exit,
            entry_lanes: scenario.edges.first().map_or(1, |e| e.lanes),
        }
    }

    /// Put roster vehicles that left the network back at its start
    fn reinject_missing(&self, state: &EpisodeState, adapter: &mut SimulationAdapter) -> SimResult<()> {
        if state.registry.num_rl() == state.roster.len() {
            return Ok(());
        }
        for (index, id) in state.roster.iter().enumerate() {
            if state.registry.contains(id) {
                continue;
            }
            let injection = Injection {
                id: id.clone(),
                route: REINJECTION_ROUTE.to_string(),
                lane: index % self.entry_lanes.max(1),
                position: 0.0,
                speed: None,
            };
            match adapter.inject(&injection) {
                Ok(()) => debug!(vehicle = %id, lane = injection.lane, "re-injected"),
                // retried on the next step
                Err(SimError::DepartureBlocked { .. }) => {
                    debug!(vehicle = %id, lane = injection.lane, "re-injection blocked, retrying next step");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ShapingStrategy for BottleneckStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    fn observer(&self) -> &ObservationBuilder {
        &self.observer
    }

    fn dispatcher(&self) -> &ActionDispatcher {
        &self.dispatcher
    }

    fn evaluator(&self) -> &RewardEvaluator {
        &self.evaluator
    }

    fn after_step(&self, state: &mut EpisodeState, adapter: &mut SimulationAdapter) -> SimResult<()> {
        if self.add_rl_if_exit {
            self.reinject_missing(state, adapter)?;
        }
        Ok(())
    }
}
