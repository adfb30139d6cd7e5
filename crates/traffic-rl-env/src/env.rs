//! The traffic environment: simulator, episode state and shaping strategy

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, trace};

use traffic_rl_core::{
    ActionSpace, Environment, EnvironmentConfig, ObservationSpace, Result, Step, StepInfo,
};

use crate::action::{TrafficAction, TrafficActionSpace};
use crate::observation::{TrafficObservation, TrafficObservationSpace};
use crate::params::{BottleneckParams, EnvKind, MergeParams};
use crate::scenario::Scenario;
use crate::side_control::SideControlLoop;
use crate::simulation::{SimulationAdapter, Simulator};
use crate::strategy::{BottleneckStrategy, MergeStrategy, ShapingStrategy};
use crate::tracker::ControlledAgentTracker;
use crate::vehicles::VehicleRegistry;

/// Everything that changes during an episode
#[derive(Debug)]
pub struct EpisodeState {
    /// Vehicles after the latest simulator step
    pub registry: VehicleRegistry,
    /// Slot assignment of controlled vehicles
    pub tracker: ControlledAgentTracker,
    /// Controlled vehicles present at reset, in readback order
    pub roster: Vec<String>,
    /// Toll booth and ramp meter, on the bottleneck network
    pub side_control: Option<SideControlLoop>,
    /// Source of every random draw of this environment
    pub rng: StdRng,
    /// Steps since reset
    pub step: usize,
}

/// Reinforcement learning environment over a traffic simulator
pub struct TrafficEnv {
    kind: EnvKind,
    scenario: Scenario,
    strategy: Box<dyn ShapingStrategy>,
    adapter: SimulationAdapter,
    state: EpisodeState,
    observation_space: TrafficObservationSpace,
    action_space: TrafficActionSpace,
    max_steps: Option<usize>,
}

impl TrafficEnv {
    /// Build the environment named by the `env` parameter
    pub fn from_config(config: &EnvironmentConfig, simulator: Box<dyn Simulator>) -> Result<Self> {
        match EnvKind::from_config(config)? {
            EnvKind::Merge => Self::merge(config, simulator),
            EnvKind::Bottleneck => Self::bottleneck(config, simulator),
            EnvKind::MultiAgentBottleneck => Self::multi_agent_bottleneck(config, simulator),
        }
    }

    /// Merge environment on the stock merge network
    pub fn merge(config: &EnvironmentConfig, simulator: Box<dyn Simulator>) -> Result<Self> {
        Self::new(EnvKind::Merge, config, Scenario::merge(), simulator)
    }

    /// Single-agent bottleneck on the stock toll network
    pub fn bottleneck(config: &EnvironmentConfig, simulator: Box<dyn Simulator>) -> Result<Self> {
        let scenario = Self::bottleneck_scenario(config)?;
        Self::new(EnvKind::Bottleneck, config, scenario, simulator)
    }

    /// Multi-agent bottleneck on the stock toll network
    pub fn multi_agent_bottleneck(config: &EnvironmentConfig, simulator: Box<dyn Simulator>) -> Result<Self> {
        let scenario = Self::bottleneck_scenario(config)?;
        Self::new(EnvKind::MultiAgentBottleneck, config, scenario, simulator)
    }

    fn bottleneck_scenario(config: &EnvironmentConfig) -> Result<Scenario> {
        let params = BottleneckParams::from_config(config)?;
        let mut scenario = Scenario::bottleneck(params.scaling);
        scenario.max_speed = params.max_speed;
        Ok(scenario)
    }

    /// Environment of `kind` on an arbitrary scenario.
    ///
    /// Fails with [`traffic_rl_core::EnvError::MissingParameter`] when a
    /// parameter the kind needs is absent.
    pub fn new(
        kind: EnvKind,
        config: &EnvironmentConfig,
        scenario: Scenario,
        simulator: Box<dyn Simulator>,
    ) -> Result<Self> {
        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let mut adapter = SimulationAdapter::new(simulator, config.sim_step);
        let mut registry = VehicleRegistry::new(scenario.num_lanes());

        let (strategy, side_control, num_rl): (Box<dyn ShapingStrategy>, _, _) = match kind {
            EnvKind::Merge => {
                let params = MergeParams::from_config(config)?;
                (Box::new(MergeStrategy::new(&params, &scenario)), None, params.num_rl)
            }
            EnvKind::Bottleneck | EnvKind::MultiAgentBottleneck => {
                let params = BottleneckParams::from_config(config)?;
                let num_rl = match params.num_rl {
                    Some(n) => n,
                    None => {
                        adapter.reset(&mut registry)?;
                        registry.num_rl()
                    }
                };
                let side_control = SideControlLoop::new(
                    params.scaling,
                    config.sim_step,
                    params.disable_tb,
                    params.disable_ramp_metering,
                    &mut rng,
                );
                let strategy: Box<dyn ShapingStrategy> = if kind == EnvKind::Bottleneck {
                    Box::new(BottleneckStrategy::new(&params, &scenario, num_rl, config.sim_step))
                } else {
                    Box::new(BottleneckStrategy::multi_agent(&params, &scenario, num_rl, config.sim_step))
                };
                (strategy, Some(side_control), num_rl)
            }
        };

        let observation_space = strategy.observer().space()?;
        let action_space = strategy.dispatcher().space(num_rl)?;
        info!(
            env = strategy.name(),
            scenario = %scenario.name,
            num_rl,
            observation_len = observation_space.len(),
            "created traffic environment"
        );

        Ok(Self {
            kind,
            scenario,
            strategy,
            adapter,
            state: EpisodeState {
                registry,
                tracker: ControlledAgentTracker::new(num_rl).with_position_order(config.sort_vehicles),
                roster: Vec::new(),
                side_control,
                rng,
                step: 0,
            },
            observation_space,
            action_space,
            max_steps: config.max_steps,
        })
    }

    /// Which environment this is
    #[must_use]
    pub fn kind(&self) -> EnvKind {
        self.kind
    }

    /// Network topology
    #[must_use]
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Current episode state
    #[must_use]
    pub fn state(&self) -> &EpisodeState {
        &self.state
    }

    /// Number of control slots
    #[must_use]
    pub fn num_rl(&self) -> usize {
        self.state.tracker.num_rl()
    }

    fn step_info(&self, crashed: bool) -> StepInfo {
        let mut info = StepInfo::default();
        info.insert("crash", crashed);
        info.insert("step", self.state.step);
        info.insert("controlled", self.state.tracker.active());
        info.insert("vehicles", self.state.registry.len());
        info
    }
}

#[async_trait]
impl Environment for TrafficEnv {
    type Observation = TrafficObservation;
    type Action = TrafficAction;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        Box::new(self.observation_space.clone())
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(self.action_space.clone())
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let state = &mut self.state;
        self.adapter.reset(&mut state.registry)?;
        state.tracker.reset();
        if let Some(side_control) = &mut state.side_control {
            side_control.reset(&mut state.rng);
        }
        state.roster = state.registry.rl_ids().map(str::to_string).collect();
        state.step = 0;
        state.tracker.sync(&mut state.registry);

        info!(
            env = self.strategy.name(),
            vehicles = state.registry.len(),
            controlled = state.tracker.active(),
            "episode reset"
        );
        let observation = self.strategy.build_observation(&self.state);
        Ok((observation, self.step_info(false)))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation>> {
        let dispatch = self.strategy.dispatch_action(&action, &self.state)?;
        self.adapter.apply(&dispatch.commands)?;

        let report = self.adapter.step(&mut self.state.registry)?;
        self.state.step += 1;

        if let Some(side_control) = &mut self.state.side_control {
            side_control.update(&self.state.registry, &mut self.adapter, &mut self.state.rng)?;
        }
        self.strategy.after_step(&mut self.state, &mut self.adapter)?;
        self.state.tracker.sync(&mut self.state.registry);

        let crashed = report.collision;
        let observation = self.strategy.build_observation(&self.state);
        let outcome = self.strategy.evaluate_reward(&self.state, &dispatch, crashed);

        let terminal = crashed || report.ended;
        let horizon = self.max_steps.is_some_and(|max| self.state.step >= max);
        trace!(
            step = self.state.step,
            reward = outcome.total.value(),
            crashed,
            "environment step"
        );

        Ok(Step {
            observation,
            reward: outcome.total,
            agent_rewards: outcome.per_agent,
            done: terminal || horizon,
            truncated: horizon && !terminal,
            info: self.step_info(crashed),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.adapter.close()?;
        Ok(())
    }

    fn emission_path(&self) -> Option<PathBuf> {
        self.adapter.emission_path()
    }
}

impl std::fmt::Debug for TrafficEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficEnv")
            .field("kind", &self.kind)
            .field("scenario", &self.scenario.name)
            .field("step", &self.state.step)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{KinematicSimulator, SpawnSpec};
    use crate::vehicles::VehicleKind;
    use traffic_rl_core::{EnvError, Observation, Reward};

    fn merge_config(num_rl: usize) -> EnvironmentConfig {
        EnvironmentConfig::default()
            .with_param("max_accel", 3.0)
            .with_param("max_decel", 3.0)
            .with_param("target_velocity", 25.0)
            .with_param("num_rl", num_rl)
            .with_seed(11)
    }

    #[tokio::test]
    async fn empty_merge_resets_to_zero_observation() {
        let sim = KinematicSimulator::new(Scenario::merge());
        let mut env = TrafficEnv::merge(&merge_config(5), Box::new(sim)).unwrap();
        let (obs, info) = env.reset().await.unwrap();
        assert_eq!(obs.shape(), vec![25]);
        assert!(obs.to_vec().iter().all(|x| *x == 0.0));
        assert!(!info.flag("crash"));
    }

    #[tokio::test]
    async fn missing_parameter_fails_construction() {
        let config = EnvironmentConfig::default().with_param("max_accel", 3.0);
        let sim = KinematicSimulator::new(Scenario::merge());
        let err = TrafficEnv::merge(&config, Box::new(sim)).unwrap_err();
        assert!(matches!(err, EnvError::MissingParameter(ref name) if name == "max_decel"));
    }

    #[tokio::test]
    async fn collision_zeroes_reward_and_flags_crash() {
        let sim = KinematicSimulator::new(Scenario::merge())
            .with_vehicle(SpawnSpec::new("h0", VehicleKind::Human, "inflow_highway", 0, 25.0, 0.0))
            .with_vehicle(SpawnSpec::new("rl_0", VehicleKind::Rl, "inflow_highway", 0, 0.0, 25.0));
        let mut env = TrafficEnv::merge(&merge_config(1), Box::new(sim)).unwrap();
        env.reset().await.unwrap();
        let step = env.step(TrafficAction::Flat(vec![3.0])).await.unwrap();
        assert!(step.info.flag("crash"));
        assert!(step.done);
        assert_eq!(step.reward, Reward(0.0));
    }

    #[tokio::test]
    async fn horizon_truncates() {
        let sim = KinematicSimulator::new(Scenario::merge())
            .with_vehicle(SpawnSpec::new("rl_0", VehicleKind::Rl, "inflow_highway", 0, 0.0, 1.0));
        let config = merge_config(1).with_max_steps(2);
        let mut env = TrafficEnv::merge(&config, Box::new(sim)).unwrap();
        env.reset().await.unwrap();
        let first = env.step(TrafficAction::default()).await.unwrap();
        assert!(!first.done);
        let second = env.step(TrafficAction::default()).await.unwrap();
        assert!(second.done && second.truncated);
    }

    #[tokio::test]
    async fn bottleneck_counts_initial_controlled_vehicles() {
        let sim = KinematicSimulator::new(Scenario::bottleneck(1))
            .with_vehicle(SpawnSpec::new("rl_0", VehicleKind::Rl, "1", 0, 0.0, 5.0))
            .with_vehicle(SpawnSpec::new("rl_1", VehicleKind::Rl, "1", 1, 0.0, 5.0))
            .with_vehicle(SpawnSpec::new("h0", VehicleKind::Human, "1", 2, 0.0, 5.0));
        let config = EnvironmentConfig::default()
            .with_param("env", "bottleneck")
            .with_param("max_accel", 3.0)
            .with_param("max_decel", 3.0)
            .with_param("lane_change_duration", 5.0)
            .with_param("disable_tb", false)
            .with_param("disable_ramp_metering", false)
            .with_param("target_velocity", 40.0)
            .with_param("add_rl_if_exit", false);
        let env = TrafficEnv::from_config(&config, Box::new(sim)).unwrap();
        assert_eq!(env.kind(), EnvKind::Bottleneck);
        assert_eq!(env.num_rl(), 2);
        assert_eq!(env.observation_space().shape(), vec![4 * 2 + 16 * 2 + 10]);
        assert_eq!(env.action_space().dim(), Some(4));
    }
}
