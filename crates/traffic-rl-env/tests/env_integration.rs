use approx::assert_relative_eq;

use traffic_rl_env::{
    Environment, EnvironmentConfig, Inflow, KinematicSimulator, Reward, Scenario, SpawnSpec,
    TrafficAction, TrafficEnv, TrafficObservation, VehicleKind,
};

fn merge_config(num_rl: usize) -> EnvironmentConfig {
    EnvironmentConfig::default()
        .with_param("max_accel", 3.0)
        .with_param("max_decel", 3.0)
        .with_param("target_velocity", 25.0)
        .with_param("num_rl", num_rl)
        .with_seed(3)
}

fn bottleneck_config(env: &str) -> EnvironmentConfig {
    EnvironmentConfig::default()
        .with_param("env", env)
        .with_param("max_accel", 3.0)
        .with_param("max_decel", 3.0)
        .with_param("lane_change_duration", 5.0)
        .with_param("disable_tb", true)
        .with_param("disable_ramp_metering", true)
        .with_param("target_velocity", 20.0)
        .with_param("add_rl_if_exit", false)
        .with_seed(17)
}

fn single(obs: &TrafficObservation) -> Vec<f64> {
    obs.as_single().expect("single observation").to_vec()
}

#[tokio::test]
async fn merge_observation_fills_head_slot_once_a_vehicle_enters() {
    let sim = KinematicSimulator::new(Scenario::merge()).with_inflow(Inflow {
        prefix: "rl_flow".to_string(),
        kind: VehicleKind::Rl,
        period: 1,
        speed: 15.0,
    });
    let mut env = TrafficEnv::merge(&merge_config(5), Box::new(sim)).unwrap();

    let (obs, _) = env.reset().await.unwrap();
    let obs = single(&obs);
    assert_eq!(obs.len(), 25);
    assert!(obs.iter().all(|x| *x == 0.0));

    let step = env.step(TrafficAction::default()).await.unwrap();
    let obs = single(&step.observation);
    // no leader or follower: speed ratios against the limit, full-length gaps
    assert_relative_eq!(obs[0], 0.5);
    assert_relative_eq!(obs[1], 0.5);
    assert_relative_eq!(obs[2], 1.0);
    assert_relative_eq!(obs[3], 0.5);
    assert_relative_eq!(obs[4], 1.0);
    assert!(obs[5..].iter().all(|x| *x == 0.0));
}

#[tokio::test]
async fn merge_slots_survive_steps_and_refill_from_queue() {
    let sim = KinematicSimulator::new(Scenario::merge())
        .with_vehicle(SpawnSpec::new("rl_a", VehicleKind::Rl, "bottom", 0, 95.0, 10.0))
        .with_vehicle(SpawnSpec::new("rl_b", VehicleKind::Rl, "inflow_highway", 0, 30.0, 10.0))
        .with_vehicle(SpawnSpec::new("rl_c", VehicleKind::Rl, "inflow_highway", 0, 10.0, 10.0));
    let mut env = TrafficEnv::merge(&merge_config(2), Box::new(sim)).unwrap();
    env.reset().await.unwrap();

    let tracker = &env.state().tracker;
    assert_eq!(tracker.slot_of("rl_a"), Some(0));
    assert_eq!(tracker.slot_of("rl_b"), Some(1));
    assert_eq!(tracker.slot_of("rl_c"), None);

    // rl_a drives off the end of the network
    env.step(TrafficAction::Flat(vec![0.0, 0.0])).await.unwrap();
    let tracker = &env.state().tracker;
    assert_eq!(tracker.slot_of("rl_a"), None);
    assert_eq!(tracker.slot_of("rl_b"), Some(1));
    assert_eq!(tracker.slot_of("rl_c"), Some(0));

    env.step(TrafficAction::Flat(vec![0.0, 0.0])).await.unwrap();
    let tracker = &env.state().tracker;
    assert_eq!(tracker.slot_of("rl_b"), Some(1));
    assert_eq!(tracker.slot_of("rl_c"), Some(0));
}

#[tokio::test]
async fn toll_signal_is_pushed_only_when_it_changes() {
    let sim = KinematicSimulator::new(Scenario::bottleneck(1))
        .with_vehicle(SpawnSpec::new("h0", VehicleKind::Human, "1", 0, 60.0, 0.0));
    let probe = sim.probe();
    let config = bottleneck_config("bottleneck").with_param("disable_tb", false);
    let mut env = TrafficEnv::from_config(&config, Box::new(sim)).unwrap();
    env.reset().await.unwrap();

    for _ in 0..3 {
        env.step(TrafficAction::default()).await.unwrap();
    }

    // held on the first step without touching the signal, then stopped
    let pushes = probe.snapshot().signal_pushes;
    assert_eq!(
        pushes,
        vec![
            ("2".to_string(), "GGGG".to_string()),
            ("2".to_string(), "rGGG".to_string()),
        ]
    );
    let toll = env.state().side_control.as_ref().and_then(|s| s.toll()).unwrap();
    assert!(toll.zone().is_holding("h0"));
}

#[tokio::test]
async fn multi_agent_rewards_follow_slots() {
    let sim = KinematicSimulator::new(Scenario::bottleneck(1))
        .with_vehicle(SpawnSpec::new("rl_0", VehicleKind::Rl, "4", 0, 10.0, 10.0))
        .with_vehicle(SpawnSpec::new("rl_1", VehicleKind::Rl, "4", 1, 10.0, 10.0));
    let config = bottleneck_config("multi_agent_bottleneck").with_param("num_rl", 3);
    let mut env = TrafficEnv::from_config(&config, Box::new(sim)).unwrap();

    let (obs, _) = env.reset().await.unwrap();
    assert_eq!(obs.as_multi().map(<[_]>::len), Some(3));

    let action = TrafficAction::PerAgent(vec![vec![0.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]]);
    let step = env.step(action).await.unwrap();

    // speed term -((10 - 20) / 20)^2, progress 0.1 * 10, lane change 1.0
    assert_eq!(step.agent_rewards.len(), 3);
    assert_relative_eq!(step.agent_rewards[0].value(), 0.75);
    assert_relative_eq!(step.agent_rewards[1].value(), -0.25);
    assert_eq!(step.agent_rewards[2], Reward(0.0));
    assert_relative_eq!(step.reward.value(), -0.25 + 2.0 - 1.0);
}

#[tokio::test]
async fn exited_controlled_vehicle_is_put_back_at_the_start() {
    let sim = KinematicSimulator::new(Scenario::bottleneck(1))
        .with_vehicle(SpawnSpec::new("rl_0", VehicleKind::Rl, "5", 0, 95.0, 10.0));
    let probe = sim.probe();
    let config = bottleneck_config("bottleneck").with_param("add_rl_if_exit", true);
    let mut env = TrafficEnv::from_config(&config, Box::new(sim)).unwrap();
    env.reset().await.unwrap();
    assert_eq!(env.num_rl(), 1);

    env.step(TrafficAction::Flat(vec![0.0, 0.0])).await.unwrap();
    let injections = probe.snapshot().injections;
    assert_eq!(injections.len(), 1);
    assert_eq!(injections[0].id, "rl_0");
    assert_eq!(injections[0].route, "route1");
    assert_eq!(injections[0].lane, 0);

    env.step(TrafficAction::Flat(vec![0.0, 0.0])).await.unwrap();
    assert_eq!(probe.snapshot().injections.len(), 1);
    assert_eq!(env.state().tracker.slot_of("rl_0"), Some(0));
    let vehicle = env.state().registry.get("rl_0").unwrap();
    assert!(vehicle.state.edge.is("1"));
}
