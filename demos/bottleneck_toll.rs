//! Toll booth bottleneck with controlled vehicles that re-enter after exiting

use traffic_rl_core::logging::init_tracing;
use traffic_rl_core::{Environment, EnvironmentConfig, ObservationSpace, RandomPolicy};
use traffic_rl_env::{
    Experiment, Inflow, KinematicSimulator, ReturnStats, Scenario, SpawnSpec, TrafficEnv, VehicleKind,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let scaling = 1;
    let mut sim = KinematicSimulator::new(Scenario::bottleneck(scaling)).with_inflow(Inflow {
        prefix: "human".to_string(),
        kind: VehicleKind::Human,
        period: 1,
        speed: 15.0,
    });
    for lane in 0..4 {
        sim.spawn(SpawnSpec::new(format!("rl_{lane}"), VehicleKind::Rl, "1", lane, 5.0, 10.0));
    }

    let config = EnvironmentConfig::default()
        .with_param("env", "bottleneck")
        .with_param("scaling", scaling)
        .with_param("max_accel", 3.0)
        .with_param("max_decel", 3.0)
        .with_param("lane_change_duration", 5.0)
        .with_param("disable_tb", false)
        .with_param("disable_ramp_metering", false)
        .with_param("target_velocity", 40.0)
        .with_param("add_rl_if_exit", true)
        .with_max_steps(500)
        .with_seed(7);
    let env = TrafficEnv::from_config(&config, Box::new(sim))?;
    println!(
        "{} controlled slots, observation length {}",
        env.num_rl(),
        env.observation_space().shape()[0]
    );
    let policy = RandomPolicy::new(env.action_space());

    let mut experiment = Experiment::new(env);
    let returns = experiment.run_with_policy(&policy, 3, 500, false).await?;

    let stats = ReturnStats::of(&returns);
    println!("Mean return {:.3} (std {:.3})", stats.mean, stats.std_dev);
    Ok(())
}
