//! Random acceleration policy on the merge network

use traffic_rl_core::logging::init_tracing;
use traffic_rl_core::{Environment, EnvironmentConfig, RandomPolicy};
use traffic_rl_env::{Experiment, Inflow, KinematicSimulator, Scenario, TrafficEnv, VehicleKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // One controlled vehicle for every four humans on the highway
    let sim = KinematicSimulator::new(Scenario::merge())
        .with_inflow(Inflow {
            prefix: "human".to_string(),
            kind: VehicleKind::Human,
            period: 2,
            speed: 20.0,
        })
        .with_inflow(Inflow {
            prefix: "rl".to_string(),
            kind: VehicleKind::Rl,
            period: 8,
            speed: 20.0,
        });

    let config = EnvironmentConfig::default()
        .with_param("max_accel", 3.0)
        .with_param("max_decel", 3.0)
        .with_param("target_velocity", 25.0)
        .with_param("num_rl", 5)
        .with_max_steps(300)
        .with_seed(42);
    let env = TrafficEnv::merge(&config, Box::new(sim))?;
    let policy = RandomPolicy::new(env.action_space());

    let mut experiment = Experiment::new(env);
    let returns = experiment.run_with_policy(&policy, 5, 300, false).await?;

    for (run, total) in returns.iter().enumerate() {
        println!("Run {}: total reward = {total:.3}", run + 1);
    }
    Ok(())
}
