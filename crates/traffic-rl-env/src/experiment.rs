//! Run/reset/step loop over an environment with return bookkeeping

use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use traffic_rl_core::{ConstantPolicy, Environment, Policy, Result, TrackedEnvironment};

/// Turns the simulator's emission log into another format once a run is over
pub trait EmissionConverter: Send + Sync {
    /// Convert `emission_path`, returning where the result was written
    fn convert(&self, emission_path: &Path) -> Result<PathBuf>;
}

/// Mean and population standard deviation of per-run returns
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStats {
    /// Mean return
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl ReturnStats {
    /// Statistics of `returns`; NaN for an empty slice
    #[must_use]
    pub fn of(returns: &[f64]) -> Self {
        Self {
            mean: returns.mean(),
            std_dev: returns.population_std_dev(),
        }
    }
}

/// Drives an environment for a fixed number of runs and steps
pub struct Experiment<E: Environment> {
    env: TrackedEnvironment<E>,
    converter: Option<Box<dyn EmissionConverter>>,
}

impl<E> Experiment<E>
where
    E: Environment,
    E::Action: Default,
{
    /// Experiment over `env`
    pub fn new(env: E) -> Self {
        Self {
            env: TrackedEnvironment::new(env),
            converter: None,
        }
    }

    /// Hand the emission log to `converter` when asked to
    #[must_use]
    pub fn with_converter(mut self, converter: Box<dyn EmissionConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// The wrapped environment
    pub fn env(&self) -> &TrackedEnvironment<E> {
        &self.env
    }

    /// Run `num_runs` episodes of at most `num_steps` steps, applying
    /// `rl_actions` every step (the default action when `None`), and return
    /// the total reward of every run.
    pub async fn run(
        &mut self,
        num_runs: usize,
        num_steps: usize,
        rl_actions: Option<E::Action>,
        convert_to_csv: bool,
    ) -> Result<Vec<f64>> {
        let policy: ConstantPolicy<E::Observation, E::Action> =
            ConstantPolicy::new(rl_actions.unwrap_or_default());
        self.run_with_policy(&policy, num_runs, num_steps, convert_to_csv)
            .await
    }

    /// [`Experiment::run`] with actions chosen by `policy`
    pub async fn run_with_policy<P>(
        &mut self,
        policy: &P,
        num_runs: usize,
        num_steps: usize,
        convert_to_csv: bool,
    ) -> Result<Vec<f64>>
    where
        P: Policy<Observation = E::Observation, Action = E::Action>,
    {
        let mut returns = Vec::with_capacity(num_runs);

        for run in 0..num_runs {
            let (mut observation, _) = self.env.reset().await?;
            let mut total = 0.0;

            for _ in 0..num_steps {
                let action = policy.act(&observation).await?;
                let step = self.env.step(action).await?;
                total += step.reward.value();
                observation = step.observation;
                if step.done || step.truncated {
                    break;
                }
            }

            if let Some(episode) = self.env.episode_info() {
                info!(
                    run,
                    episode = %episode.id,
                    steps = episode.steps,
                    total_reward = episode.total_reward,
                    "run finished"
                );
            }
            returns.push(total);
        }

        let stats = ReturnStats::of(&returns);
        info!(mean = stats.mean, std_dev = stats.std_dev, runs = num_runs, "average return");

        let emission_path = self.env.emission_path();
        self.env.close().await?;

        if convert_to_csv {
            self.convert(emission_path)?;
        }
        Ok(returns)
    }

    fn convert(&self, emission_path: Option<PathBuf>) -> Result<()> {
        match (&self.converter, emission_path) {
            (Some(converter), Some(path)) => {
                let output = converter.convert(&path)?;
                info!(input = %path.display(), output = %output.display(), "emission log converted");
            }
            (None, _) => warn!("conversion requested but no emission converter is configured"),
            (_, None) => warn!("conversion requested but the simulator writes no emission log"),
        }
        Ok(())
    }
}
