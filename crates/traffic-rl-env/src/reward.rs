//! Reward terms and their per-environment combinations

use traffic_rl_core::Reward;

use crate::action::Dispatch;
use crate::tracker::ControlledAgentTracker;
use crate::vehicles::VehicleRegistry;

/// `-((mean - target) / target)^2` over every vehicle, or over the vehicles
/// on `edges` when given. Zero with no vehicles or a non-positive target.
#[must_use]
pub fn desired_velocity(registry: &VehicleRegistry, target: f64, edges: Option<&[String]>) -> f64 {
    let speeds: Vec<f64> = registry
        .iter()
        .filter(|v| edges.map_or(true, |es| es.iter().any(|e| v.state.edge.is(e))))
        .map(|v| v.state.speed)
        .collect();
    if speeds.is_empty() || target <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = speeds.iter().sum::<f64>() / speeds.len() as f64;
    -((mean - target) / target).powi(2)
}

/// `gain * Σ speed` of the listed vehicles; vehicles already gone count 0
#[must_use]
pub fn rl_progress<'a>(registry: &VehicleRegistry, ids: impl IntoIterator<Item = &'a str>, gain: f64) -> f64 {
    gain * ids
        .into_iter()
        .filter_map(|id| registry.speed(id).ok())
        .sum::<f64>()
}

/// `weight * Σ min((t - t_min) / t_min, 0)` over the listed vehicles with a
/// leader and a positive speed, `t` being the time headway
#[must_use]
pub fn headway_penalty<'a>(
    registry: &VehicleRegistry,
    ids: impl IntoIterator<Item = &'a str>,
    t_min: f64,
    weight: f64,
) -> f64 {
    let total: f64 = ids
        .into_iter()
        .filter_map(|id| registry.get(id).ok())
        .filter(|v| v.leader.is_some() && v.state.speed > 0.0)
        .map(|v| {
            let t = (v.headway / v.state.speed).max(0.0);
            ((t - t_min) / t_min).min(0.0)
        })
        .sum();
    weight * total
}

/// Time-headway regularisation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadwayTerm {
    /// Smallest acceptable time headway, seconds
    pub t_min: f64,
    /// Term weight
    pub weight: f64,
}

impl Default for HeadwayTerm {
    fn default() -> Self {
        Self {
            t_min: 1.0,
            weight: 0.1,
        }
    }
}

/// Total reward and, for multi-agent environments, one reward per slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RewardOutcome {
    /// System reward
    pub total: Reward,
    /// Per-slot rewards; empty for single-agent environments
    pub per_agent: Vec<Reward>,
}

/// Weighted sum of reward terms
#[derive(Debug, Clone)]
pub struct RewardEvaluator {
    target_velocity: f64,
    edges: Option<Vec<String>>,
    progress_gain: Option<f64>,
    lane_change_gain: Option<f64>,
    headway: Option<HeadwayTerm>,
    per_agent: bool,
}

impl RewardEvaluator {
    /// Speed deviation plus headway regularisation
    #[must_use]
    pub fn merge(target_velocity: f64) -> Self {
        Self {
            target_velocity,
            edges: None,
            progress_gain: None,
            lane_change_gain: None,
            headway: Some(HeadwayTerm::default()),
            per_agent: false,
        }
    }

    /// Speed deviation, controlled progress and lane-change penalty
    #[must_use]
    pub fn bottleneck(target_velocity: f64) -> Self {
        Self {
            target_velocity,
            edges: None,
            progress_gain: Some(0.1),
            lane_change_gain: Some(1.0),
            headway: None,
            per_agent: false,
        }
    }

    /// Bottleneck terms with the speed deviation measured on the narrowing
    /// edges, and one reward per slot
    #[must_use]
    pub fn multi_agent(target_velocity: f64) -> Self {
        Self {
            edges: Some(vec!["4".to_string(), "5".to_string()]),
            per_agent: true,
            ..Self::bottleneck(target_velocity)
        }
    }

    /// Override the headway term
    #[must_use]
    pub fn with_headway(mut self, headway: Option<HeadwayTerm>) -> Self {
        self.headway = headway;
        self
    }

    /// Reward for the post-step state; exactly zero after a failure
    #[must_use]
    pub fn evaluate(
        &self,
        registry: &VehicleRegistry,
        tracker: &ControlledAgentTracker,
        dispatch: &Dispatch,
        failed: bool,
    ) -> RewardOutcome {
        let per_agent_len = if self.per_agent { tracker.num_rl() } else { 0 };
        if failed {
            return RewardOutcome {
                total: Reward(0.0),
                per_agent: vec![Reward(0.0); per_agent_len],
            };
        }

        let global = desired_velocity(registry, self.target_velocity, self.edges.as_deref());
        let headway = self
            .headway
            .map_or(0.0, |h| {
                headway_penalty(registry, tracker.occupied().map(|(_, id)| id), h.t_min, h.weight)
            });
        let lane_change_gain = self.lane_change_gain.unwrap_or(0.0);

        if self.per_agent {
            let progress_gain = self.progress_gain.unwrap_or(0.0);
            let per_agent: Vec<Reward> = (0..tracker.num_rl())
                .map(|slot| match tracker.occupant(slot) {
                    None => Reward(0.0),
                    Some(id) => {
                        let progress = rl_progress(registry, [id], progress_gain);
                        let penalty = dispatch
                            .requested
                            .get(slot)
                            .map_or(0.0, |d| if *d == 0 { 0.0 } else { lane_change_gain });
                        Reward(global + progress - penalty)
                    }
                })
                .collect();
            let progress = rl_progress(registry, tracker.occupied().map(|(_, id)| id), progress_gain);
            #[allow(clippy::cast_precision_loss)]
            let penalty = lane_change_gain * dispatch.lane_change_requests(tracker) as f64;
            return RewardOutcome {
                total: Reward(global + progress - penalty + headway),
                per_agent,
            };
        }

        let progress = self
            .progress_gain
            .map_or(0.0, |gain| rl_progress(registry, registry.rl_ids(), gain));
        #[allow(clippy::cast_precision_loss)]
        let penalty = lane_change_gain * dispatch.lane_change_requests(tracker) as f64;
        RewardOutcome {
            total: Reward(global + progress - penalty + headway),
            per_agent: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicles::testing::snapshot;
    use crate::vehicles::VehicleKind;
    use approx::assert_relative_eq;

    fn world() -> (VehicleRegistry, ControlledAgentTracker) {
        let mut registry = VehicleRegistry::new(1);
        registry.refresh(
            vec![
                snapshot("rl_0", VehicleKind::Rl, "4", 310.0, 10.0, 0),
                snapshot("h0", VehicleKind::Human, "4", 318.0, 20.0, 0),
                snapshot("h1", VehicleKind::Human, "1", 50.0, 30.0, 0),
            ],
            0,
        );
        let mut tracker = ControlledAgentTracker::new(2);
        tracker.sync(&mut registry);
        (registry, tracker)
    }

    #[test]
    fn velocity_term_is_zero_without_vehicles() {
        let registry = VehicleRegistry::new(1);
        assert_eq!(desired_velocity(&registry, 20.0, None), 0.0);
    }

    #[test]
    fn velocity_term_is_squared_relative_deviation() {
        let (registry, _) = world();
        assert_relative_eq!(desired_velocity(&registry, 40.0, None), -0.25);
        let edges = vec!["4".to_string()];
        assert_relative_eq!(desired_velocity(&registry, 30.0, Some(&edges)), -0.25);
    }

    #[test]
    fn headway_term_penalises_short_time_gaps() {
        let (registry, _) = world();
        // rl_0: gap 3 m at 10 m/s
        assert_relative_eq!(headway_penalty(&registry, ["rl_0"], 1.0, 0.1), 0.1 * (0.3 - 1.0));
        assert_eq!(headway_penalty(&registry, std::iter::empty(), 1.0, 0.1), 0.0);
    }

    #[test]
    fn failure_zeroes_every_reward() {
        let (registry, tracker) = world();
        let evaluator = RewardEvaluator::multi_agent(20.0);
        let outcome = evaluator.evaluate(&registry, &tracker, &Dispatch::default(), true);
        assert_eq!(outcome.total, Reward(0.0));
        assert_eq!(outcome.per_agent, vec![Reward(0.0); 2]);
    }

    #[test]
    fn bottleneck_combines_progress_and_penalty() {
        let (registry, tracker) = world();
        let dispatch = Dispatch {
            commands: Vec::new(),
            requested: vec![1, 0, -1],
        };
        let outcome = RewardEvaluator::bottleneck(20.0).evaluate(&registry, &tracker, &dispatch, false);
        // only slot 0 is occupied, so only its request is penalised
        assert_relative_eq!(outcome.total.0, 0.0 + 1.0 - 1.0);
        assert!(outcome.per_agent.is_empty());
    }

    #[test]
    fn multi_agent_rewards_are_per_slot() {
        let (registry, tracker) = world();
        let dispatch = Dispatch {
            commands: Vec::new(),
            requested: vec![1, 0],
        };
        let outcome = RewardEvaluator::multi_agent(15.0).evaluate(&registry, &tracker, &dispatch, false);
        // edges 4 and 5 hold rl_0 and h0, mean 15
        assert_relative_eq!(outcome.per_agent[0].0, 1.0 - 1.0);
        assert_eq!(outcome.per_agent[1], Reward(0.0));
        assert_relative_eq!(outcome.total.0, 1.0 - 1.0);
    }

    #[test]
    fn empty_slot_requests_are_not_penalised() {
        let (registry, tracker) = world();
        let dispatch = Dispatch {
            commands: Vec::new(),
            requested: vec![0, 1, 1],
        };
        let outcome = RewardEvaluator::bottleneck(0.0).evaluate(&registry, &tracker, &dispatch, false);
        // rl_0 progress only; slots 1 and 2 hold nobody
        assert_relative_eq!(outcome.total.0, 1.0);
    }

    #[test]
    fn headway_ignores_untracked_controlled_vehicles() {
        let mut registry = VehicleRegistry::new(1);
        registry.refresh(
            vec![
                snapshot("rl_0", VehicleKind::Rl, "4", 100.0, 10.0, 0),
                snapshot("rl_1", VehicleKind::Rl, "4", 310.0, 10.0, 0),
                snapshot("h0", VehicleKind::Human, "4", 318.0, 10.0, 0),
            ],
            0,
        );
        let mut tracker = ControlledAgentTracker::new(1);
        tracker.sync(&mut registry);
        assert_eq!(tracker.slot_of("rl_1"), None);
        // every vehicle at the target speed, rl_0 with a long gap
        let outcome = RewardEvaluator::merge(10.0).evaluate(&registry, &tracker, &Dispatch::default(), false);
        assert_eq!(outcome.total, Reward(0.0));
    }

    #[test]
    fn rewards_are_not_floored() {
        let (registry, tracker) = world();
        let outcome = RewardEvaluator::merge(100.0).evaluate(&registry, &tracker, &Dispatch::default(), false);
        assert!(outcome.total.0 < 0.0);
    }
}
