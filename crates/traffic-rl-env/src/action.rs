//! Turning agent actions into simulator commands

use serde::{Deserialize, Serialize};

use traffic_rl_core::{Action, ActionSpace, ContinuousAction, ContinuousSpace, EnvError, Result};

use crate::simulation::VehicleCommand;
use crate::tracker::ControlledAgentTracker;
use crate::vehicles::VehicleRegistry;

/// Action of a traffic environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrafficAction {
    /// One flat vector for every slot
    Flat(Vec<f64>),
    /// One `[accel, direction]` vector per slot
    PerAgent(Vec<Vec<f64>>),
}

impl Default for TrafficAction {
    /// No commands at all
    fn default() -> Self {
        Self::Flat(Vec::new())
    }
}

impl Action for TrafficAction {
    fn to_vec(&self) -> Vec<f64> {
        match self {
            Self::Flat(v) => v.clone(),
            Self::PerAgent(vs) => vs.concat(),
        }
    }
}

/// Box space over [`TrafficAction`]
#[derive(Debug, Clone)]
pub struct TrafficActionSpace {
    block: ContinuousSpace,
    flat: ContinuousSpace,
    num_rl: usize,
    per_agent: bool,
}

impl ActionSpace for TrafficActionSpace {
    type Action = TrafficAction;

    fn sample(&self) -> Self::Action {
        if self.per_agent {
            TrafficAction::PerAgent((0..self.num_rl).map(|_| self.block.sample_vec()).collect())
        } else {
            TrafficAction::Flat(self.flat.sample_vec())
        }
    }

    fn contains(&self, action: &Self::Action) -> bool {
        match (action, self.per_agent) {
            (TrafficAction::Flat(v), false) => self.flat.contains(&ContinuousAction(v.clone())),
            (TrafficAction::PerAgent(vs), true) => {
                vs.len() == self.num_rl
                    && vs
                        .iter()
                        .all(|v| self.block.contains(&ContinuousAction(v.clone())))
            }
            _ => false,
        }
    }

    fn dim(&self) -> Option<usize> {
        self.block.dim().map(|d| d * self.num_rl)
    }
}

/// How an action vector is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    /// One acceleration per slot
    Accel,
    /// Interleaved `[a0, d0, a1, d1, ...]`
    AccelLaneChange,
    /// One `[accel, direction]` pair per slot
    MultiAgent,
}

/// Commands for one step plus the lane-change requests they came from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    /// Commands to apply, in slot order
    pub commands: Vec<VehicleCommand>,
    /// Rounded direction requested for every slot present in the action,
    /// before cooldown and junction suppression; 0 for slots without an
    /// occupant
    pub requested: Vec<i8>,
}

impl Dispatch {
    /// Number of occupied slots that asked for a lane change
    #[must_use]
    pub fn lane_change_requests(&self, tracker: &ControlledAgentTracker) -> usize {
        tracker
            .occupied()
            .filter(|(slot, _)| self.requested.get(*slot).is_some_and(|d| *d != 0))
            .count()
    }
}

/// Maps action vectors onto the vehicles holding each slot
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    mode: DispatchMode,
    max_accel: f64,
    max_decel: f64,
    cooldown: u64,
}

impl ActionDispatcher {
    /// Dispatcher with no lane-change cooldown
    #[must_use]
    pub fn new(mode: DispatchMode, max_accel: f64, max_decel: f64) -> Self {
        Self {
            mode,
            max_accel,
            max_decel: max_decel.abs(),
            cooldown: 0,
        }
    }

    /// Suppress lane changes for `steps` steps after each lane change
    #[must_use]
    pub fn with_cooldown(mut self, steps: u64) -> Self {
        self.cooldown = steps;
        self
    }

    /// Cooldown in steps
    #[must_use]
    pub fn cooldown(&self) -> u64 {
        self.cooldown
    }

    /// Action space for `num_rl` slots
    pub fn space(&self, num_rl: usize) -> Result<TrafficActionSpace> {
        let (low, high) = match self.mode {
            DispatchMode::Accel => (vec![-self.max_decel], vec![self.max_accel]),
            DispatchMode::AccelLaneChange | DispatchMode::MultiAgent => {
                (vec![-self.max_decel, -1.0], vec![self.max_accel, 1.0])
            }
        };
        Ok(TrafficActionSpace {
            flat: ContinuousSpace::repeated(&low, &high, num_rl)?,
            block: ContinuousSpace::new(low, high)?,
            num_rl,
            per_agent: self.mode == DispatchMode::MultiAgent,
        })
    }

    /// Commands for the current slot occupants.
    ///
    /// Entries for empty slots are discarded and slots past the end of a
    /// short action get no command.
    pub fn dispatch(
        &self,
        action: &TrafficAction,
        registry: &VehicleRegistry,
        tracker: &ControlledAgentTracker,
    ) -> Result<Dispatch> {
        let pairs: Vec<(f64, Option<f64>)> = match (self.mode, action) {
            (DispatchMode::Accel, TrafficAction::Flat(v)) => v.iter().map(|a| (*a, None)).collect(),
            (DispatchMode::AccelLaneChange | DispatchMode::MultiAgent, TrafficAction::Flat(v)) => v
                .chunks(2)
                .map(|c| (c[0], c.get(1).copied()))
                .collect(),
            (DispatchMode::MultiAgent, TrafficAction::PerAgent(vs)) => vs
                .iter()
                .filter_map(|v| v.first().map(|a| (*a, v.get(1).copied())))
                .collect(),
            (_, TrafficAction::PerAgent(_)) => {
                return Err(EnvError::InvalidAction(
                    "per-agent action given to a single-agent environment".to_string(),
                ))
            }
        };

        let mut dispatch = Dispatch::default();
        for (slot, (accel, direction)) in pairs.into_iter().enumerate() {
            let requested = direction.map(round_direction);
            let Some(id) = tracker.occupant(slot) else {
                if requested.is_some() {
                    dispatch.requested.push(0);
                }
                continue;
            };
            if let Some(d) = requested {
                dispatch.requested.push(d);
            }
            dispatch.commands.push(VehicleCommand::Accelerate {
                id: id.to_string(),
                value: accel,
            });
            if let Some(d) = requested {
                let d = self.allowed_direction(registry, id, d);
                if d != 0 {
                    dispatch.commands.push(VehicleCommand::ChangeLane {
                        id: id.to_string(),
                        direction: d,
                    });
                }
            }
        }
        Ok(dispatch)
    }

    fn allowed_direction(&self, registry: &VehicleRegistry, id: &str, direction: i8) -> i8 {
        let Ok(vehicle) = registry.get(id) else { return 0 };
        if vehicle.state.edge.is_internal() {
            return 0;
        }
        let cooling = vehicle
            .last_lane_change
            .is_some_and(|t| registry.step().saturating_sub(t) <= self.cooldown);
        if cooling {
            0
        } else {
            direction
        }
    }
}

/// Round to the nearest integer and clip to `{-1, 0, 1}`
#[must_use]
pub fn round_direction(raw: f64) -> i8 {
    #[allow(clippy::cast_possible_truncation)]
    let d = raw.round().clamp(-1.0, 1.0) as i8;
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicles::testing::snapshot;
    use crate::vehicles::VehicleKind;

    fn world() -> (VehicleRegistry, ControlledAgentTracker) {
        let mut registry = VehicleRegistry::new(2);
        registry.refresh(
            vec![
                snapshot("rl_0", VehicleKind::Rl, "1", 10.0, 5.0, 0),
                snapshot("rl_1", VehicleKind::Rl, "1", 30.0, 5.0, 1),
            ],
            0,
        );
        let mut tracker = ControlledAgentTracker::new(3);
        tracker.sync(&mut registry);
        (registry, tracker)
    }

    #[test]
    fn rounds_and_clips_directions() {
        assert_eq!(round_direction(0.4), 0);
        assert_eq!(round_direction(0.6), 1);
        assert_eq!(round_direction(-7.0), -1);
        assert_eq!(round_direction(f64::NAN), 0);
    }

    #[test]
    fn accel_only_skips_empty_slots() {
        let (registry, tracker) = world();
        let dispatcher = ActionDispatcher::new(DispatchMode::Accel, 3.0, 3.0);
        let out = dispatcher
            .dispatch(&TrafficAction::Flat(vec![1.0, -9.0, 2.0]), &registry, &tracker)
            .unwrap();
        assert_eq!(
            out.commands,
            vec![
                VehicleCommand::Accelerate { id: "rl_0".into(), value: 1.0 },
                VehicleCommand::Accelerate { id: "rl_1".into(), value: -9.0 },
            ]
        );
    }

    #[test]
    fn deinterleaves_and_sends_only_nonzero_directions() {
        let (registry, tracker) = world();
        let dispatcher = ActionDispatcher::new(DispatchMode::AccelLaneChange, 3.0, 3.0);
        let out = dispatcher
            .dispatch(&TrafficAction::Flat(vec![0.5, 0.2, -0.5, -0.8, 1.0, 1.0]), &registry, &tracker)
            .unwrap();
        // slot 2 is empty, its request is dropped
        assert_eq!(out.requested, vec![0, -1, 0]);
        assert_eq!(out.lane_change_requests(&tracker), 1);
        assert_eq!(out.commands.len(), 3);
        assert_eq!(
            out.commands[2],
            VehicleCommand::ChangeLane { id: "rl_1".into(), direction: -1 }
        );
    }

    #[test]
    fn cooldown_blocks_recent_lane_changers() {
        let (mut registry, mut tracker) = world();
        // rl_0 changes lane at step 1
        registry.refresh(
            vec![
                snapshot("rl_0", VehicleKind::Rl, "1", 15.0, 5.0, 1),
                snapshot("rl_1", VehicleKind::Rl, "1", 35.0, 5.0, 1),
            ],
            1,
        );
        tracker.sync(&mut registry);
        let dispatcher = ActionDispatcher::new(DispatchMode::AccelLaneChange, 3.0, 3.0).with_cooldown(2);
        let action = TrafficAction::Flat(vec![0.0, -1.0]);
        for step in 2..=3 {
            registry.refresh(vec![snapshot("rl_0", VehicleKind::Rl, "1", 15.0, 5.0, 1)], step);
            let out = dispatcher.dispatch(&action, &registry, &tracker).unwrap();
            assert_eq!(out.commands.len(), 1, "step {step}");
            assert_eq!(out.requested, vec![-1]);
        }
        registry.refresh(vec![snapshot("rl_0", VehicleKind::Rl, "1", 15.0, 5.0, 1)], 4);
        let out = dispatcher.dispatch(&action, &registry, &tracker).unwrap();
        assert_eq!(out.commands.len(), 2);
    }

    #[test]
    fn junction_vehicles_do_not_change_lanes() {
        let mut registry = VehicleRegistry::new(2);
        registry.refresh(vec![snapshot("rl_0", VehicleKind::Rl, ":j_0", 10.0, 5.0, 0)], 0);
        let mut tracker = ControlledAgentTracker::new(1);
        tracker.sync(&mut registry);
        let dispatcher = ActionDispatcher::new(DispatchMode::MultiAgent, 3.0, 3.0);
        let out = dispatcher
            .dispatch(&TrafficAction::PerAgent(vec![vec![1.0, 1.0]]), &registry, &tracker)
            .unwrap();
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.requested, vec![1]);
    }

    #[test]
    fn empty_action_dispatches_nothing() {
        let (registry, tracker) = world();
        let dispatcher = ActionDispatcher::new(DispatchMode::AccelLaneChange, 3.0, 3.0);
        let out = dispatcher.dispatch(&TrafficAction::default(), &registry, &tracker).unwrap();
        assert!(out.commands.is_empty());
    }

    #[test]
    fn per_agent_action_rejected_in_single_agent_mode() {
        let (registry, tracker) = world();
        let dispatcher = ActionDispatcher::new(DispatchMode::Accel, 3.0, 3.0);
        assert!(matches!(
            dispatcher.dispatch(&TrafficAction::PerAgent(vec![vec![1.0]]), &registry, &tracker),
            Err(EnvError::InvalidAction(_))
        ));
    }

    #[test]
    fn space_bounds_use_decel_magnitude() {
        let dispatcher = ActionDispatcher::new(DispatchMode::AccelLaneChange, 2.0, -4.5);
        let space = dispatcher.space(2).unwrap();
        assert_eq!(space.dim(), Some(4));
        assert!(space.contains(&TrafficAction::Flat(vec![-4.5, -1.0, 2.0, 1.0])));
        assert!(!space.contains(&TrafficAction::Flat(vec![-5.0, 0.0, 0.0, 0.0])));
        for _ in 0..20 {
            assert!(space.contains(&space.sample()));
        }
    }
}
