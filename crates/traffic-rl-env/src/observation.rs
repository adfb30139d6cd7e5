//! Fixed-length observations built from the vehicle registry

use ndarray::{s, Array1};
use serde::{Deserialize, Serialize};

use traffic_rl_core::{BoxObservationSpace, Observation, ObservationSpace, Result};

use crate::scenario::Scenario;
use crate::tracker::ControlledAgentTracker;
use crate::vehicles::{Vehicle, VehicleRegistry};

/// Normaliser for absolute positions and gaps in the bottleneck layouts
const DISTANCE_SCALE: f64 = 1000.0;

/// Observation of a traffic environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrafficObservation {
    /// One vector for the whole system
    Single(Array1<f64>),
    /// One vector per control slot, in slot order
    Multi(Vec<Array1<f64>>),
}

impl TrafficObservation {
    /// The single-agent vector, if this is one
    #[must_use]
    pub fn as_single(&self) -> Option<&Array1<f64>> {
        match self {
            Self::Single(v) => Some(v),
            Self::Multi(_) => None,
        }
    }

    /// Per-agent vectors, if this is a multi-agent observation
    #[must_use]
    pub fn as_multi(&self) -> Option<&[Array1<f64>]> {
        match self {
            Self::Single(_) => None,
            Self::Multi(v) => Some(v),
        }
    }
}

impl Observation for TrafficObservation {
    fn to_vec(&self) -> Vec<f64> {
        match self {
            Self::Single(v) => v.to_vec(),
            Self::Multi(vs) => vs.iter().flat_map(|v| v.iter().copied()).collect(),
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self {
            Self::Single(v) => vec![v.len()],
            Self::Multi(vs) => vec![vs.len(), vs.first().map_or(0, Array1::len)],
        }
    }
}

/// Box space over [`TrafficObservation`]; `agents` is set for per-agent
/// observations
#[derive(Debug, Clone)]
pub struct TrafficObservationSpace {
    inner: BoxObservationSpace,
    agents: Option<usize>,
}

impl TrafficObservationSpace {
    /// Length of one observation vector
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether vectors are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ObservationSpace for TrafficObservationSpace {
    type Observation = TrafficObservation;

    fn sample(&self) -> Self::Observation {
        let draw = || Array1::from(self.inner.sample().data);
        match self.agents {
            None => TrafficObservation::Single(draw()),
            Some(n) => TrafficObservation::Multi((0..n).map(|_| draw()).collect()),
        }
    }

    fn contains(&self, obs: &Self::Observation) -> bool {
        match (obs, self.agents) {
            (TrafficObservation::Single(v), None) => v
                .as_slice()
                .is_some_and(|data| self.inner.contains_slice(data)),
            (TrafficObservation::Multi(vs), Some(n)) => {
                vs.len() == n
                    && vs.iter().all(|v| {
                        v.as_slice()
                            .is_some_and(|data| self.inner.contains_slice(data))
                    })
            }
            _ => false,
        }
    }

    fn shape(&self) -> Vec<usize> {
        match self.agents {
            None => vec![self.inner.len()],
            Some(n) => vec![n, self.inner.len()],
        }
    }
}

/// Which vector layout to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Five values per slot about the vehicle and its same-lane neighbours
    Merge,
    /// Controlled kinematics, neighbours on every lane, per-edge aggregates
    Bottleneck,
    /// Bottleneck layout split per slot, each agent first in its own vector
    MultiAgent,
}

/// Collect `(slot, segment)` pairs into `num_rl * width` values, each
/// segment at its slot's offset. Empty slots stay zero; slots past `num_rl`
/// are dropped.
pub fn pad_by_slot(
    width: usize,
    num_rl: usize,
    segments: impl IntoIterator<Item = (usize, Vec<f64>)>,
) -> Array1<f64> {
    let mut out = Array1::zeros(width * num_rl);
    for (slot, segment) in segments {
        if slot >= num_rl {
            continue;
        }
        let n = segment.len().min(width);
        out.slice_mut(s![slot * width..slot * width + n])
            .assign(&Array1::from(segment[..n].to_vec()));
    }
    out
}

/// Builds observations of a fixed layout for one scenario.
///
/// Every size and normaliser is taken from the scenario at construction, so
/// the output length never changes during an episode.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    layout: Layout,
    scenario: Scenario,
    num_rl: usize,
    num_lanes: usize,
}

impl ObservationBuilder {
    /// Builder for `num_rl` slots on `scenario`
    #[must_use]
    pub fn new(layout: Layout, scenario: &Scenario, num_rl: usize) -> Self {
        Self {
            layout,
            scenario: scenario.clone(),
            num_rl,
            num_lanes: scenario.num_lanes(),
        }
    }

    /// Layout produced
    #[must_use]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Length of one observation vector
    #[must_use]
    pub fn len(&self) -> usize {
        let (n, lanes, edges) = (self.num_rl, self.num_lanes, self.scenario.num_edges());
        match self.layout {
            Layout::Merge => 5 * n,
            Layout::Bottleneck => 4 * n + 4 * lanes * n + 2 * edges,
            Layout::MultiAgent => 4 * n + 4 * lanes + 2 * edges,
        }
    }

    /// Whether observations are empty (no slots and no edges)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Space the observations live in
    pub fn space(&self) -> Result<TrafficObservationSpace> {
        // positions and gaps are only scaled, not bounded
        let high = match self.layout {
            Layout::Merge => 1.0,
            Layout::Bottleneck | Layout::MultiAgent => f64::INFINITY,
        };
        let agents = (self.layout == Layout::MultiAgent).then_some(self.num_rl);
        Ok(TrafficObservationSpace {
            inner: BoxObservationSpace::uniform(-1.0, high, vec![self.len()])?,
            agents,
        })
    }

    /// Observation for the current registry state
    #[must_use]
    pub fn build(&self, registry: &VehicleRegistry, tracker: &ControlledAgentTracker) -> TrafficObservation {
        match self.layout {
            Layout::Merge => TrafficObservation::Single(self.merge(registry, tracker)),
            Layout::Bottleneck => TrafficObservation::Single(self.bottleneck(registry, tracker)),
            Layout::MultiAgent => TrafficObservation::Multi(self.multi_agent(registry, tracker)),
        }
    }

    /// All-zero observation of the right shape
    #[must_use]
    pub fn zeros(&self) -> TrafficObservation {
        match self.layout {
            Layout::Merge | Layout::Bottleneck => TrafficObservation::Single(Array1::zeros(self.len())),
            Layout::MultiAgent => {
                TrafficObservation::Multi(vec![Array1::zeros(self.len()); self.num_rl])
            }
        }
    }

    fn occupants<'a>(
        registry: &'a VehicleRegistry,
        tracker: &'a ControlledAgentTracker,
    ) -> impl Iterator<Item = (usize, &'a Vehicle)> + 'a {
        tracker
            .occupied()
            .filter_map(move |(slot, id)| registry.get(id).ok().map(|v| (slot, v)))
    }

    fn merge(&self, registry: &VehicleRegistry, tracker: &ControlledAgentTracker) -> Array1<f64> {
        let max_speed = self.scenario.max_speed;
        let length = self.scenario.length();
        let segments = Self::occupants(registry, tracker).map(|(slot, v)| {
            let speed = v.state.speed;
            let (lead_speed, lead_gap) = v
                .leader
                .as_deref()
                .and_then(|id| registry.speed(id).ok())
                .map_or((max_speed, length), |s| (s, v.headway));
            let (follow_speed, follow_gap) = v
                .follower
                .as_deref()
                .and_then(|id| registry.speed(id).ok())
                .map_or((0.0, length), |s| (s, v.tailway));
            (
                slot,
                vec![
                    speed / max_speed,
                    (lead_speed - speed) / max_speed,
                    lead_gap / length,
                    (speed - follow_speed) / max_speed,
                    follow_gap / length,
                ],
            )
        });
        pad_by_slot(5, self.num_rl, segments)
    }

    fn rl_segment(&self, v: &Vehicle) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let edges = (self.scenario.num_edges() + 1) as f64;
        #[allow(clippy::cast_precision_loss)]
        let edge = v
            .state
            .edge
            .as_road()
            .and_then(|id| self.scenario.edge_ordinal(id))
            .map_or(-1.0, |ordinal| ordinal as f64 / edges);
        #[allow(clippy::cast_precision_loss)]
        let lane = v.state.lane as f64 / self.num_lanes.max(1) as f64;
        vec![
            v.state.x / DISTANCE_SCALE,
            v.state.speed / self.scenario.max_speed,
            lane,
            edge,
        ]
    }

    fn relative_segment(&self, registry: &VehicleRegistry, v: &Vehicle) -> Vec<f64> {
        let lanes = self.num_lanes;
        let max_speed = self.scenario.max_speed;
        let speed_of = |id: &Option<String>| {
            id.as_deref()
                .and_then(|id| registry.speed(id).ok())
                .map_or(0.0, |s| s / max_speed)
        };
        let gap = |gaps: &[f64], lane: usize| gaps.get(lane).map_or(1.0, |g| g / DISTANCE_SCALE);

        let mut out = Vec::with_capacity(4 * lanes);
        out.extend((0..lanes).map(|l| gap(&v.lane_headways, l)));
        out.extend((0..lanes).map(|l| gap(&v.lane_tailways, l)));
        out.extend((0..lanes).map(|l| v.lane_leaders.get(l).map_or(0.0, speed_of)));
        out.extend((0..lanes).map(|l| v.lane_followers.get(l).map_or(0.0, speed_of)));
        out
    }

    fn edge_section(&self, registry: &VehicleRegistry) -> Vec<f64> {
        let max_speed = self.scenario.max_speed;
        self.scenario
            .edges
            .iter()
            .flat_map(|edge| {
                let speeds: Vec<f64> = registry.on_edge(&edge.id).map(|v| v.state.speed).collect();
                if speeds.is_empty() {
                    [0.0, 0.0]
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let count = speeds.len() as f64;
                    let mean = speeds.iter().sum::<f64>() / count;
                    [mean / max_speed, count / edge.length]
                }
            })
            .collect()
    }

    fn bottleneck(&self, registry: &VehicleRegistry, tracker: &ControlledAgentTracker) -> Array1<f64> {
        let rl = pad_by_slot(
            4,
            self.num_rl,
            Self::occupants(registry, tracker).map(|(slot, v)| (slot, self.rl_segment(v))),
        );
        let relative = pad_by_slot(
            4 * self.num_lanes,
            self.num_rl,
            Self::occupants(registry, tracker).map(|(slot, v)| (slot, self.relative_segment(registry, v))),
        );
        rl.iter()
            .chain(relative.iter())
            .copied()
            .chain(self.edge_section(registry))
            .collect()
    }

    fn multi_agent(&self, registry: &VehicleRegistry, tracker: &ControlledAgentTracker) -> Vec<Array1<f64>> {
        let n = self.num_rl;
        let edges = self.edge_section(registry);
        let own_width = 4 * n + 4 * self.num_lanes;

        let rl: Vec<Option<Vec<f64>>> = (0..n)
            .map(|slot| {
                tracker
                    .occupant(slot)
                    .and_then(|id| registry.get(id).ok())
                    .map(|v| self.rl_segment(v))
            })
            .collect();

        (0..n)
            .map(|slot| {
                let mut out = vec![0.0; own_width];
                let me = tracker.occupant(slot).and_then(|id| registry.get(id).ok());
                if let Some(vehicle) = me {
                    // self first, then the other slots in ascending order
                    let order = std::iter::once(slot).chain((0..n).filter(|other| *other != slot));
                    for (position, other) in order.enumerate() {
                        if let Some(segment) = &rl[other] {
                            out[position * 4..position * 4 + 4].copy_from_slice(segment);
                        }
                    }
                    out[4 * n..].copy_from_slice(&self.relative_segment(registry, vehicle));
                }
                out.extend_from_slice(&edges);
                Array1::from(out)
            })
            .collect()
    }
}
