//! Live vehicle state, rebuilt from simulator readback every step

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use traffic_rl_core::{EnvError, Result};

/// Gap reported for a lane with no leader or follower, in meters
pub const NO_NEIGHBOR_GAP: f64 = 1000.0;

/// Who drives the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleKind {
    /// Driven by the simulator's own car-following model
    Human,
    /// Controllable by the learning agent
    Rl,
}

/// Where a vehicle currently is
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeRef {
    /// A named road segment
    Road(String),
    /// Inside a junction or an internal connector
    Internal,
}

impl EdgeRef {
    /// Interpret a raw simulator edge id; empty ids and ids starting with
    /// `:` denote internal positions.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw.starts_with(':') {
            Self::Internal
        } else {
            Self::Road(raw.to_string())
        }
    }

    /// Road id, or `None` inside a junction
    #[must_use]
    pub fn as_road(&self) -> Option<&str> {
        match self {
            Self::Road(id) => Some(id),
            Self::Internal => None,
        }
    }

    /// Whether the vehicle is inside a junction
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal)
    }

    /// Whether this is the named road
    #[must_use]
    pub fn is(&self, id: &str) -> bool {
        self.as_road() == Some(id)
    }
}

/// What the simulator reports about one vehicle after a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    /// Unique identifier
    pub id: String,
    /// Controller type
    pub kind: VehicleKind,
    /// Current edge
    pub edge: EdgeRef,
    /// Front bumper position along the current edge, meters
    pub position: f64,
    /// Front bumper position along the whole network, meters
    pub x: f64,
    /// Speed, m/s
    pub speed: f64,
    /// Lane index, 0 is the rightmost lane
    pub lane: usize,
    /// Vehicle length, meters
    pub length: f64,
}

/// A vehicle as seen by the environment for the current step
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    /// Latest readback
    pub state: VehicleSnapshot,
    /// Step of the most recent lane change, if any this episode
    pub last_lane_change: Option<u64>,
    /// Nearest vehicle ahead on the same lane
    pub leader: Option<String>,
    /// Nearest vehicle behind on the same lane
    pub follower: Option<String>,
    /// Bumper-to-bumper gap to the leader
    pub headway: f64,
    /// Bumper-to-bumper gap to the follower
    pub tailway: f64,
    /// Nearest vehicle ahead on every lane
    pub lane_leaders: Vec<Option<String>>,
    /// Gap to the leader on every lane
    pub lane_headways: Vec<f64>,
    /// Nearest vehicle behind on every lane
    pub lane_followers: Vec<Option<String>>,
    /// Gap to the follower on every lane
    pub lane_tailways: Vec<f64>,
}

impl Vehicle {
    fn new(state: VehicleSnapshot, last_lane_change: Option<u64>, lanes: usize) -> Self {
        Self {
            state,
            last_lane_change,
            leader: None,
            follower: None,
            headway: NO_NEIGHBOR_GAP,
            tailway: NO_NEIGHBOR_GAP,
            lane_leaders: vec![None; lanes],
            lane_headways: vec![NO_NEIGHBOR_GAP; lanes],
            lane_followers: vec![None; lanes],
            lane_tailways: vec![NO_NEIGHBOR_GAP; lanes],
        }
    }

    /// Whether the agent controls this vehicle
    #[must_use]
    pub fn is_rl(&self) -> bool {
        self.state.kind == VehicleKind::Rl
    }
}

/// Registry of every vehicle currently in the network.
///
/// Iteration order follows the order the simulator reported vehicles in.
#[derive(Debug, Clone, Default)]
pub struct VehicleRegistry {
    num_lanes: usize,
    vehicles: IndexMap<String, Vehicle>,
    observed: HashSet<String>,
    step: u64,
}

impl VehicleRegistry {
    /// Create an empty registry for a network with `num_lanes` lanes
    #[must_use]
    pub fn new(num_lanes: usize) -> Self {
        Self {
            num_lanes,
            ..Self::default()
        }
    }

    /// Drop all vehicles and observation marks
    pub fn clear(&mut self) {
        self.vehicles.clear();
        self.observed.clear();
        self.step = 0;
    }

    /// Replace the registry contents with a fresh readback taken at `step`.
    ///
    /// A vehicle that stayed on the same edge but moved to another lane since
    /// the previous refresh is recorded as having changed lanes at `step`.
    pub fn refresh(&mut self, snapshots: Vec<VehicleSnapshot>, step: u64) {
        let previous = std::mem::take(&mut self.vehicles);
        let lanes = snapshots
            .iter()
            .map(|s| s.lane + 1)
            .max()
            .unwrap_or(0)
            .max(self.num_lanes);

        for snapshot in snapshots {
            let last_lane_change = match previous.get(&snapshot.id) {
                Some(prev) if prev.state.edge == snapshot.edge && prev.state.lane != snapshot.lane => {
                    Some(step)
                }
                Some(prev) => prev.last_lane_change,
                None => None,
            };
            let id = snapshot.id.clone();
            self.vehicles.insert(id, Vehicle::new(snapshot, last_lane_change, lanes));
        }
        self.step = step;
        self.compute_neighbors(lanes);
    }

    fn compute_neighbors(&mut self, lanes: usize) {
        // per lane: (x, index into self.vehicles), sorted by x
        let mut by_lane: Vec<Vec<(f64, usize)>> = vec![Vec::new(); lanes];
        for (idx, vehicle) in self.vehicles.values().enumerate() {
            by_lane[vehicle.state.lane].push((vehicle.state.x, idx));
        }
        for lane in &mut by_lane {
            lane.sort_by(|a, b| a.0.total_cmp(&b.0));
        }

        let ids: Vec<String> = self.vehicles.keys().cloned().collect();
        let lengths: Vec<f64> = self.vehicles.values().map(|v| v.state.length).collect();

        for vehicle in self.vehicles.values_mut() {
            let (x, length) = (vehicle.state.x, vehicle.state.length);
            for (lane, sorted) in by_lane.iter().enumerate() {
                let ahead = sorted.partition_point(|(ox, _)| *ox <= x);
                if let Some(&(lx, li)) = sorted.get(ahead) {
                    vehicle.lane_leaders[lane] = Some(ids[li].clone());
                    vehicle.lane_headways[lane] = lx - lengths[li] - x;
                }
                let behind = sorted.partition_point(|(ox, _)| *ox < x);
                if let Some(&(fx, fi)) = behind.checked_sub(1).and_then(|i| sorted.get(i)) {
                    vehicle.lane_followers[lane] = Some(ids[fi].clone());
                    vehicle.lane_tailways[lane] = x - length - fx;
                }
            }
            let own = vehicle.state.lane;
            vehicle.leader = vehicle.lane_leaders[own].clone();
            vehicle.headway = vehicle.lane_headways[own];
            vehicle.follower = vehicle.lane_followers[own].clone();
            vehicle.tailway = vehicle.lane_tailways[own];
        }
    }

    /// Step at which the registry was last refreshed
    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Look up a vehicle
    pub fn get(&self, id: &str) -> Result<&Vehicle> {
        self.vehicles
            .get(id)
            .ok_or_else(|| EnvError::VehicleNotFound(id.to_string()))
    }

    /// Whether a vehicle is in the network
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.vehicles.contains_key(id)
    }

    /// Speed of a vehicle
    pub fn speed(&self, id: &str) -> Result<f64> {
        self.get(id).map(|v| v.state.speed)
    }

    /// Lane of a vehicle
    pub fn lane(&self, id: &str) -> Result<usize> {
        self.get(id).map(|v| v.state.lane)
    }

    /// Edge of a vehicle
    pub fn edge(&self, id: &str) -> Result<&EdgeRef> {
        self.get(id).map(|v| &v.state.edge)
    }

    /// Position of a vehicle along its edge
    pub fn position(&self, id: &str) -> Result<f64> {
        self.get(id).map(|v| v.state.position)
    }

    /// Position of a vehicle along the whole network
    pub fn x(&self, id: &str) -> Result<f64> {
        self.get(id).map(|v| v.state.x)
    }

    /// All vehicles in readback order
    pub fn iter(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Ids of all vehicles in readback order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.vehicles.keys().map(String::as_str)
    }

    /// Ids of controllable vehicles in readback order
    pub fn rl_ids(&self) -> impl Iterator<Item = &str> {
        self.vehicles
            .values()
            .filter(|v| v.is_rl())
            .map(|v| v.state.id.as_str())
    }

    /// Ids sorted by absolute position, rearmost first
    #[must_use]
    pub fn ids_by_position(&self) -> Vec<&str> {
        let mut vehicles: Vec<&Vehicle> = self.vehicles.values().collect();
        vehicles.sort_by(|a, b| a.state.x.total_cmp(&b.state.x));
        vehicles.into_iter().map(|v| v.state.id.as_str()).collect()
    }

    /// Vehicles on a named edge
    pub fn on_edge<'a>(&'a self, edge: &'a str) -> impl Iterator<Item = &'a Vehicle> + 'a {
        self.vehicles.values().filter(move |v| v.state.edge.is(edge))
    }

    /// Number of vehicles in the network
    #[must_use]
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    /// Whether the network is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Number of controllable vehicles in the network
    #[must_use]
    pub fn num_rl(&self) -> usize {
        self.rl_ids().count()
    }

    /// Mark a vehicle as seen by an observation
    pub fn set_observed(&mut self, id: &str) {
        if self.vehicles.contains_key(id) {
            self.observed.insert(id.to_string());
        }
    }

    /// Whether a vehicle has been seen by an observation this episode
    #[must_use]
    pub fn is_observed(&self, id: &str) -> bool {
        self.observed.contains(id)
    }
}
