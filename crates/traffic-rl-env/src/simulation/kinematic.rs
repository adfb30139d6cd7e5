//! Small in-process simulator for demos and tests.
//!
//! Vehicles move along the scenario's edges laid end to end. Humans
//! accelerate towards the speed limit and brake to keep their gap; RL
//! vehicles follow commanded accelerations and can collide.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::scenario::Scenario;
use crate::vehicles::{EdgeRef, VehicleKind, VehicleSnapshot};

use super::{Injection, Rgba, SimError, SimResult, Simulator, StepReport};

/// Lane-change mode vehicles start with
pub const DEFAULT_LANE_CHANGE_MODE: u32 = 1621;

const VEHICLE_LENGTH: f64 = 5.0;
const HUMAN_ACCEL: f64 = 1.0;

/// Initial placement of a vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    /// Identifier
    pub id: String,
    /// Controller type
    pub kind: VehicleKind,
    /// Edge to start on
    pub edge: String,
    /// Lane to start on
    pub lane: usize,
    /// Position along `edge`
    pub position: f64,
    /// Initial speed
    pub speed: f64,
}

impl SpawnSpec {
    /// Describe a vehicle placement
    pub fn new(
        id: impl Into<String>,
        kind: VehicleKind,
        edge: impl Into<String>,
        lane: usize,
        position: f64,
        speed: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            edge: edge.into(),
            lane,
            position,
            speed,
        }
    }
}

/// Periodic source of vehicles at the network start
#[derive(Debug, Clone, PartialEq)]
pub struct Inflow {
    /// Id prefix; vehicles are named `{prefix}_{n}`
    pub prefix: String,
    /// Controller type
    pub kind: VehicleKind,
    /// Steps between departures
    pub period: u64,
    /// Departure speed
    pub speed: f64,
}

/// Everything the simulator was asked to do, for inspection from outside
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandLog {
    /// Signal pushes in order
    pub signal_pushes: Vec<(String, String)>,
    /// Lane-change commands in order
    pub lane_changes: Vec<(String, i8)>,
    /// Acceleration commands in order
    pub accelerations: Vec<(String, f64)>,
    /// Accepted injections in order
    pub injections: Vec<Injection>,
    /// Whether `close` was called
    pub closed: bool,
}

/// Shared view of a [`KinematicSimulator`]'s [`CommandLog`]
#[derive(Debug, Clone, Default)]
pub struct SimProbe(Arc<Mutex<CommandLog>>);

impl SimProbe {
    /// Copy of the log so far
    #[must_use]
    pub fn snapshot(&self) -> CommandLog {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut CommandLog)) {
        if let Ok(mut log) = self.0.lock() {
            f(&mut log);
        }
    }
}

#[derive(Debug, Clone)]
struct SimVehicle {
    kind: VehicleKind,
    x: f64,
    speed: f64,
    lane: usize,
    accel: Option<f64>,
    lane_change: Option<i8>,
    lane_change_mode: u32,
    color: Rgba,
}

/// Straight-road kinematic simulator
#[derive(Debug)]
pub struct KinematicSimulator {
    scenario: Scenario,
    initial: Vec<SpawnSpec>,
    inflows: Vec<Inflow>,
    vehicles: IndexMap<String, SimVehicle>,
    signals: HashMap<String, String>,
    departures: u64,
    time: u64,
    emission_path: Option<PathBuf>,
    probe: SimProbe,
}

impl KinematicSimulator {
    /// Empty simulator over `scenario`
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            initial: Vec::new(),
            inflows: Vec::new(),
            vehicles: IndexMap::new(),
            signals: HashMap::new(),
            departures: 0,
            time: 0,
            emission_path: None,
            probe: SimProbe::default(),
        }
    }

    /// Add a vehicle to the initial population; it appears now and on every
    /// reset
    pub fn spawn(&mut self, spec: SpawnSpec) {
        self.place(&spec);
        self.initial.push(spec);
    }

    /// Builder-style [`KinematicSimulator::spawn`]
    #[must_use]
    pub fn with_vehicle(mut self, spec: SpawnSpec) -> Self {
        self.spawn(spec);
        self
    }

    /// Add a periodic inflow at the network start
    #[must_use]
    pub fn with_inflow(mut self, inflow: Inflow) -> Self {
        self.inflows.push(inflow);
        self
    }

    /// Report `path` as the emission log location
    #[must_use]
    pub fn with_emission_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.emission_path = Some(path.into());
        self
    }

    /// Handle for inspecting issued commands after the simulator is boxed
    #[must_use]
    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    /// Current state of a signal
    #[must_use]
    pub fn signal_state(&self, signal_id: &str) -> Option<&str> {
        self.signals.get(signal_id).map(String::as_str)
    }

    fn place(&mut self, spec: &SpawnSpec) {
        let offset = self.scenario.edge_start(&spec.edge).unwrap_or(0.0);
        self.vehicles.insert(
            spec.id.clone(),
            SimVehicle {
                kind: spec.kind,
                x: offset + spec.position,
                speed: spec.speed,
                lane: spec.lane,
                accel: None,
                lane_change: None,
                lane_change_mode: DEFAULT_LANE_CHANGE_MODE,
                color: Rgba::WHITE,
            },
        );
    }

    fn vehicle(&self, id: &str) -> SimResult<&SimVehicle> {
        self.vehicles
            .get(id)
            .ok_or_else(|| SimError::VehicleNotFound(id.to_string()))
    }

    fn vehicle_mut(&mut self, id: &str) -> SimResult<&mut SimVehicle> {
        self.vehicles
            .get_mut(id)
            .ok_or_else(|| SimError::VehicleNotFound(id.to_string()))
    }

    /// Edge containing absolute position `x` and the offset into it
    fn locate(&self, x: f64) -> Option<(&str, f64, usize)> {
        let mut start = 0.0;
        for edge in &self.scenario.edges {
            if x < start + edge.length {
                return Some((&edge.id, x - start, edge.lanes));
            }
            start += edge.length;
        }
        None
    }

    fn gap_ahead(&self, id: &str, x: f64, lane: usize) -> Option<f64> {
        self.vehicles
            .iter()
            .filter(|(other, v)| other.as_str() != id && v.lane == lane && v.x > x)
            .map(|(_, v)| v.x - VEHICLE_LENGTH - x)
            .min_by(f64::total_cmp)
    }

    fn lane_is_free(&self, x: f64, lane: usize) -> bool {
        self.vehicles
            .values()
            .all(|v| v.lane != lane || (v.x - x).abs() >= VEHICLE_LENGTH)
    }

    fn run_inflows(&mut self) {
        let lanes = self.scenario.edges.first().map_or(1, |e| e.lanes);
        let due: Vec<Inflow> = self
            .inflows
            .iter()
            .filter(|f| f.period > 0 && self.time % f.period == 0)
            .cloned()
            .collect();
        for inflow in due {
            let lane = usize::try_from(self.departures).unwrap_or(0) % lanes;
            if !self.lane_is_free(0.0, lane) {
                continue;
            }
            let id = format!("{}_{}", inflow.prefix, self.departures);
            self.departures += 1;
            self.vehicles.insert(
                id,
                SimVehicle {
                    kind: inflow.kind,
                    x: 0.0,
                    speed: inflow.speed,
                    lane,
                    accel: None,
                    lane_change: None,
                    lane_change_mode: DEFAULT_LANE_CHANGE_MODE,
                    color: Rgba::WHITE,
                },
            );
        }
    }

    fn detect_collision(&self) -> bool {
        let mut by_lane: HashMap<usize, Vec<f64>> = HashMap::new();
        for v in self.vehicles.values() {
            by_lane.entry(v.lane).or_default().push(v.x);
        }
        by_lane.values_mut().any(|xs| {
            xs.sort_by(f64::total_cmp);
            xs.windows(2).any(|w| w[1] - w[0] < VEHICLE_LENGTH)
        })
    }
}

impl Simulator for KinematicSimulator {
    fn reset(&mut self) -> SimResult<()> {
        self.vehicles.clear();
        self.signals.clear();
        self.time = 0;
        self.departures = 0;
        for spec in self.initial.clone() {
            self.place(&spec);
        }
        Ok(())
    }

    fn advance(&mut self, dt: f64) -> SimResult<StepReport> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::Backend(anyhow::anyhow!("invalid step length {dt}")));
        }
        let max_speed = self.scenario.max_speed;

        // speeds are decided from the pre-step positions
        let ids: Vec<String> = self.vehicles.keys().cloned().collect();
        let mut speeds = Vec::with_capacity(ids.len());
        for id in &ids {
            let v = &self.vehicles[id];
            let speed = match (v.kind, v.accel) {
                (_, Some(a)) => v.speed + a * dt,
                (VehicleKind::Human, None) => {
                    let desired = v.speed + HUMAN_ACCEL * dt;
                    let gap = self.gap_ahead(id, v.x, v.lane).unwrap_or(f64::INFINITY);
                    desired.min(gap.max(0.0) / dt)
                }
                (VehicleKind::Rl, None) => v.speed,
            };
            speeds.push(speed.clamp(0.0, max_speed));
        }

        let length = self.scenario.length();
        for (id, speed) in ids.iter().zip(speeds) {
            let lanes = {
                let v = &self.vehicles[id];
                self.locate(v.x + speed * dt).map(|(_, _, lanes)| lanes)
            };
            let Some(v) = self.vehicles.get_mut(id) else { continue };
            v.speed = speed;
            v.x += speed * dt;
            v.accel = None;
            let lanes = lanes.unwrap_or(1);
            if let Some(direction) = v.lane_change.take() {
                let target = v.lane as i64 + i64::from(direction);
                v.lane = usize::try_from(target.max(0)).unwrap_or(0);
            }
            v.lane = v.lane.min(lanes.saturating_sub(1));
        }
        self.vehicles.retain(|_, v| v.x < length);

        self.time += 1;
        self.run_inflows();

        Ok(StepReport {
            collision: self.detect_collision(),
            ended: self.vehicles.is_empty() && self.inflows.is_empty(),
        })
    }

    fn vehicles(&self) -> SimResult<Vec<VehicleSnapshot>> {
        Ok(self
            .vehicles
            .iter()
            .map(|(id, v)| {
                let (edge, position) = self
                    .locate(v.x)
                    .map_or((EdgeRef::Internal, 0.0), |(edge, pos, _)| (EdgeRef::parse(edge), pos));
                VehicleSnapshot {
                    id: id.clone(),
                    kind: v.kind,
                    edge,
                    position,
                    x: v.x,
                    speed: v.speed,
                    lane: v.lane,
                    length: VEHICLE_LENGTH,
                }
            })
            .collect())
    }

    fn set_acceleration(&mut self, id: &str, value: f64) -> SimResult<()> {
        self.vehicle_mut(id)?.accel = Some(value);
        self.probe.record(|log| log.accelerations.push((id.to_string(), value)));
        Ok(())
    }

    fn set_lane_change_direction(&mut self, id: &str, direction: i8) -> SimResult<()> {
        self.vehicle_mut(id)?.lane_change = Some(direction);
        self.probe.record(|log| log.lane_changes.push((id.to_string(), direction)));
        Ok(())
    }

    fn lane_change_mode(&self, id: &str) -> SimResult<u32> {
        self.vehicle(id).map(|v| v.lane_change_mode)
    }

    fn set_lane_change_mode(&mut self, id: &str, mode: u32) -> SimResult<()> {
        self.vehicle_mut(id)?.lane_change_mode = mode;
        Ok(())
    }

    fn color(&self, id: &str) -> SimResult<Rgba> {
        self.vehicle(id).map(|v| v.color)
    }

    fn set_color(&mut self, id: &str, color: Rgba) -> SimResult<()> {
        self.vehicle_mut(id)?.color = color;
        Ok(())
    }

    fn inject(&mut self, injection: &Injection) -> SimResult<()> {
        if self.vehicles.contains_key(&injection.id) {
            return Err(SimError::Backend(anyhow::anyhow!(
                "vehicle {} is already in the network",
                injection.id
            )));
        }
        if !self.lane_is_free(injection.position, injection.lane) {
            return Err(SimError::DepartureBlocked {
                id: injection.id.clone(),
                lane: injection.lane,
            });
        }
        self.vehicles.insert(
            injection.id.clone(),
            SimVehicle {
                kind: VehicleKind::Rl,
                x: injection.position,
                speed: injection.speed.unwrap_or(self.scenario.max_speed),
                lane: injection.lane,
                accel: None,
                lane_change: None,
                lane_change_mode: DEFAULT_LANE_CHANGE_MODE,
                color: Rgba::WHITE,
            },
        );
        let accepted = injection.clone();
        self.probe.record(|log| log.injections.push(accepted));
        Ok(())
    }

    fn set_signal_state(&mut self, signal_id: &str, state: &str) -> SimResult<()> {
        self.signals.insert(signal_id.to_string(), state.to_string());
        self.probe
            .record(|log| log.signal_pushes.push((signal_id.to_string(), state.to_string())));
        Ok(())
    }

    fn emission_path(&self) -> Option<PathBuf> {
        self.emission_path.clone()
    }

    fn close(&mut self) -> SimResult<()> {
        self.probe.record(|log| log.closed = true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn road() -> KinematicSimulator {
        KinematicSimulator::new(Scenario::bottleneck(1))
    }

    #[test]
    fn vehicles_report_edge_and_offset() {
        let sim = road().with_vehicle(SpawnSpec::new("a", VehicleKind::Human, "2", 1, 30.0, 0.0));
        let snapshot = &sim.vehicles().unwrap()[0];
        assert_eq!(snapshot.edge, EdgeRef::Road("2".into()));
        assert_relative_eq!(snapshot.position, 30.0);
        assert_relative_eq!(snapshot.x, 130.0);
    }

    #[test]
    fn commanded_acceleration_applies_once() {
        let mut sim = road().with_vehicle(SpawnSpec::new("rl", VehicleKind::Rl, "1", 0, 0.0, 10.0));
        sim.set_acceleration("rl", 2.0).unwrap();
        sim.advance(1.0).unwrap();
        assert_relative_eq!(sim.vehicles().unwrap()[0].speed, 12.0);
        sim.advance(1.0).unwrap();
        assert_relative_eq!(sim.vehicles().unwrap()[0].speed, 12.0);
    }

    #[test]
    fn unknown_vehicle_is_not_found() {
        let mut sim = road();
        assert!(matches!(
            sim.set_acceleration("ghost", 1.0),
            Err(SimError::VehicleNotFound(_))
        ));
        assert!(matches!(sim.color("ghost"), Err(SimError::VehicleNotFound(_))));
    }

    #[test]
    fn lane_changes_stay_inside_the_road() {
        let mut sim = road().with_vehicle(SpawnSpec::new("rl", VehicleKind::Rl, "1", 0, 0.0, 1.0));
        sim.set_lane_change_direction("rl", -1).unwrap();
        sim.advance(1.0).unwrap();
        assert_eq!(sim.vehicles().unwrap()[0].lane, 0);
        sim.set_lane_change_direction("rl", 1).unwrap();
        sim.advance(1.0).unwrap();
        assert_eq!(sim.vehicles().unwrap()[0].lane, 1);
    }

    #[test]
    fn vehicles_leave_at_the_end() {
        let mut sim = road().with_vehicle(SpawnSpec::new("a", VehicleKind::Rl, "5", 0, 95.0, 10.0));
        let report = sim.advance(1.0).unwrap();
        assert!(sim.vehicles().unwrap().is_empty());
        assert!(report.ended);
    }

    #[test]
    fn rear_end_is_a_collision() {
        let mut sim = road()
            .with_vehicle(SpawnSpec::new("lead", VehicleKind::Rl, "1", 0, 20.0, 0.0))
            .with_vehicle(SpawnSpec::new("rl", VehicleKind::Rl, "1", 0, 0.0, 20.0));
        assert!(sim.advance(1.0).unwrap().collision);
    }

    #[test]
    fn blocked_injection_fails() {
        let mut sim = road().with_vehicle(SpawnSpec::new("a", VehicleKind::Human, "1", 0, 2.0, 0.0));
        let blocked = Injection {
            id: "rl_0".into(),
            route: "route1".into(),
            lane: 0,
            position: 0.0,
            speed: None,
        };
        assert!(matches!(sim.inject(&blocked), Err(SimError::DepartureBlocked { lane: 0, .. })));
        let free = Injection { lane: 1, ..blocked };
        sim.inject(&free).unwrap();
        assert_eq!(sim.probe().snapshot().injections.len(), 1);
    }

    #[test]
    fn reset_restores_initial_population() {
        let mut sim = road().with_vehicle(SpawnSpec::new("a", VehicleKind::Human, "1", 0, 0.0, 5.0));
        sim.advance(1.0).unwrap();
        sim.reset().unwrap();
        assert_relative_eq!(sim.vehicles().unwrap()[0].x, 0.0);
    }

    #[test]
    fn inflow_departs_periodically() {
        let mut sim = road().with_inflow(Inflow {
            prefix: "human".into(),
            kind: VehicleKind::Human,
            period: 2,
            speed: 10.0,
        });
        for _ in 0..4 {
            sim.advance(1.0).unwrap();
        }
        assert_eq!(sim.vehicles().unwrap().len(), 2);
    }
}
