//! Simulator seam: the external simulator interface and the adapter the
//! environment drives it through

pub mod kinematic;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, trace};

use traffic_rl_core::EnvError;

use crate::vehicles::{VehicleRegistry, VehicleSnapshot};

pub use kinematic::{CommandLog, Inflow, KinematicSimulator, SimProbe, SpawnSpec};

/// Lane-change mode that forbids every lane change the driver model would
/// make on its own
pub const LANE_CHANGE_RESTRICTED: u32 = 512;

/// Failure of a single simulator call
#[derive(Error, Debug)]
pub enum SimError {
    /// The vehicle already left the network
    #[error("vehicle {0} is not in the network")]
    VehicleNotFound(String),

    /// An injection could not depart because its lane is occupied
    #[error("departure of {id} blocked on lane {lane}")]
    DepartureBlocked {
        /// Vehicle that was to be injected
        id: String,
        /// Requested departure lane
        lane: usize,
    },

    /// Anything else; carries the backend's own error unchanged
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<SimError> for EnvError {
    fn from(err: SimError) -> Self {
        match err {
            SimError::VehicleNotFound(id) => EnvError::VehicleNotFound(id),
            SimError::Backend(e) => EnvError::Simulator(e),
            blocked @ SimError::DepartureBlocked { .. } => EnvError::Simulator(blocked.into()),
        }
    }
}

/// Result of a simulator call
pub type SimResult<T> = std::result::Result<T, SimError>;

/// Turns the vehicle-not-found branch into `Ok(None)`
pub trait SkipMissing<T> {
    /// `Ok(Some(v))` on success, `Ok(None)` if the vehicle is gone,
    /// `Err` for any other failure
    fn skip_missing(self) -> SimResult<Option<T>>;
}

impl<T> SkipMissing<T> for SimResult<T> {
    fn skip_missing(self) -> SimResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SimError::VehicleNotFound(id)) => {
                trace!(vehicle = %id, "vehicle left the network, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

impl Rgba {
    /// Highlight for vehicles queued at the toll booth
    pub const MAGENTA: Self = Self(255, 0, 255, 0);
    /// Highlight for vehicles queued at the ramp meter
    pub const CYAN: Self = Self(0, 255, 255, 0);
    /// Default vehicle colour
    pub const WHITE: Self = Self(255, 255, 255, 255);
}

/// Request to place a vehicle into the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Injection {
    /// Identifier; may reuse the id of a vehicle that exited
    pub id: String,
    /// Route to follow
    pub route: String,
    /// Departure lane
    pub lane: usize,
    /// Departure position along the first edge
    pub position: f64,
    /// Departure speed; `None` means the maximum safe speed
    pub speed: Option<f64>,
}

/// What happened during one `advance`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Two vehicles collided
    pub collision: bool,
    /// The simulator has nothing left to simulate
    pub ended: bool,
}

/// Command produced by an action dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    /// Apply an acceleration for the next step, m/s²
    Accelerate {
        /// Target vehicle
        id: String,
        /// Requested acceleration
        value: f64,
    },
    /// Start a lane change; `+1` is left, `-1` is right
    ChangeLane {
        /// Target vehicle
        id: String,
        /// Direction
        direction: i8,
    },
}

impl VehicleCommand {
    /// Target vehicle of the command
    #[must_use]
    pub fn vehicle(&self) -> &str {
        match self {
            Self::Accelerate { id, .. } | Self::ChangeLane { id, .. } => id,
        }
    }
}

/// The external traffic simulator.
///
/// Every per-vehicle call fails with [`SimError::VehicleNotFound`] when the
/// vehicle is no longer in the network; callers treat that as a normal
/// branch. [`Simulator::advance`] failing is fatal to the episode.
pub trait Simulator: Send + Sync {
    /// Restart the simulation and return to the initial vehicle set
    fn reset(&mut self) -> SimResult<()>;

    /// Advance the simulation by one step of `dt` seconds
    fn advance(&mut self, dt: f64) -> SimResult<StepReport>;

    /// Read back every vehicle currently in the network
    fn vehicles(&self) -> SimResult<Vec<VehicleSnapshot>>;

    /// Set the acceleration a vehicle applies in the next step
    fn set_acceleration(&mut self, id: &str, value: f64) -> SimResult<()>;

    /// Start a lane change in `direction`
    fn set_lane_change_direction(&mut self, id: &str, direction: i8) -> SimResult<()>;

    /// Current lane-change permission bitmask
    fn lane_change_mode(&self, id: &str) -> SimResult<u32>;

    /// Replace the lane-change permission bitmask
    fn set_lane_change_mode(&mut self, id: &str, mode: u32) -> SimResult<()>;

    /// Current colour
    fn color(&self, id: &str) -> SimResult<Rgba>;

    /// Change the colour
    fn set_color(&mut self, id: &str, color: Rgba) -> SimResult<()>;

    /// Place a vehicle into the network
    fn inject(&mut self, injection: &Injection) -> SimResult<()>;

    /// Set the state string of a traffic signal
    fn set_signal_state(&mut self, signal_id: &str, state: &str) -> SimResult<()>;

    /// Where the simulator writes its emission log, if anywhere
    fn emission_path(&self) -> Option<PathBuf> {
        None
    }

    /// Release the simulator; called once on teardown
    fn close(&mut self) -> SimResult<()> {
        Ok(())
    }
}

/// Command/query façade over a [`Simulator`].
///
/// The adapter owns the simulator for its whole lifetime and closes it on
/// [`SimulationAdapter::close`] or when dropped.
pub struct SimulationAdapter {
    simulator: Box<dyn Simulator>,
    sim_step: f64,
    time_counter: u64,
    closed: bool,
}

impl SimulationAdapter {
    /// Take ownership of a simulator stepping `sim_step` seconds at a time
    pub fn new(simulator: Box<dyn Simulator>, sim_step: f64) -> Self {
        Self {
            simulator,
            sim_step,
            time_counter: 0,
            closed: false,
        }
    }

    /// Seconds per step
    #[must_use]
    pub fn sim_step(&self) -> f64 {
        self.sim_step
    }

    /// Steps taken since the last reset
    #[must_use]
    pub fn time_counter(&self) -> u64 {
        self.time_counter
    }

    /// Restart the simulator and load the initial vehicles into `registry`
    pub fn reset(&mut self, registry: &mut VehicleRegistry) -> SimResult<()> {
        self.simulator.reset()?;
        self.time_counter = 0;
        registry.clear();
        registry.refresh(self.simulator.vehicles()?, 0);
        Ok(())
    }

    /// Advance one step and read the new state into `registry`
    pub fn step(&mut self, registry: &mut VehicleRegistry) -> SimResult<StepReport> {
        let report = self.simulator.advance(self.sim_step)?;
        self.time_counter += 1;
        registry.refresh(self.simulator.vehicles()?, self.time_counter);
        Ok(report)
    }

    /// Apply dispatcher output, skipping vehicles that already left
    pub fn apply(&mut self, commands: &[VehicleCommand]) -> SimResult<()> {
        for command in commands {
            match command {
                VehicleCommand::Accelerate { id, value } => {
                    self.simulator.set_acceleration(id, *value).skip_missing()?;
                }
                VehicleCommand::ChangeLane { id, direction } => {
                    self.simulator
                        .set_lane_change_direction(id, *direction)
                        .skip_missing()?;
                }
            }
        }
        Ok(())
    }

    /// Current lane-change mode of a vehicle
    pub fn lane_change_mode(&self, id: &str) -> SimResult<u32> {
        self.simulator.lane_change_mode(id)
    }

    /// Replace the lane-change mode of a vehicle
    pub fn set_lane_change_mode(&mut self, id: &str, mode: u32) -> SimResult<()> {
        self.simulator.set_lane_change_mode(id, mode)
    }

    /// Current colour of a vehicle
    pub fn color(&self, id: &str) -> SimResult<Rgba> {
        self.simulator.color(id)
    }

    /// Change the colour of a vehicle
    pub fn set_color(&mut self, id: &str, color: Rgba) -> SimResult<()> {
        self.simulator.set_color(id, color)
    }

    /// Place a vehicle into the network
    pub fn inject(&mut self, injection: &Injection) -> SimResult<()> {
        self.simulator.inject(injection)
    }

    /// Broadcast a signal state
    pub fn set_signal_state(&mut self, signal_id: &str, state: &str) -> SimResult<()> {
        debug!(signal = signal_id, state, "signal state changed");
        self.simulator.set_signal_state(signal_id, state)
    }

    /// Emission log location
    #[must_use]
    pub fn emission_path(&self) -> Option<PathBuf> {
        self.simulator.emission_path()
    }

    /// Release the simulator; later calls are no-ops
    pub fn close(&mut self) -> SimResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.simulator.close()
    }
}

impl Drop for SimulationAdapter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(error = %e, "simulator close failed during drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use crate::vehicles::VehicleKind;

    fn adapter() -> SimulationAdapter {
        let mut sim = KinematicSimulator::new(Scenario::merge());
        sim.spawn(SpawnSpec::new("rl_0", VehicleKind::Rl, "inflow_highway", 0, 10.0, 5.0));
        SimulationAdapter::new(Box::new(sim), 1.0)
    }

    #[test]
    fn skip_missing_only_swallows_not_found() {
        let gone: SimResult<u32> = Err(SimError::VehicleNotFound("a".into()));
        assert!(matches!(gone.skip_missing(), Ok(None)));

        let broken: SimResult<u32> = Err(SimError::Backend(anyhow::anyhow!("socket closed")));
        assert!(broken.skip_missing().is_err());
    }

    #[test]
    fn backend_errors_keep_their_message() {
        let err: EnvError = SimError::Backend(anyhow::anyhow!("socket closed")).into();
        assert_eq!(err.to_string(), "socket closed");
        let err: EnvError = SimError::VehicleNotFound("a".into()).into();
        assert!(err.is_vehicle_not_found());
    }

    #[test]
    fn step_advances_counter_and_refreshes_registry() {
        let mut adapter = adapter();
        let mut registry = VehicleRegistry::new(1);
        adapter.reset(&mut registry).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(adapter.time_counter(), 0);

        adapter.step(&mut registry).unwrap();
        assert_eq!(adapter.time_counter(), 1);
        assert_eq!(registry.step(), 1);
        assert!(registry.x("rl_0").unwrap() > 10.0);
    }

    #[test]
    fn commands_for_missing_vehicles_are_skipped() {
        let mut adapter = adapter();
        let mut registry = VehicleRegistry::new(1);
        adapter.reset(&mut registry).unwrap();
        let commands = vec![
            VehicleCommand::Accelerate { id: "ghost".into(), value: 1.0 },
            VehicleCommand::ChangeLane { id: "ghost".into(), direction: 1 },
            VehicleCommand::Accelerate { id: "rl_0".into(), value: 1.0 },
        ];
        adapter.apply(&commands).unwrap();
    }

    #[test]
    fn close_is_idempotent() {
        let mut adapter = adapter();
        adapter.close().unwrap();
        adapter.close().unwrap();
    }
}
