//! Toll booth and ramp meter control run after every simulator step

use indexmap::IndexMap;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::ops::Range;
use tracing::{debug, warn};

use crate::simulation::{Rgba, SimResult, SimulationAdapter, SkipMissing, LANE_CHANGE_RESTRICTED};
use crate::vehicles::VehicleRegistry;

const TOLL_LANES: usize = 4;
const MEAN_TOLL_WAIT_SECS: f64 = 15.0;
const MEAN_FAST_TRACK_WAIT_SECS: f64 = 3.0;
const REDRAW_STD_SECS: f64 = 1.0;
const INITIAL_STD_SECS: f64 = 4.0;

/// Where a zone starts and ends
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSpec {
    /// Name used in logs
    pub name: &'static str,
    /// Edge the vehicles queue on
    pub entry_edge: String,
    /// Edge that marks a vehicle as through
    pub exit_edge: String,
    /// Position on `entry_edge` past which a vehicle is held
    pub entry_threshold: f64,
    /// Colour of held vehicles
    pub highlight: Rgba,
    /// Lanes of `entry_edge` under control
    pub lanes: usize,
}

impl ZoneSpec {
    /// Toll booth between edges "1" and "2"
    #[must_use]
    pub fn toll(scaling: usize) -> Self {
        Self {
            name: "toll",
            entry_edge: "1".to_string(),
            exit_edge: "2".to_string(),
            entry_threshold: 10.0,
            highlight: Rgba::MAGENTA,
            lanes: TOLL_LANES * scaling,
        }
    }

    /// Ramp meter between edges "2" and "3"
    #[must_use]
    pub fn ramp_meter(scaling: usize) -> Self {
        Self {
            name: "ramp_meter",
            entry_edge: "2".to_string(),
            exit_edge: "3".to_string(),
            entry_threshold: 80.0,
            highlight: Rgba::CYAN,
            lanes: TOLL_LANES * scaling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Held {
    lane_change_mode: u32,
    color: Rgba,
}

/// Vehicles held inside one zone, with what to restore when they leave
#[derive(Debug, Clone)]
pub struct Zone {
    spec: ZoneSpec,
    held: IndexMap<String, Held>,
}

impl Zone {
    /// Empty zone
    #[must_use]
    pub fn new(spec: ZoneSpec) -> Self {
        Self {
            spec,
            held: IndexMap::new(),
        }
    }

    /// Whether `id` is held
    #[must_use]
    pub fn is_holding(&self, id: &str) -> bool {
        self.held.contains_key(id)
    }

    /// Number of vehicles held
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether no vehicle is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    fn clear(&mut self) {
        self.held.clear();
    }

    /// Restore vehicles that reached the exit edge and return them with
    /// their lane there
    fn release(&mut self, registry: &VehicleRegistry, adapter: &mut SimulationAdapter) -> SimResult<Vec<(String, usize)>> {
        let stale: Vec<String> = self
            .held
            .keys()
            .filter(|id| !registry.contains(id))
            .cloned()
            .collect();
        for id in stale {
            warn!(zone = self.spec.name, vehicle = %id, "held vehicle left the network, dropping its snapshot");
            self.held.shift_remove(&id);
        }

        let through: Vec<(String, usize)> = self
            .held
            .keys()
            .filter_map(|id| registry.get(id).ok())
            .filter(|v| v.state.edge.is(&self.spec.exit_edge))
            .map(|v| (v.state.id.clone(), v.state.lane))
            .collect();
        for (id, _) in &through {
            if let Some(held) = self.held.shift_remove(id) {
                adapter.set_color(id, held.color).skip_missing()?;
                adapter.set_lane_change_mode(id, held.lane_change_mode).skip_missing()?;
                debug!(zone = self.spec.name, vehicle = %id, "released");
            }
        }
        Ok(through)
    }

    /// Hold vehicles past the entry threshold; returns vehicles that were
    /// already held before this call, with lane and position
    fn capture(&mut self, registry: &VehicleRegistry, adapter: &mut SimulationAdapter) -> SimResult<Vec<(usize, f64)>> {
        let mut already = Vec::new();
        let candidates: Vec<(String, usize, f64)> = registry
            .on_edge(&self.spec.entry_edge)
            .filter(|v| v.state.lane < self.spec.lanes && v.state.position > self.spec.entry_threshold)
            .map(|v| (v.state.id.clone(), v.state.lane, v.state.position))
            .collect();

        for (id, lane, position) in candidates {
            if self.held.contains_key(&id) {
                already.push((lane, position));
                continue;
            }
            let Some(lane_change_mode) = adapter.lane_change_mode(&id).skip_missing()? else { continue };
            let Some(color) = adapter.color(&id).skip_missing()? else { continue };
            adapter.set_lane_change_mode(&id, LANE_CHANGE_RESTRICTED).skip_missing()?;
            adapter.set_color(&id, self.spec.highlight).skip_missing()?;
            debug!(zone = self.spec.name, vehicle = %id, lane, "held");
            self.held.insert(id, Held { lane_change_mode, color });
        }
        Ok(already)
    }
}

/// Normal wait-time draws, in steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitTimes {
    /// Mean wait at a regular toll lane
    pub toll_mean: f64,
    /// Mean wait at a fast-track lane
    pub fast_track_mean: f64,
    /// Spread of redraws after a release
    pub redraw_std: f64,
    /// Spread of the initial draws
    pub initial_std: f64,
}

impl WaitTimes {
    /// Default wait times converted to steps of `sim_step` seconds
    #[must_use]
    pub fn for_step(sim_step: f64) -> Self {
        Self {
            toll_mean: MEAN_TOLL_WAIT_SECS / sim_step,
            fast_track_mean: MEAN_FAST_TRACK_WAIT_SECS / sim_step,
            redraw_std: REDRAW_STD_SECS / sim_step,
            initial_std: INITIAL_STD_SECS / sim_step,
        }
    }
}

/// Draw from `N(mean, std)` clamped at 0
pub fn draw_wait<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    Normal::new(mean, std)
        .map_or(mean, |normal| normal.sample(rng))
        .max(0.0)
}

/// Remembers the last pushed signal state and reports changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalLatch {
    last: String,
}

impl SignalLatch {
    /// Record `state`; `true` if it differs from the previous one
    pub fn update(&mut self, state: &str) -> bool {
        if self.last == state {
            return false;
        }
        self.last = state.to_string();
        true
    }

    /// Last pushed state; empty before the first push
    #[must_use]
    pub fn current(&self) -> &str {
        &self.last
    }

    fn reset(&mut self) {
        self.last.clear();
    }
}

/// Toll booth lane counters and signal
#[derive(Debug, Clone)]
pub struct TollBooth {
    zone: Zone,
    counters: Vec<f64>,
    fast_track: Range<usize>,
    waits: WaitTimes,
    signal_id: String,
    signal_threshold: f64,
    latch: SignalLatch,
}

impl TollBooth {
    /// Booth for lane scaling `scaling` with initial counters drawn from `rng`
    pub fn new<R: Rng + ?Sized>(scaling: usize, waits: WaitTimes, rng: &mut R) -> Self {
        let spec = ZoneSpec::toll(scaling);
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let fast_track = {
            let s = scaling as f64;
            (1.5 * s).ceil() as usize..(2.6 * s).ceil() as usize
        };
        let mut booth = Self {
            counters: vec![0.0; spec.lanes],
            zone: Zone::new(spec),
            fast_track,
            waits,
            signal_id: "2".to_string(),
            signal_threshold: 50.0,
            latch: SignalLatch::default(),
        };
        booth.reset(rng);
        booth
    }

    /// Redraw every counter and forget held vehicles and the last signal
    pub fn reset<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for counter in &mut self.counters {
            *counter = draw_wait(rng, self.waits.toll_mean, self.waits.initial_std);
        }
        self.zone.clear();
        self.latch.reset();
    }

    /// Remaining wait per lane, in steps
    #[must_use]
    pub fn counters(&self) -> &[f64] {
        &self.counters
    }

    /// Lanes with the shorter wait
    #[must_use]
    pub fn fast_track(&self) -> Range<usize> {
        self.fast_track.clone()
    }

    /// Held vehicles
    #[must_use]
    pub fn zone(&self) -> &Zone {
        &self.zone
    }

    /// Last state sent to the signal
    #[must_use]
    pub fn signal_state(&self) -> &str {
        self.latch.current()
    }

    fn update<R: Rng + ?Sized>(
        &mut self,
        registry: &VehicleRegistry,
        adapter: &mut SimulationAdapter,
        rng: &mut R,
    ) -> SimResult<()> {
        for (_, lane) in self.zone.release(registry, adapter)? {
            let Some(counter) = self.counters.get_mut(lane) else { continue };
            let mean = if self.fast_track.contains(&lane) {
                self.waits.fast_track_mean
            } else {
                self.waits.toll_mean
            };
            *counter = draw_wait(rng, mean, self.waits.redraw_std);
        }

        let mut waiting = vec![false; self.counters.len()];
        for (lane, position) in self.zone.capture(registry, adapter)? {
            if position > self.signal_threshold {
                if let Some(flag) = waiting.get_mut(lane) {
                    *flag = true;
                }
            }
        }

        // one tick per lane and step, however many vehicles queue there
        let mut symbols = vec!['G'; self.counters.len()];
        for (lane, counter) in self.counters.iter_mut().enumerate() {
            if waiting[lane] && *counter > 0.0 {
                symbols[lane] = 'r';
                *counter = (*counter - 1.0).max(0.0);
            }
        }

        let state: String = symbols.into_iter().collect();
        if self.latch.update(&state) {
            adapter.set_signal_state(&self.signal_id, &state)?;
        }
        Ok(())
    }
}

/// The per-step side control of the bottleneck network
#[derive(Debug, Clone)]
pub struct SideControlLoop {
    toll: Option<TollBooth>,
    ramp: Option<Zone>,
}

impl SideControlLoop {
    /// Loop with each zone turned on unless disabled
    pub fn new<R: Rng + ?Sized>(
        scaling: usize,
        sim_step: f64,
        disable_tb: bool,
        disable_ramp_metering: bool,
        rng: &mut R,
    ) -> Self {
        Self {
            toll: (!disable_tb).then(|| TollBooth::new(scaling, WaitTimes::for_step(sim_step), rng)),
            ramp: (!disable_ramp_metering).then(|| Zone::new(ZoneSpec::ramp_meter(scaling))),
        }
    }

    /// Toll booth, if enabled
    #[must_use]
    pub fn toll(&self) -> Option<&TollBooth> {
        self.toll.as_ref()
    }

    /// Ramp meter zone, if enabled
    #[must_use]
    pub fn ramp(&self) -> Option<&Zone> {
        self.ramp.as_ref()
    }

    /// Fresh counters and empty zones for a new episode
    pub fn reset<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if let Some(toll) = &mut self.toll {
            toll.reset(rng);
        }
        if let Some(ramp) = &mut self.ramp {
            ramp.clear();
        }
    }

    /// Run both zones against the post-step state
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        registry: &VehicleRegistry,
        adapter: &mut SimulationAdapter,
        rng: &mut R,
    ) -> SimResult<()> {
        if let Some(toll) = &mut self.toll {
            toll.update(registry, adapter, rng)?;
        }
        if let Some(ramp) = &mut self.ramp {
            ramp.release(registry, adapter)?;
            ramp.capture(registry, adapter)?;
        }
        Ok(())
    }
}
