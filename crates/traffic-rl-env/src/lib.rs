//! Reinforcement learning environments over a traffic microsimulator
//!
//! This crate provides:
//! - The simulator seam and an in-process kinematic simulator
//! - Vehicle registry and controlled-agent slot tracking
//! - Merge and toll bottleneck environments, single- and multi-agent
//! - An experiment loop with return bookkeeping

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod env;
pub mod experiment;
pub mod observation;
pub mod params;
pub mod reward;
pub mod scenario;
pub mod side_control;
pub mod simulation;
pub mod strategy;
pub mod tracker;
pub mod vehicles;

// Re-export environment types
pub use action::{ActionDispatcher, Dispatch, DispatchMode, TrafficAction, TrafficActionSpace};
pub use env::{EpisodeState, TrafficEnv};
pub use experiment::{EmissionConverter, Experiment, ReturnStats};
pub use observation::{Layout, ObservationBuilder, TrafficObservation, TrafficObservationSpace};
pub use params::{BottleneckParams, EnvKind, MergeParams};
pub use reward::{RewardEvaluator, RewardOutcome};
pub use scenario::{EdgeSpec, Scenario};
pub use side_control::{SideControlLoop, TollBooth};
pub use simulation::{
    CommandLog, Inflow, Injection, KinematicSimulator, Rgba, SimError, SimProbe, SimulationAdapter,
    Simulator, SkipMissing, SpawnSpec, StepReport, VehicleCommand,
};
pub use strategy::{BottleneckStrategy, MergeStrategy, ShapingStrategy};
pub use tracker::ControlledAgentTracker;
pub use vehicles::{EdgeRef, Vehicle, VehicleKind, VehicleRegistry, VehicleSnapshot};

// Re-export core types
pub use traffic_rl_core::{
    Action, ActionSpace, EnvError, Environment, EnvironmentConfig, Episode, Observation,
    ObservationSpace, Reward, Step, StepInfo,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        EnvKind, Experiment, KinematicSimulator, Scenario, Simulator, TrafficAction, TrafficEnv,
        TrafficObservation,
    };
    pub use traffic_rl_core::prelude::*;
}
