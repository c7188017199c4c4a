//! EVK Core Library
//!
//! Simulated electric-vehicle control kernel: torque arbitration,
//! regenerative braking and traction control loops sharing one vehicle
//! state store under a single exclusive lock.

pub mod error;
pub mod types;
pub mod config;
pub mod port;
pub mod sim;
pub mod state;
pub mod stats;
pub mod torque;
pub mod regen;
pub mod traction;
pub mod kernel;

pub use config::{KernelConfig, StationaryWheelPolicy};
pub use error::{ConfigError, InitError, KernelError, PortError, PortResult};
pub use kernel::{ControlLoop, Kernel, KernelReport, LoopReport, ShutdownHandle};
pub use port::{Actuator, FixedMotor, FixedPort, Sensor};
pub use regen::{RegenControl, RegenOutput, RegenPorts, RegenStatus};
pub use sim::SimAdc;
pub use state::{SharedState, Stamped, VehicleState};
pub use stats::{CycleStats, StatsRegistry};
pub use torque::{TorqueControl, TorqueOutput, TorquePorts};
pub use traction::{TractionAction, TractionControl, TractionOutput};
pub use types::*;
