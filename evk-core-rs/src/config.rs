//! Configuration for the EVK kernel
//!
//! Defaults reproduce the reference drivetrain calibration. Every field can
//! be overridden from a JSON file; missing fields fall back to the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ChannelId, WHEEL_COUNT};

/// Complete kernel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Control period shared by all loops, in milliseconds
    pub period_ms: u64,

    pub torque: TorqueConfig,
    pub regen: RegenConfig,
    pub traction: TractionConfig,

    /// Static channel assignment for every port
    pub channels: ChannelMap,

    /// Simulated analog front end
    pub sim: SimConfig,
}

/// Torque arbitration calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorqueConfig {
    pub max_torque_nm: f32,
    pub min_torque_nm: f32,

    /// Above this speed the demand is derated
    pub derate_speed_kph: f32,
    pub derate_factor: f32,

    /// Above this load a fixed boost is added
    pub heavy_load_kg: f32,
    pub heavy_load_boost_nm: f32,

    /// Clamp the throttle to a fresh traction limit
    pub honor_traction_overrides: bool,
}

/// How the brake pedal fraction enters the regen force and activation gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrakeInputConvention {
    /// Pedal fraction is scaled to percent before use, so the force term is
    /// the fraction itself and the threshold is a percentage.
    #[default]
    Percent,
    /// Pedal fraction is used as-is: the force term is `fraction / 100` and
    /// the fraction is compared directly against the threshold.
    LegacyFraction,
}

/// Regenerative brake calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenConfig {
    /// Below this speed regen is inactive
    pub speed_threshold_kph: f32,
    pub brake_coefficient: f32,
    pub kinetic_efficiency: f32,
    pub charging_efficiency: f32,
    /// Integration window for recovered energy, in seconds
    pub regen_window_s: f32,
    pub battery_capacity_wh: f32,

    pub brake_input_threshold: f32,
    pub brake_input_convention: BrakeInputConvention,

    /// Charging pauses at or above this temperature
    pub max_battery_temp_c: f32,

    pub inclination_threshold_deg: f32,
    pub heavy_load_kg: f32,
    pub uphill_factor: f32,
    pub uphill_heavy_factor: f32,
    pub downhill_factor: f32,
    pub downhill_heavy_factor: f32,
    pub flat_heavy_factor: f32,

    /// Raise the brake input to a fresh traction brake command
    pub honor_traction_overrides: bool,
}

/// Slip ratio policy for a wheel whose surface speed is effectively zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationaryWheelPolicy {
    /// Full slip while the vehicle moves, zero slip when it is also stopped
    #[default]
    FullSlip,
    /// Leave the wheel out of the slip evaluation
    Skip,
}

/// Traction control calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TractionConfig {
    pub wheel_radius_m: f32,
    /// Above this slip the throttle is cut
    pub slip_threshold: f32,
    /// Above this slip the brake is boosted instead
    pub brake_threshold: f32,
    pub brake_boost_factor: f32,
    pub throttle_cut_factor: f32,

    pub stationary_policy: StationaryWheelPolicy,
    /// Surface speeds below this (m/s) count as stationary
    pub stationary_epsilon_mps: f32,
}

/// Analog channel with full-scale physical value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalogChannel {
    pub channel: ChannelId,
    pub max_value: f32,
}

impl AnalogChannel {
    pub const fn new(channel: ChannelId, max_value: f32) -> Self {
        Self { channel, max_value }
    }
}

/// Battery SOC and temperature channels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryChannels {
    pub soc_channel: ChannelId,
    pub temp_channel: ChannelId,
    pub temp_max_c: f32,
}

/// Motor PWM channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorChannel {
    pub channel: ChannelId,
    pub max_torque_nm: f32,
    pub pwm_period_ms: u32,
}

/// Static channel assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub throttle: AnalogChannel,
    pub speed: AnalogChannel,
    pub load: AnalogChannel,
    pub torque_sensor: AnalogChannel,
    pub brake: AnalogChannel,
    pub battery: BatteryChannels,
    pub inclination: AnalogChannel,
    pub wheels: [AnalogChannel; WHEEL_COUNT],
    pub motor: MotorChannel,
}

/// Simulated analog front end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
    /// Probability in `[0, 1]` that a single conversion fails
    pub failure_rate: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            period_ms: 1000,
            torque: TorqueConfig::default(),
            regen: RegenConfig::default(),
            traction: TractionConfig::default(),
            channels: ChannelMap::default(),
            sim: SimConfig::default(),
        }
    }
}

impl Default for TorqueConfig {
    fn default() -> Self {
        Self {
            max_torque_nm: 100.0,
            min_torque_nm: 0.0,
            derate_speed_kph: 50.0,
            derate_factor: 0.8,
            heavy_load_kg: 500.0,
            heavy_load_boost_nm: 10.0,
            honor_traction_overrides: true,
        }
    }
}

impl Default for RegenConfig {
    fn default() -> Self {
        Self {
            speed_threshold_kph: 10.0,
            brake_coefficient: 0.5,
            kinetic_efficiency: 0.8,
            charging_efficiency: 0.85,
            regen_window_s: 5.0,
            battery_capacity_wh: 50_000.0,
            brake_input_threshold: 10.0,
            brake_input_convention: BrakeInputConvention::Percent,
            max_battery_temp_c: 50.0,
            inclination_threshold_deg: 15.0,
            heavy_load_kg: 400.0,
            uphill_factor: 1.2,
            uphill_heavy_factor: 1.1,
            downhill_factor: 0.8,
            downhill_heavy_factor: 1.05,
            flat_heavy_factor: 1.05,
            honor_traction_overrides: true,
        }
    }
}

impl Default for TractionConfig {
    fn default() -> Self {
        Self {
            wheel_radius_m: 0.35,
            slip_threshold: 0.2,
            brake_threshold: 0.5,
            brake_boost_factor: 2.0,
            throttle_cut_factor: 0.5,
            stationary_policy: StationaryWheelPolicy::FullSlip,
            stationary_epsilon_mps: 1e-3,
        }
    }
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            throttle: AnalogChannel::new(0, 1.0),
            speed: AnalogChannel::new(1, 200.0),
            load: AnalogChannel::new(2, 1000.0),
            torque_sensor: AnalogChannel::new(3, 500.0),
            brake: AnalogChannel::new(4, 1.0),
            battery: BatteryChannels {
                soc_channel: 5,
                temp_channel: 6,
                temp_max_c: 50.0,
            },
            inclination: AnalogChannel::new(7, 30.0),
            wheels: [
                AnalogChannel::new(8, 150.0),
                AnalogChannel::new(9, 150.0),
                AnalogChannel::new(10, 150.0),
                AnalogChannel::new(11, 150.0),
            ],
            motor: MotorChannel {
                channel: 1,
                max_torque_nm: 300.0,
                pwm_period_ms: 1000,
            },
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: None,
            failure_rate: 0.0,
        }
    }
}

impl TorqueConfig {
    /// Torque bounds must be finite and ordered
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = (self.min_torque_nm, self.max_torque_nm);
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(ConfigError::Invalid(format!(
                "torque bounds invalid: min {} max {}",
                min, max
            )));
        }
        Ok(())
    }
}

impl RegenConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.battery_capacity_wh > 0.0) {
            return Err(ConfigError::Invalid(
                "battery_capacity_wh must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl TractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.wheel_radius_m > 0.0) {
            return Err(ConfigError::Invalid("wheel_radius_m must be positive".into()));
        }
        if !(self.slip_threshold < self.brake_threshold) {
            return Err(ConfigError::Invalid(format!(
                "slip_threshold {} must be below brake_threshold {}",
                self.slip_threshold, self.brake_threshold
            )));
        }
        Ok(())
    }
}

impl KernelConfig {
    /// Load and validate a JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Parse and validate a JSON config document
    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Control period
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Reject calibrations the loops cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(ConfigError::Invalid("period_ms must be positive".into()));
        }
        self.torque.validate()?;
        self.regen.validate()?;
        self.traction.validate()?;
        if !(0.0..=1.0).contains(&self.sim.failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "failure_rate {} outside [0, 1]",
                self.sim.failure_rate
            )));
        }
        Ok(())
    }

    /// Set the control period
    ///
    /// Periods are whole milliseconds: a non-zero period shorter than 1 ms
    /// becomes 1 ms, and longer periods truncate to the millisecond.
    pub fn with_period(mut self, period: Duration) -> Self {
        let millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        self.period_ms = if millis == 0 && !period.is_zero() { 1 } else { millis };
        self
    }

    /// Seed the simulated front end
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.sim.seed = Some(seed);
        self
    }

    /// Set the simulated conversion failure probability
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.sim.failure_rate = rate;
        self
    }

    /// Select how the brake pedal enters the regen computation
    pub fn with_brake_convention(mut self, convention: BrakeInputConvention) -> Self {
        self.regen.brake_input_convention = convention;
        self
    }

    /// Select the stationary-wheel slip policy
    pub fn with_stationary_policy(mut self, policy: StationaryWheelPolicy) -> Self {
        self.traction.stationary_policy = policy;
        self
    }

    /// Stop the torque and regen loops from applying traction overrides
    pub fn without_traction_overrides(mut self) -> Self {
        self.torque.honor_traction_overrides = false;
        self.regen.honor_traction_overrides = false;
        self
    }
}
