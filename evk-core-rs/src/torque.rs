//! Torque arbitration loop
//!
//! Turns throttle, speed and load into a torque demand, commands the motor
//! and reads the torque sensor back for an advisory comparison:
//! - Demand is `throttle * max_torque`
//! - Derated above `derate_speed_kph`
//! - Boosted by a fixed amount above `heavy_load_kg`
//! - Clamped to `[min_torque_nm, max_torque_nm]`
//!
//! Speed and load are published for the regen and traction loops.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ChannelMap, TorqueConfig};
use crate::error::InitError;
use crate::kernel::ControlLoop;
use crate::port::{init_actuator, init_sensor, read_or_warn, AnalogSensor, MotorActuator};
use crate::state::VehicleState;

/// Advisory from comparing the sensed torque with the demand
///
/// No closed-loop correction is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorqueAdvice {
    Increase,
    Decrease,
    /// Sensed torque matches, or is unavailable
    #[default]
    Hold,
}

impl TorqueAdvice {
    pub fn compare(desired: f32, actual: Option<f32>) -> Self {
        match actual {
            Some(actual) if actual < desired => TorqueAdvice::Increase,
            Some(actual) if actual > desired => TorqueAdvice::Decrease,
            _ => TorqueAdvice::Hold,
        }
    }
}

/// Published by the torque loop each cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TorqueOutput {
    /// Throttle as read from the pedal
    pub throttle_position: Option<f32>,
    /// Throttle after a traction limit was applied
    pub effective_throttle: Option<f32>,
    pub speed_kph: Option<f32>,
    pub load_kg: Option<f32>,
    pub desired_torque_nm: f32,
    pub actual_torque_nm: Option<f32>,
    /// Motor accepted the demand
    pub motor_accepted: bool,
    pub advice: TorqueAdvice,
    /// A traction throttle limit was consumed this cycle
    pub traction_limited: bool,
}

/// Torque demand for the given inputs
///
/// An unavailable throttle commands the minimum torque. An unavailable speed
/// or load never triggers the derate or the boost. Never panics on an invalid
/// calibration; the upper bound wins if the bounds are inverted.
pub fn desired_torque(
    throttle: Option<f32>,
    speed_kph: Option<f32>,
    load_kg: Option<f32>,
    config: &TorqueConfig,
) -> f32 {
    let Some(throttle) = throttle else {
        return config.min_torque_nm.min(config.max_torque_nm);
    };

    let mut desired = throttle * config.max_torque_nm;
    if speed_kph.is_some_and(|speed| speed > config.derate_speed_kph) {
        desired *= config.derate_factor;
    }
    if load_kg.is_some_and(|load| load > config.heavy_load_kg) {
        desired += config.heavy_load_boost_nm;
    }
    desired.max(config.min_torque_nm).min(config.max_torque_nm)
}

/// Ports owned by the torque loop
pub struct TorquePorts {
    pub throttle: AnalogSensor,
    pub speed: AnalogSensor,
    pub load: AnalogSensor,
    pub torque_sensor: AnalogSensor,
    pub motor: MotorActuator,
}

/// Torque arbitration control loop
pub struct TorqueControl {
    config: TorqueConfig,
    channels: ChannelMap,
    ports: TorquePorts,
    /// Last traction version whose throttle limit was consumed
    override_seen: u64,
}

impl TorqueControl {
    pub fn new(config: TorqueConfig, channels: ChannelMap, ports: TorquePorts) -> Self {
        Self {
            config,
            channels,
            ports,
            override_seen: 0,
        }
    }

    pub fn config(&self) -> &TorqueConfig {
        &self.config
    }

    /// Fresh traction throttle limit, consumed at most once
    fn take_throttle_limit(&mut self, state: &VehicleState) -> Option<f32> {
        if !self.config.honor_traction_overrides {
            return None;
        }
        let traction = state.traction();
        if !traction.is_newer_than(self.override_seen) {
            return None;
        }
        self.override_seen = traction.version();
        traction.value().throttle_limit
    }
}

impl ControlLoop for TorqueControl {
    type Output = TorqueOutput;

    fn name(&self) -> &'static str {
        "torque"
    }

    fn init(&mut self) -> Result<(), InitError> {
        self.config.validate().map_err(InitError::calibration)?;
        init_sensor("throttle", self.ports.throttle.as_mut(), &self.channels.throttle)?;
        init_sensor("speed", self.ports.speed.as_mut(), &self.channels.speed)?;
        init_sensor("load", self.ports.load.as_mut(), &self.channels.load)?;
        init_sensor(
            "torque sensor",
            self.ports.torque_sensor.as_mut(),
            &self.channels.torque_sensor,
        )?;
        init_actuator("motor", self.ports.motor.as_mut(), &self.channels.motor)?;
        info!("Torque control initialized");
        Ok(())
    }

    fn update(&mut self, state: &VehicleState) -> TorqueOutput {
        let throttle = read_or_warn("torque", "throttle", self.ports.throttle.as_mut());
        let speed_kph = read_or_warn("torque", "speed", self.ports.speed.as_mut());
        let load_kg = read_or_warn("torque", "load", self.ports.load.as_mut());
        debug!(
            "Torque inputs: throttle={:?} speed={:?} kph load={:?} kg",
            throttle, speed_kph, load_kg
        );

        let limit = self.take_throttle_limit(state);
        let effective_throttle = match (throttle, limit) {
            (Some(t), Some(limit)) => Some(t.min(limit)),
            (t, _) => t,
        };
        if let Some(limit) = limit {
            debug!("Torque: traction throttle limit {:.3}", limit);
        }

        let desired = desired_torque(effective_throttle, speed_kph, load_kg, &self.config);
        info!("Torque: desired {:.2} Nm", desired);

        let motor_accepted = match self.ports.motor.write(desired) {
            Ok(()) => true,
            Err(e) => {
                warn!("Torque: motor rejected {:.2} Nm: {}", desired, e);
                false
            }
        };

        let actual = read_or_warn("torque", "torque sensor", self.ports.torque_sensor.as_mut());
        let advice = TorqueAdvice::compare(desired, actual);
        if let Some(actual) = actual {
            debug!(
                "Torque: actual {:.2} Nm vs desired {:.2} Nm, advice {:?}",
                actual, desired, advice
            );
        }

        TorqueOutput {
            throttle_position: throttle,
            effective_throttle,
            speed_kph,
            load_kg,
            desired_torque_nm: desired,
            actual_torque_nm: actual,
            motor_accepted,
            advice,
            traction_limited: limit.is_some(),
        }
    }
}
