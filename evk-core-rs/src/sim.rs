//! Simulated analog front end
//!
//! Stands in for the ADC and PWM drivers: every conversion draws a 10-bit
//! sample from a shared, optionally seeded RNG and the adapters scale it
//! into physical units. A configurable failure rate exercises the loops'
//! degraded paths.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::config::{AnalogChannel, BatteryChannels, MotorChannel, SimConfig};
use crate::error::{PortError, PortResult};
use crate::port::{
    Actuator, AnalogSensor, BatterySensor, MotorActuator, Sensor, WheelSensor,
};
use crate::types::{clamp_unit, BatteryState, ChannelId, WheelSpeeds, WHEEL_COUNT};

/// Full-scale raw sample of the 10-bit converter
pub const ADC_MAX: u16 = 1023;

/// Shared simulated converter
#[derive(Clone)]
pub struct SimAdc {
    rng: Arc<Mutex<StdRng>>,
    failure_rate: f64,
}

impl SimAdc {
    /// Create a converter from the simulation config
    pub fn new(config: &SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Arc::new(Mutex::new(rng)),
            failure_rate: config.failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Convert one sample on `channel`
    pub fn sample(&self, channel: ChannelId) -> PortResult<u16> {
        let mut rng = self.rng.lock();
        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return Err(PortError::ReadFailed { channel });
        }
        Ok(rng.gen_range(0..=ADC_MAX))
    }

    /// Pedal travel sensor, `[0, 1]`
    pub fn pedal(&self) -> AnalogSensor {
        Box::new(SimAnalog::new(self.clone(), Scaling::Unit))
    }

    /// Sensor scaled linearly to `[0, max_value]`
    pub fn linear(&self) -> AnalogSensor {
        Box::new(SimAnalog::new(self.clone(), Scaling::Linear))
    }

    /// Sensor scaled to `[-max_value, max_value]`
    pub fn signed(&self) -> AnalogSensor {
        Box::new(SimAnalog::new(self.clone(), Scaling::Signed))
    }

    /// Battery SOC and temperature sensor
    pub fn battery(&self) -> BatterySensor {
        Box::new(SimBattery {
            adc: self.clone(),
            config: None,
        })
    }

    /// Wheel angular velocity sensor
    pub fn wheels(&self) -> WheelSensor {
        Box::new(SimWheels {
            adc: self.clone(),
            config: None,
        })
    }

    /// PWM motor driver
    pub fn motor(&self) -> MotorActuator {
        Box::new(SimMotor::default())
    }
}

fn fraction(raw: u16) -> f32 {
    raw as f32 / ADC_MAX as f32
}

// ============================================================================
// Analog sensors
// ============================================================================

/// Raw-to-physical conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// Fraction clamped into `[0, 1]`
    Unit,
    /// `[0, max]`
    Linear,
    /// `[-max, max]`
    Signed,
}

impl Scaling {
    /// Convert a raw sample for a channel with full-scale `max`
    pub fn apply(self, raw: u16, max: f32) -> f32 {
        let f = fraction(raw);
        match self {
            Scaling::Unit => clamp_unit(f),
            Scaling::Linear => f * max,
            Scaling::Signed => (2.0 * f - 1.0) * max,
        }
    }
}

/// Single-channel analog sensor
pub struct SimAnalog {
    adc: SimAdc,
    scaling: Scaling,
    config: Option<AnalogChannel>,
}

impl SimAnalog {
    pub fn new(adc: SimAdc, scaling: Scaling) -> Self {
        Self {
            adc,
            scaling,
            config: None,
        }
    }
}

impl Sensor for SimAnalog {
    type Config = AnalogChannel;
    type Value = f32;

    fn init(&mut self, config: &AnalogChannel) -> PortResult<()> {
        if !(config.max_value > 0.0) {
            return Err(PortError::InvalidConfig(format!(
                "channel {} full scale must be positive",
                config.channel
            )));
        }
        self.config = Some(*config);
        debug!("Sim: ADC channel {} configured ({:?})", config.channel, self.scaling);
        Ok(())
    }

    fn read(&mut self) -> PortResult<f32> {
        let config = self.config.ok_or(PortError::NotInitialized)?;
        let raw = self.adc.sample(config.channel)?;
        Ok(self.scaling.apply(raw, config.max_value))
    }

    fn config(&self) -> Option<&AnalogChannel> {
        self.config.as_ref()
    }
}

/// Battery SOC and temperature on two channels
pub struct SimBattery {
    adc: SimAdc,
    config: Option<BatteryChannels>,
}

impl Sensor for SimBattery {
    type Config = BatteryChannels;
    type Value = BatteryState;

    fn init(&mut self, config: &BatteryChannels) -> PortResult<()> {
        if config.soc_channel == config.temp_channel {
            return Err(PortError::InvalidConfig(format!(
                "SOC and temperature share channel {}",
                config.soc_channel
            )));
        }
        self.config = Some(*config);
        Ok(())
    }

    fn read(&mut self) -> PortResult<BatteryState> {
        let config = self.config.ok_or(PortError::NotInitialized)?;
        let soc = fraction(self.adc.sample(config.soc_channel)?) * 100.0;
        let temp = fraction(self.adc.sample(config.temp_channel)?) * config.temp_max_c;
        Ok(BatteryState::new(soc, temp))
    }

    fn config(&self) -> Option<&BatteryChannels> {
        self.config.as_ref()
    }
}

/// Four wheel speed channels, each scaled by its own full scale
pub struct SimWheels {
    adc: SimAdc,
    config: Option<[AnalogChannel; WHEEL_COUNT]>,
}

impl Sensor for SimWheels {
    type Config = [AnalogChannel; WHEEL_COUNT];
    type Value = WheelSpeeds;

    fn init(&mut self, config: &[AnalogChannel; WHEEL_COUNT]) -> PortResult<()> {
        self.config = Some(*config);
        Ok(())
    }

    fn read(&mut self) -> PortResult<WheelSpeeds> {
        let config = self.config.ok_or(PortError::NotInitialized)?;
        let mut speeds = [0.0; WHEEL_COUNT];
        for (speed, channel) in speeds.iter_mut().zip(config.iter()) {
            let raw = self.adc.sample(channel.channel)?;
            *speed = Scaling::Linear.apply(raw, channel.max_value);
        }
        Ok(speeds)
    }

    fn config(&self) -> Option<&[AnalogChannel; WHEEL_COUNT]> {
        self.config.as_ref()
    }
}

// ============================================================================
// Motor
// ============================================================================

/// PWM motor driver
#[derive(Default)]
pub struct SimMotor {
    config: Option<MotorChannel>,
    duty_percent: u16,
}

impl SimMotor {
    /// Duty cycle applied by the last accepted write
    pub fn duty_percent(&self) -> u16 {
        self.duty_percent
    }
}

impl Actuator for SimMotor {
    type Config = MotorChannel;

    fn init(&mut self, config: &MotorChannel) -> PortResult<()> {
        if !(config.max_torque_nm > 0.0) {
            return Err(PortError::InvalidConfig(
                "motor max torque must be positive".into(),
            ));
        }
        self.config = Some(*config);
        self.duty_percent = 0;
        info!(
            "Sim: motor on PWM channel {} (max {} Nm, period {} ms)",
            config.channel, config.max_torque_nm, config.pwm_period_ms
        );
        Ok(())
    }

    fn write(&mut self, value: f32) -> PortResult<()> {
        let config = self.config.ok_or(PortError::NotInitialized)?;
        if !(0.0..=config.max_torque_nm).contains(&value) {
            warn!(
                "Sim: torque {:.2} Nm out of range (max {} Nm)",
                value, config.max_torque_nm
            );
            return Err(PortError::WriteRejected {
                value,
                max: config.max_torque_nm,
            });
        }
        self.duty_percent = (value / config.max_torque_nm * 100.0) as u16;
        debug!(
            "Sim: motor torque {:.2} Nm on channel {} (duty {}%)",
            value, config.channel, self.duty_percent
        );
        Ok(())
    }

    fn config(&self) -> Option<&MotorChannel> {
        self.config.as_ref()
    }
}
