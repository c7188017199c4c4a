//! EVK - Sensor/Actuator Port layer
//!
//! Ports are the boundary between control logic and (simulated) I/O:
//! - One-time init with an opaque channel configuration
//! - Ranged physical reads
//! - Torque writes for the motor actuator
//!
//! # Implementing a port
//!
//! ```ignore
//! struct MyThrottle { config: Option<AnalogChannel> }
//!
//! impl Sensor for MyThrottle {
//!     type Config = AnalogChannel;
//!     type Value = f32;
//!
//!     fn init(&mut self, config: &AnalogChannel) -> PortResult<()> {
//!         // Configure the ADC channel
//!     }
//!
//!     fn read(&mut self) -> PortResult<f32> {
//!         // Convert a raw sample into pedal travel
//!     }
//!
//!     // ... implement config()
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{AnalogChannel, BatteryChannels, MotorChannel};
use crate::error::{InitError, PortError, PortResult};
use crate::types::{BatteryState, WheelSpeeds, WHEEL_COUNT};

// ============================================================================
// Port Traits
// ============================================================================

/// Read-only port for one physical quantity
pub trait Sensor: Send {
    /// Static channel configuration
    type Config: Clone + Send;
    /// Physical value produced by a read
    type Value: Copy + Send;

    /// Configure the channel. Must be called exactly once before `read`.
    fn init(&mut self, config: &Self::Config) -> PortResult<()>;

    /// Read the current physical value
    ///
    /// Never blocks indefinitely.
    fn read(&mut self) -> PortResult<Self::Value>;

    /// Configuration stored by the last successful init
    fn config(&self) -> Option<&Self::Config>;
}

/// Write port for the torque actuator
pub trait Actuator: Send {
    /// Static channel configuration
    type Config: Clone + Send;

    /// Configure the channel. Must be called exactly once before `write`.
    fn init(&mut self, config: &Self::Config) -> PortResult<()>;

    /// Command a torque in Nm
    fn write(&mut self, value: f32) -> PortResult<()>;

    /// Configuration stored by the last successful init
    fn config(&self) -> Option<&Self::Config>;
}

/// Scalar analog sensor (pedals, speed, load, torque, inclination)
pub type AnalogSensor = Box<dyn Sensor<Config = AnalogChannel, Value = f32>>;

/// Battery SOC and temperature sensor
pub type BatterySensor = Box<dyn Sensor<Config = BatteryChannels, Value = BatteryState>>;

/// Four-channel wheel angular velocity sensor
pub type WheelSensor = Box<dyn Sensor<Config = [AnalogChannel; WHEEL_COUNT], Value = WheelSpeeds>>;

/// Motor torque actuator
pub type MotorActuator = Box<dyn Actuator<Config = MotorChannel>>;

/// Init a sensor, naming it in the error
pub fn init_sensor<S>(name: &'static str, port: &mut S, config: &S::Config) -> Result<(), InitError>
where
    S: Sensor + ?Sized,
{
    port.init(config).map_err(|e| InitError::new(name, e))?;
    debug!("{} port ready", name);
    Ok(())
}

/// Init an actuator, naming it in the error
pub fn init_actuator<A>(
    name: &'static str,
    port: &mut A,
    config: &A::Config,
) -> Result<(), InitError>
where
    A: Actuator + ?Sized,
{
    port.init(config).map_err(|e| InitError::new(name, e))?;
    debug!("{} port ready", name);
    Ok(())
}

/// Read a sensor, folding a failure into `None` with a warning
pub fn read_or_warn<S>(owner: &str, name: &str, port: &mut S) -> Option<S::Value>
where
    S: Sensor + ?Sized,
{
    match port.read() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: {} unavailable: {}", owner, name, e);
            None
        }
    }
}

// ============================================================================
// Fixed ports (for testing and scripted scenarios)
// ============================================================================

/// Sensor returning scripted values
///
/// The script is consumed one entry per read; the last entry repeats once
/// the script runs out.
pub struct FixedPort<C, V> {
    script: VecDeque<PortResult<V>>,
    last: PortResult<V>,
    fail_init: bool,
    config: Option<C>,
}

impl<C, V: Copy> FixedPort<C, V> {
    /// Always read `value`
    pub fn constant(value: V) -> Self {
        Self {
            script: VecDeque::new(),
            last: Ok(value),
            fail_init: false,
            config: None,
        }
    }

    /// Read each entry in turn, then repeat the last
    pub fn sequence(script: Vec<PortResult<V>>) -> Self {
        let mut script: VecDeque<_> = script.into();
        let last = script
            .pop_back()
            .unwrap_or(Err(PortError::ReadFailed { channel: 0 }));
        let mut port = Self {
            script,
            last: last.clone(),
            fail_init: false,
            config: None,
        };
        port.script.push_back(last);
        port
    }

    /// Every read fails
    pub fn failing() -> Self {
        Self::sequence(vec![Err(PortError::ReadFailed { channel: 0 })])
    }

    /// Reject init
    pub fn with_failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

impl<C, V> Sensor for FixedPort<C, V>
where
    C: Clone + Send,
    V: Copy + Send,
{
    type Config = C;
    type Value = V;

    fn init(&mut self, config: &C) -> PortResult<()> {
        if self.fail_init {
            return Err(PortError::InvalidConfig("scripted init failure".into()));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn read(&mut self) -> PortResult<V> {
        if self.config.is_none() {
            return Err(PortError::NotInitialized);
        }
        match self.script.pop_front() {
            Some(next) => {
                self.last = next.clone();
                next
            }
            None => self.last.clone(),
        }
    }

    fn config(&self) -> Option<&C> {
        self.config.as_ref()
    }
}

/// Torques accepted by a [`FixedMotor`], shared with the test that built it
pub type WriteLog = Arc<Mutex<Vec<f32>>>;

/// Motor that accepts any in-range torque and records it
pub struct FixedMotor {
    log: WriteLog,
    fail_init: bool,
    config: Option<MotorChannel>,
}

impl FixedMotor {
    /// Create a motor and the log its writes land in
    pub fn new() -> (Self, WriteLog) {
        let log = WriteLog::default();
        (
            Self {
                log: log.clone(),
                fail_init: false,
                config: None,
            },
            log,
        )
    }

    /// Reject init
    pub fn with_failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

impl Actuator for FixedMotor {
    type Config = MotorChannel;

    fn init(&mut self, config: &MotorChannel) -> PortResult<()> {
        if self.fail_init {
            return Err(PortError::InvalidConfig("scripted init failure".into()));
        }
        self.config = Some(*config);
        Ok(())
    }

    fn write(&mut self, value: f32) -> PortResult<()> {
        let config = self.config.ok_or(PortError::NotInitialized)?;
        if !(0.0..=config.max_torque_nm).contains(&value) {
            return Err(PortError::WriteRejected {
                value,
                max: config.max_torque_nm,
            });
        }
        self.log.lock().push(value);
        Ok(())
    }

    fn config(&self) -> Option<&MotorChannel> {
        self.config.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> AnalogChannel {
        AnalogChannel::new(0, 1.0)
    }

    #[test]
    fn test_read_before_init_fails() {
        let mut port: FixedPort<AnalogChannel, f32> = FixedPort::constant(0.5);
        assert_eq!(port.read(), Err(PortError::NotInitialized));

        port.init(&channel()).unwrap();
        assert_eq!(port.read(), Ok(0.5));
    }

    #[test]
    fn test_sequence_repeats_last() {
        let mut port: FixedPort<AnalogChannel, f32> = FixedPort::sequence(vec![
            Ok(0.1),
            Err(PortError::ReadFailed { channel: 0 }),
            Ok(0.3),
        ]);
        port.init(&channel()).unwrap();

        assert_eq!(port.read(), Ok(0.1));
        assert!(port.read().is_err());
        assert_eq!(port.read(), Ok(0.3));
        assert_eq!(port.read(), Ok(0.3));
    }

    #[test]
    fn test_init_twice_keeps_same_config() {
        let mut port: FixedPort<AnalogChannel, f32> = FixedPort::constant(0.0);
        port.init(&channel()).unwrap();
        let first = *port.config().unwrap();
        port.init(&channel()).unwrap();
        assert_eq!(port.config(), Some(&first));
    }

    #[test]
    fn test_fixed_motor_records_and_rejects() {
        let (mut motor, log) = FixedMotor::new();
        assert_eq!(motor.write(10.0), Err(PortError::NotInitialized));

        motor
            .init(&MotorChannel {
                channel: 1,
                max_torque_nm: 300.0,
                pwm_period_ms: 1000,
            })
            .unwrap();
        motor.write(40.0).unwrap();
        assert!(motor.write(301.0).is_err());
        assert!(motor.write(-1.0).is_err());

        assert_eq!(*log.lock(), vec![40.0]);
    }

    #[test]
    fn test_helpers_name_the_port() {
        let mut port: AnalogSensor = Box::new(FixedPort::<AnalogChannel, f32>::constant(1.0).with_failing_init());
        let err = init_sensor("brake", port.as_mut(), &channel()).unwrap_err();
        assert_eq!(err.port, "brake");

        let mut port: AnalogSensor = Box::new(FixedPort::<AnalogChannel, f32>::failing());
        init_sensor("speed", port.as_mut(), &channel()).unwrap();
        assert_eq!(read_or_warn("test", "speed", port.as_mut()), None);
    }

    #[test]
    fn test_failing_init() {
        let mut port: FixedPort<AnalogChannel, f32> =
            FixedPort::constant(1.0).with_failing_init();
        assert!(port.init(&channel()).is_err());
        assert!(port.config().is_none());
        assert_eq!(port.read(), Err(PortError::NotInitialized));
    }
}
