//! Core value types shared by the control loops

use serde::{Deserialize, Serialize};

/// Analog or PWM channel identifier
pub type ChannelId = u8;

/// Number of wheels on the vehicle
pub const WHEEL_COUNT: usize = 4;

/// Kilometres per hour to metres per second
pub const KPH_PER_MPS: f32 = 3.6;

/// Wheel position, in sensor order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    FrontRight,
    FrontLeft,
    RearRight,
    RearLeft,
}

impl Wheel {
    /// All wheels in sensor order
    pub const ALL: [Wheel; WHEEL_COUNT] = [
        Wheel::FrontRight,
        Wheel::FrontLeft,
        Wheel::RearRight,
        Wheel::RearLeft,
    ];

    /// Index into per-wheel arrays
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Wheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Wheel::FrontRight => write!(f, "front-right"),
            Wheel::FrontLeft => write!(f, "front-left"),
            Wheel::RearRight => write!(f, "rear-right"),
            Wheel::RearLeft => write!(f, "rear-left"),
        }
    }
}

/// Per-wheel angular velocity in rad/s
pub type WheelSpeeds = [f32; WHEEL_COUNT];

/// Pedal positions as fractions in `[0, 1]`. `None` means the last read failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PedalState {
    pub throttle_position: Option<f32>,
    pub brake_position: Option<f32>,
}

impl PedalState {
    /// Both pedals pressed at the same time
    pub fn conflicting(&self) -> bool {
        matches!(
            (self.throttle_position, self.brake_position),
            (Some(t), Some(b)) if t > 0.0 && b > 0.0
        )
    }
}

/// Vehicle motion as last observed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleKinematics {
    pub speed_kph: Option<f32>,
    pub wheel_angular_velocity: Option<WheelSpeeds>,
    pub inclination_deg: Option<f32>,
}

/// Battery reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub soc_percent: f32,
    pub temperature_c: f32,
}

impl BatteryState {
    pub fn new(soc_percent: f32, temperature_c: f32) -> Self {
        Self {
            soc_percent: soc_percent.clamp(0.0, 100.0),
            temperature_c,
        }
    }
}

/// Clamp a pedal reading into `[0, 1]`
pub fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_order() {
        assert_eq!(Wheel::FrontRight.index(), 0);
        assert_eq!(Wheel::RearLeft.index(), 3);
        assert_eq!(Wheel::ALL[2], Wheel::RearRight);
    }

    #[test]
    fn test_pedal_conflict() {
        let both = PedalState {
            throttle_position: Some(0.3),
            brake_position: Some(0.1),
        };
        assert!(both.conflicting());

        let failed_brake = PedalState {
            throttle_position: Some(0.3),
            brake_position: None,
        };
        assert!(!failed_brake.conflicting());
    }

    #[test]
    fn test_battery_soc_clamped() {
        assert_eq!(BatteryState::new(120.0, 20.0).soc_percent, 100.0);
        assert_eq!(BatteryState::new(-3.0, 20.0).soc_percent, 0.0);
    }
}
