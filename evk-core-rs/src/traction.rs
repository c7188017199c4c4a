//! Traction control loop
//!
//! Computes a slip ratio per wheel from its angular velocity and the vehicle
//! speed, then mitigates the worst slip:
//! - above `brake_threshold` the brake command is boosted
//! - above `slip_threshold` the throttle is cut
//!
//! Mitigated pedal commands are published as overrides for the torque and
//! regen loops to pick up on their next cycle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ChannelMap, StationaryWheelPolicy, TractionConfig};
use crate::error::InitError;
use crate::kernel::ControlLoop;
use crate::port::{init_sensor, read_or_warn, WheelSensor};
use crate::state::VehicleState;
use crate::types::{Wheel, WheelSpeeds, KPH_PER_MPS, WHEEL_COUNT};

/// Slip ratio of one wheel, clamped to `[0, 1]`
///
/// `None` when the wheel is stationary and the policy skips it.
pub fn slip_ratio(angular_velocity: f32, speed_kph: f32, config: &TractionConfig) -> Option<f32> {
    let surface = angular_velocity * config.wheel_radius_m;
    let ground = speed_kph / KPH_PER_MPS;

    if surface.abs() < config.stationary_epsilon_mps {
        return match config.stationary_policy {
            StationaryWheelPolicy::FullSlip => {
                let moving = ground.abs() >= config.stationary_epsilon_mps;
                Some(if moving { 1.0 } else { 0.0 })
            }
            StationaryWheelPolicy::Skip => None,
        };
    }

    let slip = (surface - ground).abs() / surface;
    Some(slip.clamp(0.0, 1.0))
}

/// Per-wheel slip and the worst wheel
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SlipReport {
    pub slip: [Option<f32>; WHEEL_COUNT],
    pub max_slip: f32,
    /// First wheel with the highest non-zero slip
    pub worst_wheel: Option<Wheel>,
}

/// Evaluate slip on every wheel
pub fn evaluate_slip(wheels: &WheelSpeeds, speed_kph: f32, config: &TractionConfig) -> SlipReport {
    let mut report = SlipReport::default();
    for wheel in Wheel::ALL {
        let slip = slip_ratio(wheels[wheel.index()], speed_kph, config);
        report.slip[wheel.index()] = slip;
        if let Some(slip) = slip {
            if slip > report.max_slip {
                report.max_slip = slip;
                report.worst_wheel = Some(wheel);
            }
        }
    }
    report
}

/// Mitigation chosen for the worst slip
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TractionAction {
    #[default]
    None,
    /// Brake boosted; `None` when the brake input was unavailable
    BrakeBoost { brake_command: Option<f32> },
    /// Throttle cut; `None` when the throttle input was unavailable
    ThrottleCut { throttle_limit: Option<f32> },
}

/// Choose the mitigation for `max_slip`
pub fn mitigate(
    max_slip: f32,
    throttle: Option<f32>,
    brake: Option<f32>,
    config: &TractionConfig,
) -> TractionAction {
    if max_slip > config.brake_threshold {
        TractionAction::BrakeBoost {
            brake_command: brake.map(|b| (b * config.brake_boost_factor).min(1.0)),
        }
    } else if max_slip > config.slip_threshold {
        TractionAction::ThrottleCut {
            throttle_limit: throttle.map(|t| t * config.throttle_cut_factor),
        }
    } else {
        TractionAction::None
    }
}

/// Published by the traction loop each cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TractionOutput {
    /// Last good wheel reading
    pub wheel_angular_velocity: Option<WheelSpeeds>,
    /// `None` when slip was not evaluated this cycle
    pub slip: Option<SlipReport>,
    pub action: TractionAction,
    /// Override for the torque loop
    pub throttle_limit: Option<f32>,
    /// Override for the regen loop
    pub brake_command: Option<f32>,
    /// Throttle and brake pressed together
    pub pedal_conflict: bool,
}

/// Traction control loop
pub struct TractionControl {
    config: TractionConfig,
    channels: ChannelMap,
    wheels: WheelSensor,
    last_wheels: Option<WheelSpeeds>,
}

impl TractionControl {
    pub fn new(config: TractionConfig, channels: ChannelMap, wheels: WheelSensor) -> Self {
        Self {
            config,
            channels,
            wheels,
            last_wheels: None,
        }
    }

    pub fn config(&self) -> &TractionConfig {
        &self.config
    }
}

impl ControlLoop for TractionControl {
    type Output = TractionOutput;

    fn name(&self) -> &'static str {
        "traction"
    }

    fn init(&mut self) -> Result<(), InitError> {
        self.config.validate().map_err(InitError::calibration)?;
        init_sensor("wheels", self.wheels.as_mut(), &self.channels.wheels)?;
        info!("Traction control initialized");
        Ok(())
    }

    fn update(&mut self, state: &VehicleState) -> TractionOutput {
        if let Some(wheels) = read_or_warn("traction", "wheel speeds", self.wheels.as_mut()) {
            self.last_wheels = Some(wheels);
        }

        let pedals = state.pedals();
        let pedal_conflict = pedals.conflicting();
        if pedal_conflict {
            warn!("Traction: throttle and brake pressed together");
        }

        let speed_kph = state.speed_kph();
        debug!(
            "Traction inputs: wheels={:?} speed={:?} kph pedals={:?}",
            self.last_wheels, speed_kph, pedals
        );

        let slip = match (self.last_wheels, speed_kph) {
            (Some(wheels), Some(speed)) => Some(evaluate_slip(&wheels, speed, &self.config)),
            (None, _) => {
                debug!("Traction: no wheel reading yet, slip skipped");
                None
            }
            (_, None) => {
                debug!("Traction: speed unavailable, slip skipped");
                None
            }
        };

        let action = match slip {
            Some(report) => mitigate(
                report.max_slip,
                pedals.throttle_position,
                pedals.brake_position,
                &self.config,
            ),
            None => TractionAction::None,
        };

        if let Some(report) = slip {
            match (action, report.worst_wheel) {
                (TractionAction::None, _) => {
                    debug!("Traction: max slip {:.3}, no action", report.max_slip)
                }
                (action, Some(wheel)) => info!(
                    "Traction: slip {:.3} on {} wheel, {:?}",
                    report.max_slip, wheel, action
                ),
                (action, None) => info!("Traction: {:?}", action),
            }
        }

        let (throttle_limit, brake_command) = match action {
            TractionAction::None => (None, None),
            TractionAction::BrakeBoost { brake_command } => (None, brake_command),
            TractionAction::ThrottleCut { throttle_limit } => (throttle_limit, None),
        };

        TractionOutput {
            wheel_angular_velocity: self.last_wheels,
            slip,
            action,
            throttle_limit,
            brake_command,
            pedal_conflict,
        }
    }
}
