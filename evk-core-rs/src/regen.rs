//! Regenerative brake loop
//!
//! Estimates the energy recoverable from braking and the SOC it would add:
//!
//! ```text
//! force     = (speed - speed_threshold) * brake_coefficient * brake_term
//! power     = force * speed * kinetic_efficiency
//! energy_wh = power * (regen_window_s / 3600) * charging_efficiency
//! delta_soc = energy_wh / battery_capacity_wh * 100
//! ```
//!
//! Charging is gated on speed, brake input and battery temperature. The force
//! is also adjusted for terrain (incline and load) every cycle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{BrakeInputConvention, ChannelMap, RegenConfig};
use crate::error::InitError;
use crate::kernel::ControlLoop;
use crate::port::{init_sensor, read_or_warn, AnalogSensor, BatterySensor};
use crate::state::VehicleState;
use crate::types::BatteryState;

const SECONDS_PER_HOUR: f32 = 3600.0;

/// Why regen did not engage this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveReason {
    SpeedUnavailable,
    /// Below `speed_threshold_kph`
    TooSlow,
    BrakeUnavailable,
    /// Below `brake_input_threshold`
    BrakeNotPressed,
}

/// Outcome of the activation and thermal gates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegenStatus {
    Inactive { reason: InactiveReason },
    /// Energy is flowing into the battery
    Charging { delta_soc: f32 },
    /// Battery at or above `max_battery_temp_c`; SOC left unchanged
    ThermalPaused { delta_soc: f32 },
    /// Active but the battery could not be read
    BatteryUnavailable { delta_soc: f32 },
}

impl Default for RegenStatus {
    fn default() -> Self {
        RegenStatus::Inactive {
            reason: InactiveReason::SpeedUnavailable,
        }
    }
}

impl RegenStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, RegenStatus::Inactive { .. })
    }
}

/// Recoverable energy estimate for one cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegenEnergy {
    pub force_n: f32,
    pub power_w: f32,
    pub energy_wh: f32,
}

/// Road grade classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Uphill,
    Downhill,
    #[default]
    Flat,
}

/// Regen force adjusted for road grade and load
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainAdjustment {
    pub terrain: Terrain,
    pub heavy_load: bool,
    pub adjusted_force_n: f32,
}

/// Published by the regen loop each cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegenOutput {
    /// Brake pedal as read
    pub brake_position: Option<f32>,
    /// Brake after a traction brake command was applied
    pub effective_brake: Option<f32>,
    pub inclination_deg: Option<f32>,
    /// Only read while regen is active
    pub battery: Option<BatteryState>,
    pub energy: RegenEnergy,
    pub status: RegenStatus,
    /// SOC after applying `delta_soc`, when charging
    pub soc_estimate: Option<f32>,
    pub terrain: TerrainAdjustment,
    /// A traction brake command was consumed this cycle
    pub traction_boosted: bool,
}

/// Brake input in the units the convention defines
fn brake_input(brake: f32, convention: BrakeInputConvention) -> f32 {
    match convention {
        BrakeInputConvention::Percent => brake * 100.0,
        BrakeInputConvention::LegacyFraction => brake,
    }
}

/// Energy recoverable at `speed_kph` with brake fraction `brake`
pub fn regen_energy(speed_kph: f32, brake: f32, config: &RegenConfig) -> RegenEnergy {
    let brake_term = brake_input(brake, config.brake_input_convention) / 100.0;
    let force_n = (speed_kph - config.speed_threshold_kph) * config.brake_coefficient * brake_term;
    let power_w = force_n * speed_kph * config.kinetic_efficiency;
    let energy_wh =
        power_w * (config.regen_window_s / SECONDS_PER_HOUR) * config.charging_efficiency;
    RegenEnergy {
        force_n,
        power_w,
        energy_wh,
    }
}

/// Check the speed and brake gates
pub fn activation(
    speed_kph: Option<f32>,
    brake: Option<f32>,
    config: &RegenConfig,
) -> Result<(), InactiveReason> {
    let speed = speed_kph.ok_or(InactiveReason::SpeedUnavailable)?;
    if speed < config.speed_threshold_kph {
        return Err(InactiveReason::TooSlow);
    }
    let brake = brake.ok_or(InactiveReason::BrakeUnavailable)?;
    if brake_input(brake, config.brake_input_convention) < config.brake_input_threshold {
        return Err(InactiveReason::BrakeNotPressed);
    }
    Ok(())
}

/// SOC gained from `energy_wh`, in percent
pub fn delta_soc(energy_wh: f32, config: &RegenConfig) -> f32 {
    energy_wh / config.battery_capacity_wh * 100.0
}

/// Apply `delta_soc` to the battery unless it is too hot
///
/// Returns the status and the resulting SOC estimate, which equals the
/// measured SOC when charging is paused.
pub fn apply_charge(battery: BatteryState, delta_soc: f32, config: &RegenConfig) -> (RegenStatus, f32) {
    if battery.temperature_c < config.max_battery_temp_c {
        let soc = (battery.soc_percent + delta_soc).clamp(0.0, 100.0);
        (RegenStatus::Charging { delta_soc }, soc)
    } else {
        (RegenStatus::ThermalPaused { delta_soc }, battery.soc_percent)
    }
}

/// Adjust the regen force for road grade and load
///
/// An unavailable load never counts as heavy.
pub fn terrain_adjust(
    force_n: f32,
    inclination_deg: f32,
    load_kg: Option<f32>,
    config: &RegenConfig,
) -> TerrainAdjustment {
    let heavy_load = load_kg.is_some_and(|load| load > config.heavy_load_kg);
    let mut adjusted = force_n * (1.0 + inclination_deg / 100.0);

    let terrain = if inclination_deg > config.inclination_threshold_deg {
        adjusted *= config.uphill_factor;
        if heavy_load {
            adjusted *= config.uphill_heavy_factor;
        }
        Terrain::Uphill
    } else if inclination_deg < -config.inclination_threshold_deg {
        adjusted *= config.downhill_factor;
        if heavy_load {
            adjusted *= config.downhill_heavy_factor;
        }
        Terrain::Downhill
    } else {
        if heavy_load {
            adjusted *= config.flat_heavy_factor;
        }
        Terrain::Flat
    };

    TerrainAdjustment {
        terrain,
        heavy_load,
        adjusted_force_n: adjusted,
    }
}

/// Ports owned by the regen loop
pub struct RegenPorts {
    pub brake: AnalogSensor,
    pub battery: BatterySensor,
    pub inclination: AnalogSensor,
}

/// Regenerative brake control loop
pub struct RegenControl {
    config: RegenConfig,
    channels: ChannelMap,
    ports: RegenPorts,
    /// Last good inclination, kept across failed reads
    last_inclination: Option<f32>,
    /// Last traction version whose brake command was consumed
    override_seen: u64,
}

impl RegenControl {
    pub fn new(config: RegenConfig, channels: ChannelMap, ports: RegenPorts) -> Self {
        Self {
            config,
            channels,
            ports,
            last_inclination: None,
            override_seen: 0,
        }
    }

    pub fn config(&self) -> &RegenConfig {
        &self.config
    }

    /// Fresh traction brake command, consumed at most once
    fn take_brake_command(&mut self, state: &VehicleState) -> Option<f32> {
        if !self.config.honor_traction_overrides {
            return None;
        }
        let traction = state.traction();
        if !traction.is_newer_than(self.override_seen) {
            return None;
        }
        self.override_seen = traction.version();
        traction.value().brake_command
    }
}

impl ControlLoop for RegenControl {
    type Output = RegenOutput;

    fn name(&self) -> &'static str {
        "regen"
    }

    fn init(&mut self) -> Result<(), InitError> {
        self.config.validate().map_err(InitError::calibration)?;
        init_sensor("brake", self.ports.brake.as_mut(), &self.channels.brake)?;
        init_sensor("battery", self.ports.battery.as_mut(), &self.channels.battery)?;
        init_sensor(
            "inclination",
            self.ports.inclination.as_mut(),
            &self.channels.inclination,
        )?;
        info!("Regen brake control initialized");
        Ok(())
    }

    fn update(&mut self, state: &VehicleState) -> RegenOutput {
        let brake = read_or_warn("regen", "brake", self.ports.brake.as_mut());
        let speed_kph = state.speed_kph();
        let load_kg = state.load_kg();

        let command = self.take_brake_command(state);
        let effective_brake = match (brake, command) {
            (Some(b), Some(cmd)) => Some(b.max(cmd)),
            (None, Some(cmd)) => Some(cmd),
            (b, None) => b,
        };
        debug!(
            "Regen inputs: brake={:?} (effective {:?}) speed={:?} kph load={:?} kg",
            brake, effective_brake, speed_kph, load_kg
        );

        let energy = match (speed_kph, effective_brake) {
            (Some(speed), Some(brake)) => regen_energy(speed, brake, &self.config),
            _ => RegenEnergy::default(),
        };

        let (status, battery, soc_estimate) =
            match activation(speed_kph, effective_brake, &self.config) {
                Err(reason) => {
                    info!("Regen inactive: {:?}", reason);
                    (RegenStatus::Inactive { reason }, None, None)
                }
                Ok(()) => {
                    let delta = delta_soc(energy.energy_wh, &self.config);
                    match read_or_warn("regen", "battery", self.ports.battery.as_mut()) {
                        Some(battery) => {
                            let (status, soc) = apply_charge(battery, delta, &self.config);
                            match status {
                                RegenStatus::ThermalPaused { .. } => warn!(
                                    "Regen: battery at {:.1} C, charging paused",
                                    battery.temperature_c
                                ),
                                _ => info!(
                                    "Regen: {:.3} Wh recovered, SOC {:.2}% -> {:.2}%",
                                    energy.energy_wh, battery.soc_percent, soc
                                ),
                            }
                            (status, Some(battery), Some(soc))
                        }
                        None => (RegenStatus::BatteryUnavailable { delta_soc: delta }, None, None),
                    }
                }
            };

        let inclination = read_or_warn("regen", "inclination", self.ports.inclination.as_mut());
        if inclination.is_some() {
            self.last_inclination = inclination;
        }
        let terrain = terrain_adjust(
            energy.force_n,
            self.last_inclination.unwrap_or(0.0),
            load_kg,
            &self.config,
        );
        debug!(
            "Regen terrain: {:?} heavy={} adjusted force {:.2} N",
            terrain.terrain, terrain.heavy_load, terrain.adjusted_force_n
        );

        RegenOutput {
            brake_position: brake,
            effective_brake,
            inclination_deg: self.last_inclination,
            battery,
            energy,
            status,
            soc_estimate,
            terrain,
            traction_boosted: command.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalogChannel, BatteryChannels};
    use crate::error::PortError;
    use crate::port::FixedPort;
    use crate::torque::TorqueOutput;
    use crate::traction::TractionOutput;

    fn fixed(value: f32) -> AnalogSensor {
        Box::new(FixedPort::<AnalogChannel, f32>::constant(value))
    }

    fn battery(soc: f32, temp: f32) -> BatterySensor {
        Box::new(FixedPort::<BatteryChannels, BatteryState>::constant(
            BatteryState::new(soc, temp),
        ))
    }

    fn control(brake: f32, battery_port: BatterySensor, incline: AnalogSensor) -> RegenControl {
        let ports = RegenPorts {
            brake: fixed(brake),
            battery: battery_port,
            inclination: incline,
        };
        let mut control = RegenControl::new(RegenConfig::default(), ChannelMap::default(), ports);
        control.init().unwrap();
        control
    }

    fn moving(speed: f32, load: f32) -> VehicleState {
        let mut state = VehicleState::default();
        state.publish(
            TorqueOutput {
                speed_kph: Some(speed),
                load_kg: Some(load),
                ..Default::default()
            },
            1,
        );
        state
    }

    #[test]
    fn test_too_slow_is_inactive() {
        let config = RegenConfig::default();
        assert_eq!(
            activation(Some(5.0), Some(0.9), &config),
            Err(InactiveReason::TooSlow)
        );
        assert_eq!(
            activation(None, Some(0.9), &config),
            Err(InactiveReason::SpeedUnavailable)
        );
        assert_eq!(
            activation(Some(50.0), None, &config),
            Err(InactiveReason::BrakeUnavailable)
        );
    }

    #[test]
    fn test_percent_convention_threshold() {
        let config = RegenConfig::default();
        assert_eq!(
            activation(Some(50.0), Some(0.05), &config),
            Err(InactiveReason::BrakeNotPressed)
        );
        assert_eq!(activation(Some(50.0), Some(0.1), &config), Ok(()));
    }

    #[test]
    fn test_legacy_convention_never_activates() {
        let config = RegenConfig {
            brake_input_convention: BrakeInputConvention::LegacyFraction,
            ..Default::default()
        };
        assert_eq!(
            activation(Some(80.0), Some(1.0), &config),
            Err(InactiveReason::BrakeNotPressed)
        );

        let legacy = regen_energy(60.0, 0.5, &config);
        let percent = regen_energy(60.0, 0.5, &RegenConfig::default());
        assert!((percent.force_n - legacy.force_n * 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_energy_model() {
        let config = RegenConfig::default();
        let energy = regen_energy(60.0, 0.5, &config);
        // (60 - 10) * 0.5 * 0.5
        assert!((energy.force_n - 12.5).abs() < 1e-4);
        assert!((energy.power_w - 600.0).abs() < 1e-2);
        let expected_wh = 600.0 * (5.0 / 3600.0) * 0.85;
        assert!((energy.energy_wh - expected_wh).abs() < 1e-4);
    }

    #[test]
    fn test_thermal_gate_keeps_soc() {
        let config = RegenConfig::default();
        let (status, soc) = apply_charge(BatteryState::new(60.0, 50.0), 1.5, &config);
        assert_eq!(status, RegenStatus::ThermalPaused { delta_soc: 1.5 });
        assert_eq!(soc, 60.0);

        let (status, soc) = apply_charge(BatteryState::new(99.5, 20.0), 1.5, &config);
        assert_eq!(status, RegenStatus::Charging { delta_soc: 1.5 });
        assert_eq!(soc, 100.0);
    }

    #[test]
    fn test_terrain_adjustment() {
        let config = RegenConfig::default();

        let flat = terrain_adjust(10.0, 0.0, Some(100.0), &config);
        assert_eq!(flat.terrain, Terrain::Flat);
        assert_eq!(flat.adjusted_force_n, 10.0);

        let flat_heavy = terrain_adjust(10.0, 0.0, Some(450.0), &config);
        assert!((flat_heavy.adjusted_force_n - 10.5).abs() < 1e-4);

        let uphill = terrain_adjust(10.0, 20.0, Some(450.0), &config);
        assert_eq!(uphill.terrain, Terrain::Uphill);
        assert!((uphill.adjusted_force_n - 10.0 * 1.2 * 1.2 * 1.1).abs() < 1e-3);

        let downhill = terrain_adjust(10.0, -20.0, None, &config);
        assert_eq!(downhill.terrain, Terrain::Downhill);
        assert!(!downhill.heavy_load);
        assert!((downhill.adjusted_force_n - 10.0 * 0.8 * 0.8).abs() < 1e-3);
    }

    #[test]
    fn test_update_slow_vehicle_reports_inactive() {
        let mut control = control(0.9, battery(50.0, 20.0), fixed(0.0));
        let output = control.update(&moving(5.0, 0.0));
        assert_eq!(
            output.status,
            RegenStatus::Inactive {
                reason: InactiveReason::TooSlow
            }
        );
        assert_eq!(output.battery, None);
        assert_eq!(output.soc_estimate, None);
    }

    #[test]
    fn test_update_charges_battery() {
        let mut control = control(0.5, battery(50.0, 20.0), fixed(0.0));
        let output = control.update(&moving(60.0, 0.0));

        let RegenStatus::Charging { delta_soc } = output.status else {
            panic!("expected charging, got {:?}", output.status);
        };
        assert!(delta_soc > 0.0);
        let soc = output.soc_estimate.unwrap();
        assert!((soc - (50.0 + delta_soc)).abs() < 1e-5);
    }

    #[test]
    fn test_update_hot_battery_pauses() {
        let mut control = control(0.5, battery(50.0, 55.0), fixed(0.0));
        let output = control.update(&moving(60.0, 0.0));
        assert!(matches!(output.status, RegenStatus::ThermalPaused { .. }));
        assert_eq!(output.soc_estimate, Some(50.0));
    }

    #[test]
    fn test_update_battery_unavailable() {
        let failing: BatterySensor = Box::new(FixedPort::<BatteryChannels, BatteryState>::failing());
        let mut control = control(0.5, failing, fixed(20.0));
        let output = control.update(&moving(60.0, 0.0));

        let RegenStatus::BatteryUnavailable { delta_soc } = output.status else {
            panic!("expected battery unavailable, got {:?}", output.status);
        };
        assert!(delta_soc > 0.0);
        assert_eq!(output.battery, None);
        assert_eq!(output.soc_estimate, None);

        // Terrain still follows the computed force
        assert!(output.energy.force_n > 0.0);
        assert_eq!(output.inclination_deg, Some(20.0));
        assert_eq!(output.terrain.terrain, Terrain::Uphill);
        assert!(output.terrain.adjusted_force_n > output.energy.force_n);
    }

    #[test]
    fn test_inclination_retained_across_failures() {
        let incline: AnalogSensor = Box::new(FixedPort::<AnalogChannel, f32>::sequence(vec![
            Ok(20.0),
            Err(PortError::ReadFailed { channel: 7 }),
        ]));
        let mut control = control(0.5, battery(50.0, 20.0), incline);
        let state = moving(60.0, 0.0);

        assert_eq!(control.update(&state).inclination_deg, Some(20.0));
        let second = control.update(&state);
        assert_eq!(second.inclination_deg, Some(20.0));
        assert_eq!(second.terrain.terrain, Terrain::Uphill);
    }

    #[test]
    fn test_traction_brake_command_raises_brake() {
        let mut control = control(0.05, battery(50.0, 20.0), fixed(0.0));
        let mut state = moving(60.0, 0.0);
        state.publish(
            TractionOutput {
                brake_command: Some(0.6),
                ..Default::default()
            },
            1,
        );

        let output = control.update(&state);
        assert_eq!(output.brake_position, Some(0.05));
        assert_eq!(output.effective_brake, Some(0.6));
        assert!(output.traction_boosted);
        assert!(output.status.is_active());

        let next = control.update(&state);
        assert_eq!(next.effective_brake, Some(0.05));
        assert!(!next.status.is_active());
    }
}
