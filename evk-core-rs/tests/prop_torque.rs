//! Property tests for torque arbitration
//!
//! Tests invariants for:
//! - Bounds: demand always within the configured torque range
//! - Monotonicity: heavy load never lowers the demand
//! - Derate: high speed never raises the demand

use evk_core::config::TorqueConfig;
use evk_core::torque::desired_torque;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn throttle() -> impl Strategy<Value = f32> {
    0.0f32..=1.0f32
}

fn speed() -> impl Strategy<Value = f32> {
    0.0f32..=200.0f32
}

fn load() -> impl Strategy<Value = f32> {
    0.0f32..=1000.0f32
}

fn reading(inner: impl Strategy<Value = f32>) -> impl Strategy<Value = Option<f32>> {
    prop::option::weighted(0.9, inner)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Demand stays within [min, max] for every input, including missing ones
    #[test]
    fn desired_within_bounds(
        throttle in reading(throttle()),
        speed in reading(speed()),
        load in reading(load()),
    ) {
        let config = TorqueConfig::default();
        let desired = desired_torque(throttle, speed, load, &config);
        prop_assert!(
            (config.min_torque_nm..=config.max_torque_nm).contains(&desired),
            "desired {} outside [{}, {}]",
            desired, config.min_torque_nm, config.max_torque_nm
        );
    }

    /// Raising load past the heavy threshold never lowers the demand
    #[test]
    fn heavy_load_monotonic(
        throttle in throttle(),
        speed in speed(),
        light in 0.0f32..=500.0f32,
        heavy in 500.5f32..=1000.0f32,
    ) {
        let config = TorqueConfig::default();
        let light_demand = desired_torque(Some(throttle), Some(speed), Some(light), &config);
        let heavy_demand = desired_torque(Some(throttle), Some(speed), Some(heavy), &config);
        prop_assert!(heavy_demand >= light_demand);
    }

    /// Crossing the derate speed never raises the demand
    #[test]
    fn derate_never_increases(
        throttle in throttle(),
        load in load(),
        slow in 0.0f32..=50.0f32,
        fast in 50.5f32..=200.0f32,
    ) {
        let config = TorqueConfig::default();
        let slow_demand = desired_torque(Some(throttle), Some(slow), Some(load), &config);
        let fast_demand = desired_torque(Some(throttle), Some(fast), Some(load), &config);
        prop_assert!(fast_demand <= slow_demand);
    }

    /// Missing throttle always commands the minimum
    #[test]
    fn missing_throttle_commands_min(speed in reading(speed()), load in reading(load())) {
        let config = TorqueConfig::default();
        prop_assert_eq!(desired_torque(None, speed, load, &config), config.min_torque_nm);
    }
}
