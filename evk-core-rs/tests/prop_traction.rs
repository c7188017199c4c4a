//! Property tests for traction control
//!
//! Tests invariants for:
//! - Slip bounds: every evaluated wheel in [0, 1]
//! - Worst wheel: carries the maximum slip
//! - Mitigation: commands stay within pedal range

use evk_core::config::{StationaryWheelPolicy, TractionConfig};
use evk_core::traction::{evaluate_slip, mitigate, slip_ratio, TractionAction};
use evk_core::types::{WheelSpeeds, WHEEL_COUNT};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn angular_velocity() -> impl Strategy<Value = f32> {
    prop_oneof![
        1 => Just(0.0f32),
        1 => -1e-3f32..1e-3f32,
        8 => -50.0f32..150.0f32,
    ]
}

fn wheels() -> impl Strategy<Value = WheelSpeeds> {
    prop::array::uniform4(angular_velocity())
}

fn speed() -> impl Strategy<Value = f32> {
    0.0f32..=200.0f32
}

fn policy() -> impl Strategy<Value = StationaryWheelPolicy> {
    prop_oneof![
        Just(StationaryWheelPolicy::FullSlip),
        Just(StationaryWheelPolicy::Skip),
    ]
}

fn config_with(policy: StationaryWheelPolicy) -> TractionConfig {
    TractionConfig {
        stationary_policy: policy,
        ..Default::default()
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// CORE INVARIANT: slip is finite and within [0, 1]
    #[test]
    fn slip_within_unit_range(omega in angular_velocity(), speed in speed(), policy in policy()) {
        let config = config_with(policy);
        if let Some(slip) = slip_ratio(omega, speed, &config) {
            prop_assert!(slip.is_finite());
            prop_assert!((0.0..=1.0).contains(&slip), "slip {} out of range", slip);
        }
    }

    /// Only the skip policy leaves a wheel unevaluated
    #[test]
    fn full_slip_evaluates_every_wheel(wheels in wheels(), speed in speed()) {
        let report = evaluate_slip(&wheels, speed, &config_with(StationaryWheelPolicy::FullSlip));
        prop_assert!(report.slip.iter().all(Option::is_some));
    }

    /// The worst wheel holds the maximum slip
    #[test]
    fn worst_wheel_holds_max(wheels in wheels(), speed in speed(), policy in policy()) {
        let report = evaluate_slip(&wheels, speed, &config_with(policy));
        let max = report.slip.iter().flatten().fold(0.0f32, |acc, &s| acc.max(s));
        prop_assert_eq!(report.max_slip, max);
        match report.worst_wheel {
            Some(wheel) => prop_assert_eq!(report.slip[wheel.index()], Some(max)),
            None => prop_assert_eq!(max, 0.0),
        }
        prop_assert_eq!(report.slip.len(), WHEEL_COUNT);
    }

    /// Mitigated pedal commands stay within [0, 1]
    #[test]
    fn mitigation_within_pedal_range(
        max_slip in 0.0f32..=1.0f32,
        throttle in 0.0f32..=1.0f32,
        brake in 0.0f32..=1.0f32,
    ) {
        let config = TractionConfig::default();
        match mitigate(max_slip, Some(throttle), Some(brake), &config) {
            TractionAction::BrakeBoost { brake_command } => {
                let cmd = brake_command.unwrap();
                prop_assert!(max_slip > config.brake_threshold);
                prop_assert!(cmd >= brake && cmd <= 1.0);
            }
            TractionAction::ThrottleCut { throttle_limit } => {
                let limit = throttle_limit.unwrap();
                prop_assert!(max_slip > config.slip_threshold);
                prop_assert!(limit <= throttle && limit >= 0.0);
            }
            TractionAction::None => prop_assert!(max_slip <= config.slip_threshold),
        }
    }
}
