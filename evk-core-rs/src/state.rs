//! Vehicle state store
//!
//! The store holds one stamped slot per control loop. A loop never writes
//! the store directly: its `update` returns a value of its own output type,
//! and the kernel publishes that value into the matching slot while holding
//! the lock. Every other slot is reachable only through `&VehicleState`, so
//! ownership of each field is fixed by type.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::regen::RegenOutput;
use crate::torque::TorqueOutput;
use crate::traction::TractionOutput;
use crate::types::{BatteryState, PedalState, VehicleKinematics};

/// A published value with freshness metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stamped<T> {
    value: T,
    /// Bumped on every publish; 0 means never published
    version: u64,
    /// Owner's cycle number at publish time
    cycle: u64,
    /// Owner's init failed; readings come from a degraded loop
    degraded: bool,
}

impl<T> Stamped<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether this slot was published after version `seen`
    pub fn is_newer_than(&self, seen: u64) -> bool {
        self.version > seen
    }
}

mod sealed {
    use super::{Stamped, VehicleState};

    pub trait SlotMut: Sized {
        fn slot_mut(state: &mut VehicleState) -> &mut Stamped<Self>;
    }
}

/// Output type that owns exactly one slot of the store
pub trait Publish: sealed::SlotMut + Clone + Send + 'static {
    /// Read access to the slot
    fn slot(state: &VehicleState) -> &Stamped<Self>;
}

macro_rules! slot {
    ($ty:ty, $field:ident) => {
        impl sealed::SlotMut for $ty {
            fn slot_mut(state: &mut VehicleState) -> &mut Stamped<Self> {
                &mut state.$field
            }
        }

        impl Publish for $ty {
            fn slot(state: &VehicleState) -> &Stamped<Self> {
                &state.$field
            }
        }
    };
}

slot!(TorqueOutput, torque);
slot!(RegenOutput, regen);
slot!(TractionOutput, traction);

/// Shared vehicle state, one slot per control loop
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VehicleState {
    torque: Stamped<TorqueOutput>,
    regen: Stamped<RegenOutput>,
    traction: Stamped<TractionOutput>,
}

impl VehicleState {
    /// Published by torque control: throttle, speed, load, torque
    pub fn torque(&self) -> &Stamped<TorqueOutput> {
        &self.torque
    }

    /// Published by regen brake control: brake, incline, battery
    pub fn regen(&self) -> &Stamped<RegenOutput> {
        &self.regen
    }

    /// Published by traction control: wheel speeds, slip, pedal overrides
    pub fn traction(&self) -> &Stamped<TractionOutput> {
        &self.traction
    }

    /// Slot owned by output type `T`
    pub fn slot<T: Publish>(&self) -> &Stamped<T> {
        T::slot(self)
    }

    /// Last vehicle speed from torque control
    pub fn speed_kph(&self) -> Option<f32> {
        self.torque.value.speed_kph
    }

    /// Last load from torque control
    pub fn load_kg(&self) -> Option<f32> {
        self.torque.value.load_kg
    }

    /// Pedal positions as last read by their owners
    pub fn pedals(&self) -> PedalState {
        PedalState {
            throttle_position: self.torque.value.throttle_position,
            brake_position: self.regen.value.brake_position,
        }
    }

    pub fn kinematics(&self) -> VehicleKinematics {
        VehicleKinematics {
            speed_kph: self.speed_kph(),
            wheel_angular_velocity: self.traction.value.wheel_angular_velocity,
            inclination_deg: self.regen.value.inclination_deg,
        }
    }

    pub fn battery(&self) -> Option<BatteryState> {
        self.regen.value.battery
    }

    /// Replace the slot owned by `T` and bump its version
    pub(crate) fn publish<T: Publish>(&mut self, value: T, cycle: u64) {
        let slot = T::slot_mut(self);
        slot.value = value;
        slot.version += 1;
        slot.cycle = cycle;
    }

    /// Flag the slot owned by `T` as coming from a loop whose init failed
    pub(crate) fn mark_degraded<T: Publish>(&mut self) {
        T::slot_mut(self).degraded = true;
    }
}

/// Handle to the store behind the kernel's single exclusive lock
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<VehicleState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the exclusive lock
    pub async fn lock(&self) -> MutexGuard<'_, VehicleState> {
        self.inner.lock().await
    }

    /// Consistent copy of the whole store
    pub async fn snapshot(&self) -> VehicleState {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_bumps_version() {
        let mut state = VehicleState::default();
        assert_eq!(state.torque().version(), 0);

        let output = TorqueOutput {
            speed_kph: Some(42.0),
            ..Default::default()
        };
        state.publish(output.clone(), 1);
        state.publish(output, 2);

        assert_eq!(state.torque().version(), 2);
        assert_eq!(state.torque().cycle(), 2);
        assert_eq!(state.speed_kph(), Some(42.0));
        assert_eq!(state.regen().version(), 0);
    }

    #[test]
    fn test_newer_than() {
        let mut state = VehicleState::default();
        assert!(!state.traction().is_newer_than(0));
        state.publish(TractionOutput::default(), 1);
        assert!(state.traction().is_newer_than(0));
        assert!(!state.traction().is_newer_than(1));
    }

    #[test]
    fn test_mark_degraded_only_touches_owner() {
        let mut state = VehicleState::default();
        state.mark_degraded::<RegenOutput>();
        assert!(state.regen().is_degraded());
        assert!(!state.torque().is_degraded());
        assert!(state.slot::<RegenOutput>().is_degraded());
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let shared = SharedState::new();
        let before = shared.snapshot().await;

        shared.lock().await.publish(TorqueOutput::default(), 1);

        assert_eq!(before.torque().version(), 0);
        assert_eq!(shared.snapshot().await.torque().version(), 1);
    }
}
