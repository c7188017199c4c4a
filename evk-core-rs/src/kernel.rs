//! Concurrency kernel
//!
//! Runs every registered control loop as its own tokio task:
//! - `init` once under the state lock; a failure marks the loop's slot
//!   degraded and the loop keeps running
//! - each cycle `update` runs under the state lock and its output is
//!   published into the loop's own slot before the lock is released
//! - the period sleep happens outside the lock and races the stop signal
//!
//! The lock serializes loops but imposes no ordering between them. Readers
//! use slot versions to tell fresh cross-loop data from stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::KernelConfig;
use crate::error::{InitError, KernelError};
use crate::regen::{RegenControl, RegenPorts};
use crate::sim::SimAdc;
use crate::state::{Publish, SharedState, VehicleState};
use crate::stats::StatsRegistry;
use crate::torque::{TorqueControl, TorquePorts};
use crate::traction::TractionControl;

/// A periodic control algorithm
pub trait ControlLoop: Send + 'static {
    /// Slice of the vehicle state this loop owns
    type Output: Publish;

    /// Name used in logs and stats
    fn name(&self) -> &'static str;

    /// One-time port setup, called under the state lock
    fn init(&mut self) -> Result<(), InitError>;

    /// One cycle: read ports and the shared view, compute, actuate
    fn update(&mut self, state: &VehicleState) -> Self::Output;
}

/// Stops every loop at its next suspension point
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// How one loop ended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopReport {
    pub name: &'static str,
    pub cycles: u64,
    /// Init failure the loop ran degraded with
    pub init_error: Option<String>,
}

/// Reports for every loop, in registration order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KernelReport {
    pub loops: Vec<LoopReport>,
}

impl KernelReport {
    pub fn get(&self, name: &str) -> Option<&LoopReport> {
        self.loops.iter().find(|report| report.name == name)
    }
}

struct LoopContext {
    state: SharedState,
    stats: StatsRegistry,
    period: Duration,
    max_cycles: Option<u64>,
    shutdown: watch::Receiver<bool>,
}

type SpawnFn = Box<dyn FnOnce(LoopContext) -> JoinHandle<LoopReport> + Send>;

struct Registered {
    name: &'static str,
    spawn: SpawnFn,
}

/// Owner of the shared state and the loop tasks
pub struct Kernel {
    state: SharedState,
    stats: StatsRegistry,
    period: Duration,
    max_cycles: Option<u64>,
    shutdown: Arc<watch::Sender<bool>>,
    loops: Vec<Registered>,
}

impl Kernel {
    pub fn new(period: Duration) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            state: SharedState::new(),
            stats: StatsRegistry::new(),
            period,
            max_cycles: None,
            shutdown: Arc::new(tx),
            loops: Vec::new(),
        }
    }

    pub fn from_config(config: &KernelConfig) -> Self {
        Self::new(config.period())
    }

    /// Kernel running all three loops against the simulated front end
    pub fn simulated(config: &KernelConfig) -> Self {
        let adc = SimAdc::new(&config.sim);
        let channels = &config.channels;

        let torque = TorqueControl::new(
            config.torque.clone(),
            channels.clone(),
            TorquePorts {
                throttle: adc.pedal(),
                speed: adc.linear(),
                load: adc.linear(),
                torque_sensor: adc.linear(),
                motor: adc.motor(),
            },
        );
        let regen = RegenControl::new(
            config.regen.clone(),
            channels.clone(),
            RegenPorts {
                brake: adc.pedal(),
                battery: adc.battery(),
                inclination: adc.signed(),
            },
        );
        let traction = TractionControl::new(config.traction.clone(), channels.clone(), adc.wheels());

        let mut kernel = Self::from_config(config);
        kernel.register(torque).register(regen).register(traction);
        kernel
    }

    /// Stop every loop after `cycles` updates
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }

    /// Add a loop; it starts with the kernel
    pub fn register<L: ControlLoop>(&mut self, control: L) -> &mut Self {
        let name = control.name();
        debug!("Registered {} loop", name);
        self.loops.push(Registered {
            name,
            spawn: Box::new(move |ctx| tokio::spawn(run_loop(control, ctx))),
        });
        self
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn stats(&self) -> StatsRegistry {
        self.stats.clone()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// Spawn every loop and wait for all of them to stop
    ///
    /// A panicking loop does not stop the others; the first task failure is
    /// returned once every task has been joined.
    pub async fn start(self) -> Result<KernelReport, KernelError> {
        if self.loops.is_empty() {
            return Err(KernelError::NoLoops);
        }

        let Kernel {
            state,
            stats,
            period,
            max_cycles,
            shutdown,
            loops,
        } = self;

        info!("Kernel starting {} loops (period {:?})", loops.len(), period);

        let handles: Vec<_> = loops
            .into_iter()
            .map(|registered| {
                let ctx = LoopContext {
                    state: state.clone(),
                    stats: stats.clone(),
                    period,
                    max_cycles,
                    shutdown: shutdown.subscribe(),
                };
                (registered.name, (registered.spawn)(ctx))
            })
            .collect();

        let mut report = KernelReport::default();
        let mut failure = None;
        for (name, handle) in handles {
            match handle.await {
                Ok(loop_report) => report.loops.push(loop_report),
                Err(e) => {
                    error!("{} loop task failed: {}", name, e);
                    if failure.is_none() {
                        failure = Some(KernelError::TaskFailed {
                            name,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        info!("Kernel stopped");
        match failure {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }
}

async fn run_loop<L: ControlLoop>(mut control: L, mut ctx: LoopContext) -> LoopReport {
    let name = control.name();

    let init_error = {
        let mut state = ctx.state.lock().await;
        let result = control.init();
        if result.is_err() {
            state.mark_degraded::<L::Output>();
        }
        result.err()
    };
    if let Some(e) = &init_error {
        warn!("{} loop running degraded: {}", name, e);
        ctx.stats.record_init_failure(name);
    }
    info!("{} loop started", name);

    let mut cycle = 0;
    loop {
        if *ctx.shutdown.borrow() {
            break;
        }

        let wait_start = Instant::now();
        let mut state = ctx.state.lock().await;
        let lock_wait = wait_start.elapsed();

        let compute_start = Instant::now();
        cycle += 1;
        let output = control.update(&state);
        state.publish(output, cycle);
        drop(state);
        ctx.stats.record_cycle(name, lock_wait, compute_start.elapsed());

        if ctx.max_cycles.is_some_and(|max| cycle >= max) {
            break;
        }

        tokio::select! {
            _ = sleep(ctx.period) => {}
            changed = ctx.shutdown.changed() => {
                if changed.is_err() || *ctx.shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("{} loop stopped after {} cycles", name, cycle);
    LoopReport {
        name,
        cycles: cycle,
        init_error: init_error.map(|e| e.to_string()),
    }
}
