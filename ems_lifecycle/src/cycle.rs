//! Fixed-period cycle runner.
//!
//! Every cycle samples the clock once and ticks each device in
//! configuration order with that instant. Pacing is drift-free with the
//! `rt` feature (`clock_nanosleep` on an absolute deadline) and approximate
//! otherwise (`std::thread::sleep` for the remainder of the period).
//!
//! An overrun is counted and logged. It never stops the loop: the agent's
//! cycles are long and a late cycle is still a correct one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::component::Device;
use crate::context::Clock;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// Cycle timing statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: u64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: u64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: u64,
    /// Running sum for average computation.
    pub sum_cycle_ns: u128,
    /// Number of overruns detected.
    pub overruns: u64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: u64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
        }
    }

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.cycle_count += 1;
        self.last_cycle_ns = ns;
        self.min_cycle_ns = self.min_cycle_ns.min(ns);
        self.max_cycle_ns = self.max_cycle_ns.max(ns);
        self.sum_cycle_ns += u128::from(ns);
    }

    /// Average cycle duration [ns], 0 before the first cycle.
    pub fn avg_cycle_ns(&self) -> u64 {
        if self.cycle_count == 0 {
            return 0;
        }
        u64::try_from(self.sum_cycle_ns / u128::from(self.cycle_count)).unwrap_or(u64::MAX)
    }

    /// Minimum cycle duration [ns], 0 before the first cycle.
    pub fn min_or_zero(&self) -> u64 {
        if self.cycle_count == 0 { 0 } else { self.min_cycle_ns }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Errors & RT Setup ──────────────────────────────────────────────

/// Errors during RT setup or cycle pacing.
#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),
    /// The configured period cannot be paced.
    #[error("invalid cycle period: {0:?}")]
    InvalidPeriod(Duration),
}

/// Lock all current and future memory pages.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(()) // No-op in simulation mode
}

/// Prepare the process for the cycle loop.
///
/// In simulation mode (no `rt` feature) this is a no-op.
pub fn rt_setup() -> Result<(), CycleError> {
    rt_mlockall()
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Drives every device once per period.
pub struct CycleRunner {
    devices: Vec<Box<dyn Device>>,
    clock: Box<dyn Clock>,
    period: Duration,
    stats: CycleStats,
}

impl CycleRunner {
    pub fn new(
        devices: Vec<Box<dyn Device>>,
        clock: Box<dyn Clock>,
        period: Duration,
    ) -> Result<Self, CycleError> {
        if period.is_zero() && cfg!(feature = "rt") {
            return Err(CycleError::InvalidPeriod(period));
        }
        Ok(Self {
            devices,
            clock,
            period,
            stats: CycleStats::new(),
        })
    }

    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn devices(&self) -> &[Box<dyn Device>] {
        &self.devices
    }

    /// One cycle: sample the clock and tick every device with that instant.
    ///
    /// Returns the instant the devices saw.
    pub fn tick_all(&mut self) -> Instant {
        let now = self.clock.now();
        for device in &mut self.devices {
            device.tick(now);
        }
        now
    }

    /// Run until `running` is cleared or `max_cycles` cycles completed.
    pub fn run(&mut self, running: &AtomicBool, max_cycles: Option<u64>) -> Result<(), CycleError> {
        info!(
            devices = self.devices.len(),
            period_ms = self.period.as_millis() as u64,
            "cycle loop started"
        );

        #[cfg(feature = "rt")]
        let result = self.run_rt_loop(running, max_cycles);

        #[cfg(not(feature = "rt"))]
        let result = self.run_sim_loop(running, max_cycles);

        info!(
            cycles = self.stats.cycle_count,
            overruns = self.stats.overruns,
            "cycle loop stopped"
        );
        result
    }

    fn finished(&self, running: &AtomicBool, max_cycles: Option<u64>) -> bool {
        !running.load(Ordering::SeqCst)
            || max_cycles.is_some_and(|max| self.stats.cycle_count >= max)
    }

    /// Time the cycle body and account for it.
    fn timed_cycle(&mut self) {
        let started = Instant::now();
        let now = self.tick_all();
        let elapsed = started.elapsed();

        self.stats.record(elapsed);
        if elapsed > self.period {
            self.stats.overruns += 1;
            warn!(
                cycle = self.stats.cycle_count,
                elapsed_ms = elapsed.as_millis() as u64,
                period_ms = self.period.as_millis() as u64,
                "cycle overrun"
            );
        }

        for device in &self.devices {
            debug!(
                component = device.id(),
                state = %device.debug_log(),
                flags = ?device.status_flags(),
                at = ?now,
                "device ticked"
            );
        }
    }

    /// Simulation cycle loop using `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self, running: &AtomicBool, max_cycles: Option<u64>) -> Result<(), CycleError> {
        while !self.finished(running, max_cycles) {
            let cycle_start = Instant::now();
            self.timed_cycle();

            if self.finished(running, max_cycles) {
                break;
            }
            if let Some(remaining) = self.period.checked_sub(cycle_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }

    /// RT cycle loop using `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self, running: &AtomicBool, max_cycles: Option<u64>) -> Result<(), CycleError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let period_ns = i64::try_from(self.period.as_nanos())
            .map_err(|_| CycleError::InvalidPeriod(self.period))?;
        let mut next_wake = clock_gettime(clock)
            .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;

        while !self.finished(running, max_cycles) {
            next_wake = timespec_add_ns(next_wake, period_ns);
            self.timed_cycle();

            if self.finished(running, max_cycles) {
                break;
            }
            // Interrupted sleeps (Ctrl+C) simply start the next check early.
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
        Ok(())
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

/// Add nanoseconds to a TimeSpec.
#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let total = ts.tv_nsec() + ns;
    let secs = ts.tv_sec() + total.div_euclid(1_000_000_000);
    let nanos = total.rem_euclid(1_000_000_000);
    TimeSpec::new(secs, nanos)
}

// ─── Tests ──────────────────────────────────────────────────────────
