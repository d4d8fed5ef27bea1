//! Per-cycle context boundary.
//!
//! A context is built fresh by the owning component before every
//! [`StateMachine::run`](crate::engine::StateMachine::run) and dropped right
//! after it. Handlers read the snapshot and issue commands through
//! [`WriteChannel`]s; the component takes the issued values afterwards and
//! forwards them to its outbound channel on the same cycle.
//!
//! Nothing in here is shared between threads. Slots use `Cell` so the
//! context can be passed by shared reference while still collecting writes.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ems_common::lifecycle::flags::StatusFlags;
use ems_common::lifecycle::state::StartStop;
use thiserror::Error;

// ─── Context ────────────────────────────────────────────────────────

/// Minimal contract every context fulfils.
pub trait Context {
    /// Identifier of the owning component, attached to every log record.
    fn component_id(&self) -> &str;
}

// ─── Clock ──────────────────────────────────────────────────────────

/// Source of "now" for timeout and debounce arithmetic.
///
/// Handlers never read the wall clock themselves; the owning component
/// samples a `Clock` once per cycle and stores the instant in the context.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Monotonic system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Controllable clock for tests and simulation.
///
/// Starts at the instant it was created and only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Cell::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.offset.set(self.offset.get() + by);
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Jump to `offset` after creation. Going backwards is allowed.
    pub fn set(&self, offset: Duration) {
        self.offset.set(offset);
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.offset.get()
    }

    /// The instant `offset` after creation, without moving the clock.
    pub fn at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset.get()
    }
}

impl<T: Clock + ?Sized> Clock for Rc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

// ─── Command Sinks ──────────────────────────────────────────────────

/// Failure reported by a command sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// No bus address is bound to this channel.
    #[error("channel '{0}' has no address configured")]
    NotConfigured(&'static str),
    /// The channel refused the value.
    #[error("write to '{channel}' rejected: {reason}")]
    Rejected {
        channel: &'static str,
        reason: String,
    },
}

/// Write-only command slot for one outbound channel.
///
/// `issue` stores the next write value; the last value issued in a cycle
/// wins. The owning component calls [`take`](Self::take) after the run.
#[derive(Debug)]
pub struct WriteChannel<T: Copy> {
    name: &'static str,
    configured: bool,
    refusal: Option<&'static str>,
    next: Cell<Option<T>>,
}

impl<T: Copy> WriteChannel<T> {
    /// A channel with an address bound.
    pub const fn new(name: &'static str) -> Self {
        Self::bound(name, true)
    }

    /// A channel without an address; every `issue` fails.
    pub const fn unbound(name: &'static str) -> Self {
        Self::bound(name, false)
    }

    pub const fn bound(name: &'static str, configured: bool) -> Self {
        Self {
            name,
            configured,
            refusal: None,
            next: Cell::new(None),
        }
    }

    /// A bound channel whose receiver currently refuses writes.
    pub const fn rejecting(name: &'static str, reason: &'static str) -> Self {
        Self {
            name,
            configured: true,
            refusal: Some(reason),
            next: Cell::new(None),
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub const fn is_configured(&self) -> bool {
        self.configured
    }

    /// Store `value` as the next write.
    pub fn issue(&self, value: T) -> Result<(), CommandError> {
        if !self.configured {
            return Err(CommandError::NotConfigured(self.name));
        }
        if let Some(reason) = self.refusal {
            return Err(CommandError::Rejected {
                channel: self.name,
                reason: reason.to_string(),
            });
        }
        self.next.set(Some(value));
        Ok(())
    }

    /// Value issued so far in this cycle, if any.
    #[inline]
    pub fn next_value(&self) -> Option<T> {
        self.next.get()
    }

    /// Remove and return the issued value.
    #[inline]
    pub fn take(&self) -> Option<T> {
        self.next.take()
    }
}

// ─── Published Status ───────────────────────────────────────────────

/// One-way published status of a component for one cycle.
///
/// The coarse start/stop status starts every cycle as `Undefined` and is set
/// by the RUNNING/STOPPED handlers. Status flags carry over between cycles;
/// the owning component seeds them and stores them back after the run.
#[derive(Debug)]
pub struct PublishedStatus {
    start_stop: Cell<StartStop>,
    flags: Cell<StatusFlags>,
}

impl PublishedStatus {
    pub fn new(flags: StatusFlags) -> Self {
        Self {
            start_stop: Cell::new(StartStop::Undefined),
            flags: Cell::new(flags),
        }
    }

    #[inline]
    pub fn publish(&self, value: StartStop) {
        self.start_stop.set(value);
    }

    #[inline]
    pub fn start_stop(&self) -> StartStop {
        self.start_stop.get()
    }

    #[inline]
    pub fn flags(&self) -> StatusFlags {
        self.flags.get()
    }

    pub fn raise(&self, flags: StatusFlags) {
        self.flags.set(self.flags.get() | flags);
    }

    pub fn clear(&self, flags: StatusFlags) {
        self.flags.set(self.flags.get() - flags);
    }
}

impl Default for PublishedStatus {
    fn default() -> Self {
        Self::new(StatusFlags::empty())
    }
}
