//! Published status bitflags.
//!
//! Set by the owning component or by handlers through the context, read by
//! downstream consumers. Never read back by the lifecycle engine.

use bitflags::bitflags;

bitflags! {
    /// Coarse per-device status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u16 {
        /// Last `run` of the state machine returned an error.
        const RUN_FAILED           = 0x0001;
        /// Bring-up did not finish within its time budget.
        const START_TIMEOUT        = 0x0002;
        /// A command sink has no address bound.
        const MISCONFIGURED        = 0x0004;
        /// A controlled stop was requested but is not supported.
        const STOP_NOT_SUPPORTED   = 0x0008;
        /// A phase-switch step timed out and was skipped.
        const PHASE_SWITCH_FAILED  = 0x0010;
        /// Equipment is in its power-saving sub-mode.
        const POWER_SAVING         = 0x0020;
        /// A phase switch is in progress.
        const PHASE_SWITCHING      = 0x0040;
    }
}

impl StatusFlags {
    /// Bits that indicate a condition an operator should look at.
    pub const WARNING_MASK: Self = Self::from_bits_truncate(
        Self::RUN_FAILED.bits()
            | Self::START_TIMEOUT.bits()
            | Self::MISCONFIGURED.bits()
            | Self::STOP_NOT_SUPPORTED.bits()
            | Self::PHASE_SWITCH_FAILED.bits(),
    );

    /// Returns true if any warning bit is set.
    #[inline]
    pub const fn has_warning(&self) -> bool {
        self.intersects(Self::WARNING_MASK)
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::empty()
    }
}
