//! Driver tuning knobs.
//!
//! Every timeout in the driver is an iteration count paired with a
//! per-iteration delay, and both halves are configurable separately.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BdmError;

/// Configuration handed to a device when it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BdmConfig {
    /// Number of delay ticks spent on each half of a serial clock cycle.
    ///
    /// Zero is the fastest setting and still correct, it only removes
    /// timing margin on slow targets.
    pub delay_ticks: u32,

    /// Bounded retry of words answered with "not ready".
    pub retry: RetryPolicy,

    /// Polling for the freeze indication after a CPU32 single step.
    pub freeze_poll: PollPolicy,

    /// Polling for the halt indication after asserting the breakpoint line.
    pub stop: StopPolicy,

    /// Sleeps of the reset pin sequence.
    pub reset: ResetTiming,

    /// Width of a pulse on the bus error line, in microseconds.
    pub bus_error_pulse_us: u64,

    /// Size of the per-device block transfer buffer, in bytes.
    pub io_buffer_size: usize,

    /// Decode ColdFire status from the PST lines instead of the CSR.
    pub use_pst: bool,

    /// Log every clocked frame at debug level instead of trace level.
    pub debug: bool,

    /// Timeout of a single USB control transfer, in milliseconds.
    pub usb_timeout_ms: u64,
}

impl Default for BdmConfig {
    fn default() -> Self {
        Self {
            delay_ticks: 0,
            retry: RetryPolicy::default(),
            freeze_poll: PollPolicy::default(),
            stop: StopPolicy::default(),
            reset: ResetTiming::default(),
            bus_error_pulse_us: 10,
            io_buffer_size: 4096,
            use_pst: false,
            debug: false,
            usb_timeout_ms: 1000,
        }
    }
}

impl BdmConfig {
    /// Parse a configuration from YAML. Missing keys keep their defaults.
    pub fn from_yaml(source: &str) -> Result<Self, BdmError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn bus_error_pulse(&self) -> Duration {
        Duration::from_micros(self.bus_error_pulse_us)
    }

    pub fn usb_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_timeout_ms)
    }
}

/// How often a word answered with "not ready" is clocked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Consecutive not-ready answers after which a bus error is forced.
    pub escalate_after: u32,
    /// Consecutive not-ready answers after which the exchange fails.
    pub give_up_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Tuned against the debug module hardware, keep them as they are.
        Self {
            escalate_after: 5,
            give_up_after: 6,
        }
    }
}

/// A fixed-iteration polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PollPolicy {
    pub iterations: u32,
    pub delay_us: u64,
}

impl PollPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_micros(self.delay_us)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            iterations: 1000,
            delay_us: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StopPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl StopPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            delay_ms: 10,
        }
    }
}

/// Sleeps between the steps of the reset sequence, in milliseconds.
///
/// The breakpoint line must still be asserted when reset is negated,
/// otherwise the target does not enter background mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResetTiming {
    /// All lines released before the sequence starts.
    pub settle_ms: u64,
    /// Reset and breakpoint asserted together.
    pub assert_ms: u64,
    /// Reset negated, breakpoint still asserted.
    pub hold_breakpoint_ms: u64,
    /// Everything released again.
    pub release_ms: u64,
}

impl ResetTiming {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn assert(&self) -> Duration {
        Duration::from_millis(self.assert_ms)
    }

    pub fn hold_breakpoint(&self) -> Duration {
        Duration::from_millis(self.hold_breakpoint_ms)
    }

    pub fn release(&self) -> Duration {
        Duration::from_millis(self.release_ms)
    }
}

impl Default for ResetTiming {
    fn default() -> Self {
        Self {
            settle_ms: 100,
            assert_ms: 500,
            hold_breakpoint_ms: 1500,
            release_ms: 500,
        }
    }
}
