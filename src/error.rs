//! Error definitions.
//!
//! `ErrorCategory` is what a protected region reports after a signal unwinds
//! it. `Interrupt` carries the category together with the details the
//! dispatcher captured. `SetupError` covers installation, timers and the
//! init/teardown lifecycle.

use std::fmt;
use std::io;

use libc::c_int;

use crate::trampoline::catalog;

/// Why a protected region ended abnormally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Keyboard interrupt or hang-up.
    Interrupted,
    /// Floating-point or integer arithmetic trap.
    FloatingPointError,
    /// Invalid memory access, including primary stack overflow.
    MemoryFault,
    /// Misaligned or non-existent physical address.
    BusError,
    /// `abort()` was called.
    Aborted,
    /// The CPU refused to execute an instruction.
    IllegalInstruction,
    /// The alarm armed with `set_alarm` expired.
    TimedOut,
}

impl ErrorCategory {
    /// Categories that may be recorded and replayed later when no
    /// protected region is active. Everything else is fatal outside a region.
    pub fn is_deferrable(self) -> bool {
        matches!(self, ErrorCategory::Interrupted | ErrorCategory::TimedOut)
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCategory::Interrupted => "interrupted",
            ErrorCategory::FloatingPointError => "floating-point exception",
            ErrorCategory::MemoryFault => "segmentation fault",
            ErrorCategory::BusError => "bus error",
            ErrorCategory::Aborted => "aborted",
            ErrorCategory::IllegalInstruction => "illegal instruction",
            ErrorCategory::TimedOut => "alarm expired",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A signal caught inside a protected region (or replayed from the
/// deferred queue when a region was entered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    category: ErrorCategory,
    signal: c_int,
    message: Option<&'static str>,
    fault_address: Option<usize>,
    on_emergency_stack: bool,
}

impl Interrupt {
    pub(crate) fn new(category: ErrorCategory, signal: c_int) -> Self {
        Self {
            category,
            signal,
            message: None,
            fault_address: None,
            on_emergency_stack: false,
        }
    }

    pub(crate) fn with_message(mut self, message: Option<&'static str>) -> Self {
        self.message = message;
        self
    }

    pub(crate) fn with_fault(mut self, fault_address: Option<usize>, on_emergency_stack: bool) -> Self {
        self.fault_address = fault_address;
        self.on_emergency_stack = on_emergency_stack;
        self
    }

    /// Build the interrupt for a raw signal number, if it is one a
    /// protected region can recover from.
    pub fn from_signal(signal: c_int) -> Option<Self> {
        catalog::lookup(signal)
            .filter(|entry| !entry.always_fatal)
            .map(|entry| Self::new(entry.category, signal))
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// The raw signal number that was delivered.
    pub fn signal(&self) -> c_int {
        self.signal
    }

    /// Message attached with `enter_protected_with`, if any.
    pub fn message(&self) -> Option<&'static str> {
        self.message
    }

    /// Faulting address reported by the kernel for synchronous faults.
    pub fn fault_address(&self) -> Option<usize> {
        self.fault_address
    }

    /// Whether the dispatcher ran on the emergency stack when it caught
    /// this signal.
    pub fn handled_on_emergency_stack(&self) -> bool {
        self.on_emergency_stack
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = catalog::signal_name(self.signal);
        match self.message {
            Some(message) => write!(f, "{}: {} ({})", message, self.category, name),
            None => write!(f, "{} ({})", self.category, name),
        }
    }
}

impl std::error::Error for Interrupt {}

/// Errors from installing handlers, arming timers, or tearing down.
#[derive(Debug)]
pub enum SetupError {
    /// The thread-specific key for per-thread state could not be created.
    ThreadKey(io::Error),
    /// `sigaction` failed for a catalog signal.
    Sigaction { signal: c_int, source: io::Error },
    /// The emergency stack could not be mapped or registered.
    EmergencyStack(io::Error),
    /// Creating, arming or disarming the alarm timer failed.
    Timer(io::Error),
    /// `set_alarm` was given a non-finite or non-positive duration.
    InvalidAlarm(f64),
    /// `shutdown` was called from inside a protected region.
    RegionActive { depth: usize },
    /// `shutdown` was called while `block_interrupts` guards are alive.
    InterruptsBlocked { count: usize },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::ThreadKey(e) => write!(f, "cannot create thread-specific key: {}", e),
            SetupError::Sigaction { signal, source } => write!(
                f,
                "cannot install handler for {}: {}",
                catalog::signal_name(*signal),
                source
            ),
            SetupError::EmergencyStack(e) => write!(f, "cannot set up emergency stack: {}", e),
            SetupError::Timer(e) => write!(f, "alarm timer error: {}", e),
            SetupError::InvalidAlarm(seconds) => {
                write!(f, "alarm time must be positive and finite, got {}", seconds)
            }
            SetupError::RegionActive { depth } => {
                write!(f, "cannot shut down inside {} active protected region(s)", depth)
            }
            SetupError::InterruptsBlocked { count } => {
                write!(f, "cannot shut down while {} interrupt block(s) are held", count)
            }
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::ThreadKey(e)
            | SetupError::EmergencyStack(e)
            | SetupError::Timer(e)
            | SetupError::Sigaction { source: e, .. } => Some(e),
            SetupError::InvalidAlarm(_)
            | SetupError::RegionActive { .. }
            | SetupError::InterruptsBlocked { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_deferrable_categories() {
        assert!(ErrorCategory::Interrupted.is_deferrable());
        assert!(ErrorCategory::TimedOut.is_deferrable());
        assert!(!ErrorCategory::MemoryFault.is_deferrable());
        assert!(!ErrorCategory::Aborted.is_deferrable());
    }

    #[test]
    fn test_interrupt_display() {
        let plain = Interrupt::new(ErrorCategory::Interrupted, libc::SIGINT);
        assert_eq!(plain.to_string(), "interrupted (SIGINT)");

        let tagged = Interrupt::new(ErrorCategory::TimedOut, libc::SIGALRM)
            .with_message(Some("factoring"));
        assert_eq!(tagged.to_string(), "factoring: alarm expired (SIGALRM)");
    }

    #[test]
    fn test_from_signal() {
        let fault = Interrupt::from_signal(libc::SIGSEGV).unwrap();
        assert_eq!(fault.category(), ErrorCategory::MemoryFault);
        assert_eq!(fault.signal(), libc::SIGSEGV);
        assert!(Interrupt::from_signal(libc::SIGUSR1).is_none());
        assert!(Interrupt::from_signal(libc::SIGQUIT).is_none());
    }

    #[test]
    fn test_setup_error_source() {
        let err = SetupError::Sigaction {
            signal: libc::SIGINT,
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        assert!(err.to_string().starts_with("cannot install handler for SIGINT"));
        assert!(err.source().is_some());
        assert!(SetupError::InvalidAlarm(-1.0).source().is_none());
    }
}
