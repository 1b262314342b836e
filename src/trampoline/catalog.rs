//! Static table of the signals the dispatcher handles.

use libc::c_int;

use crate::error::ErrorCategory;

/// One handled signal.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub signal: c_int,
    pub name: &'static str,
    pub category: ErrorCategory,
    /// Run the dispatcher on the emergency stack for this signal
    pub on_emergency_stack: bool,
    /// Terminate with the report even inside a protected region
    pub always_fatal: bool,
    /// First line of the report printed when this signal is fatal; `None`
    /// for signals that are queued instead
    pub fatal_message: Option<&'static str>,
}

/// Every signal the dispatcher is installed for.
pub const CATALOG: [CatalogEntry; 9] = [
    CatalogEntry {
        signal: libc::SIGHUP,
        name: "SIGHUP",
        category: ErrorCategory::Interrupted,
        on_emergency_stack: false,
        always_fatal: false,
        fatal_message: None,
    },
    CatalogEntry {
        signal: libc::SIGINT,
        name: "SIGINT",
        category: ErrorCategory::Interrupted,
        on_emergency_stack: false,
        always_fatal: false,
        fatal_message: None,
    },
    CatalogEntry {
        signal: libc::SIGALRM,
        name: "SIGALRM",
        category: ErrorCategory::TimedOut,
        on_emergency_stack: false,
        always_fatal: false,
        fatal_message: None,
    },
    // Quit dumps the report and backtrace on demand; never recovered.
    CatalogEntry {
        signal: libc::SIGQUIT,
        name: "SIGQUIT",
        category: ErrorCategory::Aborted,
        on_emergency_stack: true,
        always_fatal: true,
        fatal_message: None,
    },
    CatalogEntry {
        signal: libc::SIGFPE,
        name: "SIGFPE",
        category: ErrorCategory::FloatingPointError,
        on_emergency_stack: true,
        always_fatal: false,
        fatal_message: Some("Unhandled SIGFPE: an unhandled floating point exception occurred."),
    },
    CatalogEntry {
        signal: libc::SIGSEGV,
        name: "SIGSEGV",
        category: ErrorCategory::MemoryFault,
        on_emergency_stack: true,
        always_fatal: false,
        fatal_message: Some("Unhandled SIGSEGV: a segmentation fault occurred."),
    },
    CatalogEntry {
        signal: libc::SIGBUS,
        name: "SIGBUS",
        category: ErrorCategory::BusError,
        on_emergency_stack: true,
        always_fatal: false,
        fatal_message: Some("Unhandled SIGBUS: a bus error occurred."),
    },
    CatalogEntry {
        signal: libc::SIGABRT,
        name: "SIGABRT",
        category: ErrorCategory::Aborted,
        on_emergency_stack: true,
        always_fatal: false,
        fatal_message: Some("Unhandled SIGABRT: an abort() occurred."),
    },
    CatalogEntry {
        signal: libc::SIGILL,
        name: "SIGILL",
        category: ErrorCategory::IllegalInstruction,
        on_emergency_stack: true,
        always_fatal: false,
        fatal_message: Some("Unhandled SIGILL: an illegal instruction occurred."),
    },
];

/// Deferrable signals in replay priority order. Index into this table is
/// the slot index of the deferred queue.
pub const DEFERRABLE: [c_int; 3] = [libc::SIGHUP, libc::SIGINT, libc::SIGALRM];

/// Signals blocked while any dispatcher invocation runs and around the
/// check-then-wait sequence of `wait_for`.
pub(crate) fn interrupt_mask() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for &sig in &DEFERRABLE {
            libc::sigaddset(&mut set, sig);
        }
        set
    }
}

/// Async-signal-safe: a linear scan over a constant table.
#[inline]
pub fn lookup(signal: c_int) -> Option<&'static CatalogEntry> {
    CATALOG.iter().find(|entry| entry.signal == signal)
}

#[inline]
pub(crate) fn deferred_slot(signal: c_int) -> Option<usize> {
    DEFERRABLE.iter().position(|&s| s == signal)
}

pub fn signal_name(signal: c_int) -> &'static str {
    lookup(signal).map_or("unknown signal", |entry| entry.name)
}
