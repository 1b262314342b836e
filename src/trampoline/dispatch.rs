//! Signal dispatch handler
//!
//! `dispatch` is the function registered with the OS for every catalog
//! signal. It decides, for the thread it interrupted, whether to jump to the
//! innermost checkpoint, queue the signal, or terminate the process.
//!
//! # Async-Signal-Safety
//!
//! Only the following run inside the handler:
//! - `pthread_getspecific`, `sigaltstack`, `siglongjmp`
//! - atomic loads and stores
//! - on the fatal path: `sigaction`, `pthread_sigmask`, `write`, `raise`,
//!   `_exit`, and a libc backtrace that was warmed up at initialisation
//!
//! No allocation, no locks, no logging.

use std::ffi::c_void;
use std::io;
use std::ptr;

use libc::c_int;

use super::catalog::{self, CATALOG};
use super::checkpoint::Checkpoint;
use super::context::{ORPHANS, ThreadContext};
use super::report;
use crate::error::SetupError;

/// Disposition a catalog signal had before `install`.
pub(crate) type SavedAction = (c_int, libc::sigaction);

extern "C" fn dispatch(signal: c_int, info: *mut libc::siginfo_t, _ucontext: *mut c_void) {
    let Some(entry) = catalog::lookup(signal) else {
        return;
    };
    let saved_errno = errno::get();

    let Some(ctx) = ThreadContext::get() else {
        // This thread never entered a region: nothing to jump to.
        if ORPHANS.record(signal) {
            errno::set(saved_errno);
            return;
        }
        report::die(entry, false);
    };

    let reentered = ctx.enter_handler();
    let top = ctx.top();

    if entry.always_fatal {
        report::die(entry, reentered);
    }

    if entry.category.is_deferrable() {
        if !top.is_null() && !reentered && !ctx.interrupts_blocked() {
            // SAFETY: top is this thread's innermost live checkpoint.
            unsafe { Checkpoint::resume(top, signal, None) };
        }
        ctx.pending.record(signal);
        ctx.leave_handler(reentered);
        errno::set(saved_errno);
        return;
    }

    if !top.is_null() && !reentered {
        // SAFETY: as above.
        unsafe { Checkpoint::resume(top, signal, fault_address(signal, info)) };
    }

    report::die(entry, reentered);
}

/// Address reported by the kernel for a synchronous fault. Signals sent by
/// `kill`/`raise` carry no address.
fn fault_address(signal: c_int, info: *const libc::siginfo_t) -> Option<usize> {
    if info.is_null() || signal == libc::SIGABRT {
        return None;
    }
    // SAFETY: the kernel passes a valid siginfo_t with SA_SIGINFO.
    let info = unsafe { &*info };
    if info.si_code <= 0 {
        return None;
    }
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let addr = unsafe { info.si_addr() } as usize;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let addr = info.si_addr as usize;
    Some(addr)
}

/// Install `dispatch` for every catalog signal, returning the previous
/// dispositions. On failure the signals already changed are restored.
pub(crate) fn install() -> Result<Vec<SavedAction>, SetupError> {
    let mask = catalog::interrupt_mask();
    let mut previous = Vec::with_capacity(CATALOG.len());

    for entry in &CATALOG {
        // SAFETY: sa is fully initialised before use; old is an out-parameter.
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = dispatch as extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void)
                as libc::sighandler_t;
            sa.sa_mask = mask;
            sa.sa_flags = libc::SA_SIGINFO;
            if entry.on_emergency_stack {
                // A fault while handling a fault must reach the handler
                // again so it can report it.
                sa.sa_flags |= libc::SA_ONSTACK | libc::SA_NODEFER;
            }

            let mut old: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(entry.signal, &sa, &mut old) != 0 {
                let source = io::Error::last_os_error();
                let _ = restore(&previous);
                return Err(SetupError::Sigaction {
                    signal: entry.signal,
                    source,
                });
            }
            previous.push((entry.signal, old));
        }
    }

    Ok(previous)
}

/// Put back dispositions saved by `install`. Every entry is attempted; the
/// first failure is reported.
pub(crate) fn restore(previous: &[SavedAction]) -> Result<(), SetupError> {
    let mut first_error = None;
    for (signal, action) in previous {
        // SAFETY: action came from a successful sigaction query.
        if unsafe { libc::sigaction(*signal, action, ptr::null_mut()) } != 0 && first_error.is_none() {
            first_error = Some(SetupError::Sigaction {
                signal: *signal,
                source: io::Error::last_os_error(),
            });
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Whether `signal` is currently routed to `dispatch`.
pub(crate) fn is_installed(signal: c_int) -> bool {
    unsafe {
        let mut current: libc::sigaction = std::mem::zeroed();
        libc::sigaction(signal, ptr::null(), &mut current) == 0
            && current.sa_sigaction
                == dispatch as extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) as libc::sighandler_t
    }
}

mod errno {
    use libc::c_int;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn location() -> *mut c_int {
        unsafe { libc::__errno_location() }
    }

    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    fn location() -> *mut c_int {
        unsafe { libc::__error() }
    }

    #[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
    fn location() -> *mut c_int {
        unsafe { libc::__errno() }
    }

    pub(super) fn get() -> c_int {
        unsafe { *location() }
    }

    pub(super) fn set(value: c_int) {
        unsafe { *location() = value }
    }
}
