//! Fatal-signal path: report, restore default dispositions, re-raise.
//!
//! Reached only from the dispatcher, so everything here writes straight to
//! file descriptor 2 and touches no allocator or lock.

use std::sync::atomic::{AtomicBool, Ordering};

use super::catalog::{CATALOG, CatalogEntry};
use crate::config::Config;

static CRASH_QUIET: AtomicBool = AtomicBool::new(false);
static CRASH_BACKTRACE: AtomicBool = AtomicBool::new(cfg!(feature = "backtrace"));

const SEPARATOR: &str = "------------------------------------------------------------------------\n";
const REENTERED: &str = "An error occurred during signal handling.";
const EXPLANATION: &str = "This probably occurred because native code has a bug in it\n\
                           and is not properly wrapped in a protected region.\n\
                           The process will now terminate.\n";

/// Copy the report settings where the dispatcher can read them.
pub(crate) fn configure(config: &Config) {
    CRASH_QUIET.store(config.crash_quiet, Ordering::SeqCst);
    CRASH_BACKTRACE.store(config.crash_backtrace, Ordering::SeqCst);
    if config.crash_backtrace {
        backtrace::warm_up();
    }
}

fn write_stderr(text: &str) {
    let mut bytes = text.as_bytes();
    while !bytes.is_empty() {
        let n = unsafe { libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len()) };
        if n < 0 {
            if std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

/// Terminate the process because `entry` arrived where nothing can
/// recover from it.
pub(crate) fn die(entry: &CatalogEntry, reentered: bool) -> ! {
    // SAFETY: sigaction, pthread_sigmask, raise and _exit are all
    // async-signal-safe.
    unsafe {
        let mut unblock: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut unblock);
        for handled in &CATALOG {
            libc::signal(handled.signal, libc::SIG_DFL);
            libc::sigaddset(&mut unblock, handled.signal);
        }
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &unblock, std::ptr::null_mut());
    }

    if !CRASH_QUIET.load(Ordering::SeqCst) {
        write_stderr(SEPARATOR);
        if CRASH_BACKTRACE.load(Ordering::SeqCst) {
            backtrace::write_to(libc::STDERR_FILENO);
            write_stderr(SEPARATOR);
        }
        // A quit request has no message: the backtrace is the report.
        let message = if reentered { Some(REENTERED) } else { entry.fatal_message };
        if let Some(message) = message {
            write_stderr(message);
            write_stderr("\n");
            write_stderr(EXPLANATION);
            write_stderr(SEPARATOR);
        }
    }

    unsafe {
        libc::raise(entry.signal);
        // Still alive: the signal was ignored or blocked by someone else.
        libc::_exit(128 + entry.signal)
    }
}

#[cfg(all(
    feature = "backtrace",
    any(all(target_os = "linux", target_env = "gnu"), target_os = "macos")
))]
mod backtrace {
    use std::ffi::c_void;

    use libc::c_int;

    use crate::config::BACKTRACE_DEPTH;

    unsafe extern "C" {
        fn backtrace(buffer: *mut *mut c_void, size: c_int) -> c_int;
        fn backtrace_symbols_fd(buffer: *const *mut c_void, size: c_int, fd: c_int);
    }

    /// The first `backtrace` call loads the unwinder, which allocates; do it
    /// outside any handler.
    pub(super) fn warm_up() {
        let mut frames = [std::ptr::null_mut(); 4];
        unsafe { backtrace(frames.as_mut_ptr(), frames.len() as c_int) };
    }

    pub(super) fn write_to(fd: c_int) {
        let mut frames = [std::ptr::null_mut(); BACKTRACE_DEPTH];
        let depth = unsafe { backtrace(frames.as_mut_ptr(), frames.len() as c_int) };
        if depth > 0 {
            unsafe { backtrace_symbols_fd(frames.as_ptr(), depth, fd) };
        } else {
            super::write_stderr("(no backtrace available)\n");
        }
    }
}

#[cfg(not(all(
    feature = "backtrace",
    any(all(target_os = "linux", target_env = "gnu"), target_os = "macos")
)))]
mod backtrace {
    pub(super) fn warm_up() {}

    pub(super) fn write_to(_fd: libc::c_int) {
        super::write_stderr("(no backtrace available)\n");
    }
}
