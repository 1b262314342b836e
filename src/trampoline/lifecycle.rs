//! Process-wide installation and teardown.
//!
//! Dispositions are installed once per process; per-thread state is
//! created lazily the first time a thread needs it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::catalog;
use super::context::{self, ThreadContext};
use super::dispatch::{self, SavedAction};
use super::report;
use crate::config::{Config, DEFAULT_EMERGENCY_STACK_SIZE};
use crate::error::SetupError;

struct Installed {
    /// Dispositions in place before `dispatch::install`
    previous: Vec<SavedAction>,
}

static STATE: Mutex<Option<Installed>> = Mutex::new(None);
static INSTALLED: AtomicBool = AtomicBool::new(false);
static EMERGENCY_STACK_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_EMERGENCY_STACK_SIZE);

/// Install the dispatcher with configuration read from the environment.
///
/// Idempotent: later calls return `Ok(())` without touching dispositions.
pub fn initialize() -> Result<(), SetupError> {
    initialize_with(Config::from_env())
}

/// Install the dispatcher with an explicit configuration. Ignored if the
/// process is already initialised.
pub fn initialize_with(config: Config) -> Result<(), SetupError> {
    let mut state = STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if state.is_some() {
        return Ok(());
    }

    let config = config.normalized();
    context::create_key().map_err(SetupError::ThreadKey)?;
    EMERGENCY_STACK_SIZE.store(config.emergency_stack_size, Ordering::SeqCst);
    report::configure(&config);

    let previous = dispatch::install()?;
    *state = Some(Installed { previous });
    INSTALLED.store(true, Ordering::SeqCst);
    drop(state);

    log::debug!(
        "signal trampoline installed (emergency stack {} bytes, quiet={}, backtrace={})",
        config.emergency_stack_size,
        config.crash_quiet,
        config.crash_backtrace
    );

    ThreadContext::current();
    Ok(())
}

/// Restore the dispositions that were in place before `initialize` and
/// release the calling thread's state.
///
/// Refused while the calling thread is inside a protected region or holds
/// an `InterruptBlock`.
///
/// Other threads keep their state until they exit. Calling this without a
/// prior `initialize` is a no-op.
pub fn shutdown() -> Result<(), SetupError> {
    if let Some(ctx) = ThreadContext::get() {
        let depth = ctx.depth();
        if depth > 0 {
            return Err(SetupError::RegionActive { depth });
        }
        let count = ctx.block_count();
        if count > 0 {
            return Err(SetupError::InterruptsBlocked { count });
        }
    }

    let mut state = STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let Some(installed) = state.take() else {
        return Ok(());
    };
    INSTALLED.store(false, Ordering::SeqCst);
    let restored = dispatch::restore(&installed.previous);
    drop(state);

    ThreadContext::release_current();
    log::debug!("signal trampoline removed");
    restored
}

/// Set up the calling thread's state ahead of its first protected region.
///
/// Useful for threads that should receive interrupts before they enter a
/// region, and for reporting setup failures eagerly.
pub fn prepare_thread() -> Result<(), SetupError> {
    ensure_initialized();
    match ThreadContext::current() {
        Some(_) => Ok(()),
        None => Err(SetupError::ThreadKey(std::io::Error::other(
            "thread-specific key unavailable",
        ))),
    }
}

/// Whether the dispatcher is installed and still owns the catalog
/// signals. Returns false if other code has replaced a disposition since.
pub fn is_initialized() -> bool {
    INSTALLED.load(Ordering::SeqCst)
        && catalog::CATALOG
            .iter()
            .all(|entry| dispatch::is_installed(entry.signal))
}

/// Whether the calling thread has an emergency stack, and so can recover
/// from a primary stack overflow inside a protected region.
pub fn thread_has_emergency_stack() -> bool {
    ThreadContext::get().is_some_and(|ctx| ctx.has_emergency_stack())
}

pub(crate) fn ensure_initialized() {
    if INSTALLED.load(Ordering::Acquire) {
        return;
    }
    if let Err(e) = initialize() {
        log::error!("failed to install signal trampoline: {}", e);
    }
}

pub(crate) fn emergency_stack_size() -> usize {
    EMERGENCY_STACK_SIZE.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent_and_reversible() {
        initialize_with(Config::default()).unwrap();
        assert!(is_initialized());
        assert!(dispatch::is_installed(libc::SIGINT));
        assert!(dispatch::is_installed(libc::SIGSEGV));

        let before = STATE.lock().unwrap().as_ref().map(|s| s.previous.len());
        initialize_with(Config::default()).unwrap();
        let after = STATE.lock().unwrap().as_ref().map(|s| s.previous.len());
        assert_eq!(before, after);

        shutdown().unwrap();
        assert!(!is_initialized());
        assert!(!dispatch::is_installed(libc::SIGINT));
        assert!(shutdown().is_ok());
    }
}
