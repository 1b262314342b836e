//! Interruptible descriptor wait.
//!
//! Checking the deferred queue and then calling `select` leaves a window
//! in which an interrupt is recorded after the check but before the call
//! blocks. `wait_for` closes it by blocking the interrupt signals first,
//! checking, and then letting `pselect` swap the mask back atomically as
//! it starts waiting.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use super::catalog;
use super::context::{ORPHANS, ThreadContext};
use crate::error::Interrupt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Readable,
    Writable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Descriptors that became ready, in the order they were passed in.
    Ready(Vec<(RawFd, Interest)>),
    /// The timeout passed with nothing ready.
    Elapsed,
    /// The wait was cut short by a signal. `Some` when an interrupt or
    /// alarm is queued; it stays queued for the next protected region.
    Interrupted(Option<Interrupt>),
}

struct FdSet(libc::fd_set);

impl FdSet {
    fn new() -> Self {
        let mut raw = MaybeUninit::<libc::fd_set>::uninit();
        unsafe {
            libc::FD_ZERO(raw.as_mut_ptr());
            FdSet(raw.assume_init())
        }
    }

    fn insert(&mut self, fd: RawFd) {
        // SAFETY: fd was range-checked by `validate`.
        unsafe { libc::FD_SET(fd, &mut self.0) }
    }

    fn contains(&self, fd: RawFd) -> bool {
        // SAFETY: fd was range-checked by `validate`.
        unsafe { libc::FD_ISSET(fd, &self.0) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.0
    }
}

/// Blocks the interrupt signals for the calling thread and restores the
/// previous mask on drop.
struct SignalMaskGuard {
    previous: libc::sigset_t,
}

impl SignalMaskGuard {
    fn block_interrupts() -> io::Result<Self> {
        let mask = catalog::interrupt_mask();
        let mut previous: libc::sigset_t = unsafe { std::mem::zeroed() };
        let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &mask, &mut previous) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }
        Ok(Self { previous })
    }

    /// The mask to wait under: the caller's mask with the interrupt
    /// signals let through.
    fn wait_mask(&self) -> libc::sigset_t {
        let mut mask = self.previous;
        for &signal in &catalog::DEFERRABLE {
            unsafe { libc::sigdelset(&mut mask, signal) };
        }
        mask
    }
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        unsafe { libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut()) };
    }
}

fn validate(descriptors: &[(RawFd, Interest)]) -> io::Result<()> {
    for &(fd, _) in descriptors {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("descriptor {} out of range for select", fd),
            ));
        }
    }
    Ok(())
}

fn pending_interrupt() -> Option<Interrupt> {
    let signal = match ThreadContext::get() {
        Some(ctx) => ctx.peek_pending(),
        None => ORPHANS.peek(),
    };
    signal.and_then(Interrupt::from_signal)
}

fn to_timespec(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as _,
    }
}

/// Wait until one of `descriptors` is ready, `timeout` passes, or a
/// handled signal arrives.
///
/// Inside a protected region an interrupt or alarm ends the region as
/// usual and this call never returns. Outside one, it returns
/// `Interrupted` as soon as the signal is recorded, including one that
/// was already queued when the call started.
pub fn wait_for(descriptors: &[(RawFd, Interest)], timeout: Option<Duration>) -> io::Result<WaitOutcome> {
    validate(descriptors)?;

    let mut readable = FdSet::new();
    let mut writable = FdSet::new();
    let mut nfds = 0;
    for &(fd, interest) in descriptors {
        match interest {
            Interest::Readable => readable.insert(fd),
            Interest::Writable => writable.insert(fd),
        }
        nfds = nfds.max(fd + 1);
    }

    let guard = SignalMaskGuard::block_interrupts()?;
    if let Some(interrupt) = pending_interrupt() {
        return Ok(WaitOutcome::Interrupted(Some(interrupt)));
    }

    let wait_mask = guard.wait_mask();
    let timeout = timeout.map(to_timespec);
    let timeout_ptr = timeout.as_ref().map_or(ptr::null(), |t| t as *const libc::timespec);

    // SAFETY: the sets, timeout and mask all outlive the call.
    let ret = unsafe {
        libc::pselect(
            nfds,
            readable.as_mut_ptr(),
            writable.as_mut_ptr(),
            ptr::null_mut(),
            timeout_ptr,
            &wait_mask,
        )
    };

    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(WaitOutcome::Interrupted(pending_interrupt()));
        }
        return Err(err);
    }
    drop(guard);

    if ret == 0 {
        return Ok(WaitOutcome::Elapsed);
    }

    let ready = descriptors
        .iter()
        .copied()
        .filter(|&(fd, interest)| match interest {
            Interest::Readable => readable.contains(fd),
            Interest::Writable => writable.contains(fd),
        })
        .collect();
    Ok(WaitOutcome::Ready(ready))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_descriptors() {
        let err = wait_for(&[(-1, Interest::Readable)], Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        let too_big = libc::FD_SETSIZE as RawFd;
        let err = wait_for(&[(too_big, Interest::Writable)], Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_wait_mask_lets_interrupts_through() {
        let guard = SignalMaskGuard::block_interrupts().unwrap();
        let mask = guard.wait_mask();
        for &signal in &catalog::DEFERRABLE {
            assert_eq!(unsafe { libc::sigismember(&mask, signal) }, 0);
        }
    }
}
