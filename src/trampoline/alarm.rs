//! Alarm subsystem
//!
//! `set_alarm` arms a one-shot timer whose expiry raises SIGALRM, which the
//! dispatcher treats like any other handled signal: `TimedOut` at the
//! innermost checkpoint, or a deferred record when no region is active.
//!
//! On Linux each thread owns a POSIX timer aimed at that thread
//! (`SIGEV_THREAD_ID`), so alarms armed by different threads do not
//! interfere. Elsewhere the process-wide `ITIMER_REAL` timer is used.

use std::io;
use std::time::Duration;

use super::context::{ORPHANS, ThreadContext};
use super::lifecycle;
use crate::error::SetupError;

pub(crate) struct AlarmTimer {
    #[cfg(target_os = "linux")]
    timer: std::cell::Cell<Option<libc::timer_t>>,
}

impl AlarmTimer {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            timer: std::cell::Cell::new(None),
        }
    }

    #[cfg(target_os = "linux")]
    fn arm(&self, after: Duration) -> io::Result<()> {
        let timer = match self.timer.get() {
            Some(timer) => timer,
            None => {
                let timer = sys::create_thread_timer()?;
                self.timer.set(Some(timer));
                timer
            }
        };
        sys::set_timer(timer, after)
    }

    #[cfg(target_os = "linux")]
    fn disarm(&self) -> io::Result<()> {
        match self.timer.get() {
            Some(timer) => sys::set_timer(timer, Duration::ZERO),
            None => Ok(()),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn arm(&self, after: Duration) -> io::Result<()> {
        sys::set_real_timer(after)
    }

    #[cfg(not(target_os = "linux"))]
    fn disarm(&self) -> io::Result<()> {
        sys::set_real_timer(Duration::ZERO)
    }
}

#[cfg(target_os = "linux")]
impl Drop for AlarmTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            sys::delete_timer(timer);
        }
    }
}

fn to_timespec(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: duration.subsec_nanos() as _,
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use super::*;
    use std::ptr;

    pub fn create_thread_timer() -> io::Result<libc::timer_t> {
        let mut event: libc::sigevent = unsafe { std::mem::zeroed() };
        event.sigev_notify = libc::SIGEV_THREAD_ID;
        event.sigev_signo = libc::SIGALRM;
        event.sigev_notify_thread_id = unsafe { libc::syscall(libc::SYS_gettid) } as libc::pid_t;

        let mut timer: libc::timer_t = ptr::null_mut();
        // SAFETY: event and timer are valid for the duration of the call.
        if unsafe { libc::timer_create(libc::CLOCK_MONOTONIC, &mut event, &mut timer) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(timer)
    }

    /// A zero duration disarms the timer.
    pub fn set_timer(timer: libc::timer_t, after: Duration) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: to_timespec(Duration::ZERO),
            it_value: to_timespec(after),
        };
        if unsafe { libc::timer_settime(timer, 0, &spec, ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn delete_timer(timer: libc::timer_t) {
        unsafe { libc::timer_delete(timer) };
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::*;
    use std::ptr;

    /// A zero duration disarms the timer.
    pub fn set_real_timer(after: Duration) -> io::Result<()> {
        let spec = to_timespec(after);
        let value = libc::itimerval {
            it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
            it_value: libc::timeval {
                tv_sec: spec.tv_sec,
                tv_usec: (spec.tv_nsec / 1000) as libc::suseconds_t,
            },
        };
        if unsafe { libc::setitimer(libc::ITIMER_REAL, &value, ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Arm the alarm to expire after `seconds`, replacing any earlier deadline.
///
/// Expiry inside a protected region ends it with `TimedOut`; outside one it
/// is queued for the next region entry.
pub fn set_alarm(seconds: f64) -> Result<(), SetupError> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(SetupError::InvalidAlarm(seconds));
    }
    let after = Duration::try_from_secs_f64(seconds).map_err(|_| SetupError::InvalidAlarm(seconds))?;
    // Sub-nanosecond requests would otherwise disarm the timer.
    let after = after.max(Duration::from_nanos(1));

    lifecycle::ensure_initialized();
    let ctx = ThreadContext::current()
        .ok_or_else(|| SetupError::Timer(io::Error::other("no trampoline context for this thread")))?;
    ctx.alarm.arm(after).map_err(SetupError::Timer)
}

/// Disarm the alarm. No `TimedOut` from the cancelled deadline is
/// delivered afterwards, including one already queued.
pub fn cancel_alarm() -> Result<(), SetupError> {
    match ThreadContext::get() {
        Some(ctx) => {
            ctx.alarm.disarm().map_err(SetupError::Timer)?;
            ctx.pending.clear(libc::SIGALRM);
        }
        #[cfg(not(target_os = "linux"))]
        None => AlarmTimer::new().disarm().map_err(SetupError::Timer)?,
        #[cfg(target_os = "linux")]
        None => {}
    }
    ORPHANS.clear(libc::SIGALRM);
    Ok(())
}
