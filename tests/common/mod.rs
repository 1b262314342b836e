//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A pthread handle that can be moved to a helper thread.
#[derive(Clone, Copy)]
pub struct ThreadHandle(libc::pthread_t);

// SAFETY: pthread_t is an opaque identifier; the helper only uses it for
// pthread_kill while the target is known to be alive.
unsafe impl Send for ThreadHandle {}

pub fn current_thread() -> ThreadHandle {
    ThreadHandle(unsafe { libc::pthread_self() })
}

impl ThreadHandle {
    pub fn signal(self, signal: libc::c_int) {
        unsafe {
            libc::pthread_kill(self.0, signal);
        }
    }
}

/// Deliver `signal` to the calling thread. Returns after the handler ran.
pub fn raise_here(signal: libc::c_int) {
    unsafe {
        libc::pthread_kill(libc::pthread_self(), signal);
    }
}

/// Send `signal` to `target` from a helper thread after `delay`. The
/// caller must join the handle before `target` exits.
pub fn signal_after(target: ThreadHandle, signal: libc::c_int, delay: Duration) -> JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(delay);
        target.signal(signal);
    })
}

/// Sends `signal` to a thread at random short intervals until dropped.
/// Dropping stops and joins the sender, so the target may exit afterwards.
pub struct SignalStorm {
    stop: Arc<AtomicBool>,
    sender: Option<JoinHandle<()>>,
}

impl SignalStorm {
    pub fn start(target: ThreadHandle, signal: libc::c_int) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let sender = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_micros(fastrand::u64(1..200)));
                target.signal(signal);
            }
        });
        Self {
            stop,
            sender: Some(sender),
        }
    }
}

impl Drop for SignalStorm {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(sender) = self.sender.take() {
            let _ = sender.join();
        }
    }
}

pub fn spin_until_signalled() {
    loop {
        std::hint::spin_loop();
    }
}

/// Create a pipe, returning (read end, write end).
pub fn pipe() -> (libc::c_int, libc::c_int) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");
    (fds[0], fds[1])
}

pub fn close(fd: libc::c_int) {
    unsafe {
        libc::close(fd);
    }
}
