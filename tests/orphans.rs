//! Interrupts delivered to threads that never used a protected region.
//! A single test, since the orphan queue is process-wide.

use std::sync::mpsc;
use std::thread;

use sigtramp::{ErrorCategory, check_interrupts, enter_protected, initialize};

#[test]
fn test_interrupt_on_bare_thread_reaches_next_region() {
    initialize().unwrap();
    while check_interrupts().is_err() {}

    let (ready_tx, ready_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let bare = thread::spawn(move || {
        ready_tx.send(unsafe { libc::pthread_self() } as usize).unwrap();
        // Woken by the signal and then by the message; neither touches
        // this crate on this thread.
        let _ = done_rx.recv();
    });

    let target = ready_rx.recv().unwrap() as libc::pthread_t;
    assert_eq!(unsafe { libc::pthread_kill(target, libc::SIGINT) }, 0);
    done_tx.send(()).unwrap();
    bare.join().unwrap();

    let ran = std::cell::Cell::new(false);
    let err = enter_protected(|| ran.set(true)).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Interrupted);
    assert!(!ran.get());

    // Consumed by that entry.
    assert_eq!(enter_protected(|| 2), Ok(2));
    assert_eq!(check_interrupts(), Ok(()));
}
