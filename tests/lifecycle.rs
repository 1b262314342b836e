//! Installation and teardown. A single test, since dispositions are
//! process-wide.

use std::thread;

use sigtramp::{
    Config, ErrorCategory, SetupError, block_interrupts, enter_protected, initialize,
    initialize_with, is_initialized, prepare_thread, shutdown, thread_has_emergency_stack,
};

fn current_handler(signal: libc::c_int) -> libc::sighandler_t {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        assert_eq!(libc::sigaction(signal, std::ptr::null(), &mut action), 0);
        action.sa_sigaction
    }
}

#[test]
fn test_lifecycle() {
    let before_int = current_handler(libc::SIGINT);
    let before_segv = current_handler(libc::SIGSEGV);
    assert!(!is_initialized());

    initialize().unwrap();
    assert!(is_initialized());
    let installed = current_handler(libc::SIGINT);
    assert_ne!(installed, before_int);
    assert_eq!(current_handler(libc::SIGSEGV), installed);

    // A second call changes nothing, even with another configuration.
    initialize_with(Config {
        crash_quiet: true,
        ..Config::default()
    })
    .unwrap();
    assert_eq!(current_handler(libc::SIGINT), installed);

    // Refused while a region is active on this thread.
    let inner = enter_protected(shutdown).unwrap();
    match inner {
        Err(SetupError::RegionActive { depth }) => assert_eq!(depth, 1),
        other => panic!("shutdown inside a region returned {:?}", other),
    }
    assert!(is_initialized());

    // Threads get their own state.
    thread::spawn(|| {
        prepare_thread().unwrap();
        assert!(thread_has_emergency_stack());
    })
    .join()
    .unwrap();

    shutdown().unwrap();
    assert!(!is_initialized());
    assert_eq!(current_handler(libc::SIGINT), before_int);
    assert_eq!(current_handler(libc::SIGSEGV), before_segv);
    assert!(!thread_has_emergency_stack());
    shutdown().unwrap();

    // Entering a region reinstalls lazily.
    assert_eq!(enter_protected(|| 9), Ok(9));
    assert!(is_initialized());
    assert!(thread_has_emergency_stack());

    // Refused while an interrupt block is held, so the guard never
    // outlives the state it counts in.
    let guard = block_interrupts();
    match shutdown() {
        Err(SetupError::InterruptsBlocked { count }) => assert_eq!(count, 1),
        other => panic!("shutdown with a held block returned {:?}", other),
    }
    assert!(is_initialized());
    drop(guard);

    let err = enter_protected(|| unsafe {
        libc::pthread_kill(libc::pthread_self(), libc::SIGINT);
    })
    .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Interrupted);

    shutdown().unwrap();
}
