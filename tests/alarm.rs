//! Alarms. Linux only: elsewhere the timer is process-wide and alarms
//! armed by concurrently running tests would interfere.

#![cfg(target_os = "linux")]

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::spin_until_signalled;
use sigtramp::{
    ErrorCategory, SetupError, cancel_alarm, check_interrupts, enter_protected, prepare_thread,
    set_alarm,
};

fn setup() {
    prepare_thread().expect("thread setup failed");
    while check_interrupts().is_err() {}
}

#[test]
fn test_alarm_ends_region() {
    setup();
    let start = Instant::now();
    set_alarm(0.05).unwrap();
    let err = enter_protected(spin_until_signalled).unwrap_err();

    assert_eq!(err.category(), ErrorCategory::TimedOut);
    assert_eq!(err.signal(), libc::SIGALRM);
    assert!(start.elapsed() >= Duration::from_millis(40));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_alarm_outside_region_is_deferred() {
    setup();
    set_alarm(0.01).unwrap();
    thread::sleep(Duration::from_millis(50));

    let err = enter_protected(|| ()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TimedOut);
    assert_eq!(enter_protected(|| ()), Ok(()));
}

#[test]
fn test_cancel_before_expiry() {
    setup();
    set_alarm(0.05).unwrap();
    cancel_alarm().unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(enter_protected(|| 7), Ok(7));
}

#[test]
fn test_cancel_discards_expired_alarm() {
    setup();
    set_alarm(0.01).unwrap();
    thread::sleep(Duration::from_millis(50));
    cancel_alarm().unwrap();
    assert_eq!(enter_protected(|| 7), Ok(7));
}

#[test]
fn test_rearming_replaces_deadline() {
    setup();
    set_alarm(30.0).unwrap();
    let start = Instant::now();
    set_alarm(0.02).unwrap();
    let err = enter_protected(spin_until_signalled).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TimedOut);
    assert!(start.elapsed() < Duration::from_secs(5));
    cancel_alarm().unwrap();
}

#[test]
fn test_alarm_is_per_thread() {
    setup();
    set_alarm(0.02).unwrap();
    let other = thread::spawn(|| {
        setup();
        thread::sleep(Duration::from_millis(100));
        enter_protected(|| 1)
    });
    let err = enter_protected(spin_until_signalled).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::TimedOut);
    assert_eq!(other.join().unwrap(), Ok(1));
}

#[test]
fn test_invalid_durations_are_rejected() {
    for seconds in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        match set_alarm(seconds) {
            Err(SetupError::InvalidAlarm(_)) => {}
            other => panic!("set_alarm({}) returned {:?}", seconds, other),
        }
    }
}

#[test]
fn test_cancel_without_alarm_is_harmless() {
    setup();
    cancel_alarm().unwrap();
    cancel_alarm().unwrap();
    assert_eq!(enter_protected(|| ()), Ok(()));
}
