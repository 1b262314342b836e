//! Fatal signals outside any protected region.
//!
//! Each case re-runs this test binary filtered to `fatal_child_entry`,
//! which performs the fault named by `SIGTRAMP_FATAL_CHILD`, and checks
//! how the child died.

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Output};

const CHILD_ENV: &str = "SIGTRAMP_FATAL_CHILD";

#[test]
fn fatal_child_entry() {
    let Ok(case) = std::env::var(CHILD_ENV) else {
        return;
    };
    sigtramp::initialize().expect("initialize failed");
    unsafe {
        match case.as_str() {
            "segv" => std::ptr::write_volatile(16 as *mut u8, 1),
            "abort" => {
                libc::raise(libc::SIGABRT);
            }
            "fpe" => {
                libc::raise(libc::SIGFPE);
            }
            "quit" => {
                // Fatal even inside a protected region.
                let _ = sigtramp::enter_protected(|| libc::raise(libc::SIGQUIT));
            }
            "interrupt" => {
                // Deferred, not fatal: the child exits normally.
                libc::raise(libc::SIGINT);
                assert!(sigtramp::check_interrupts().is_err());
                return;
            }
            other => panic!("unknown case {}", other),
        }
    }
    unreachable!("the fault did not terminate the process");
}

fn run_child(case: &str, extra_env: &[(&str, &str)]) -> Output {
    let exe = std::env::current_exe().expect("no test executable");
    let mut command = Command::new(exe);
    command
        .args(["--exact", "fatal_child_entry", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, case)
        .env_remove("SIGTRAMP_CRASH_QUIET")
        .env_remove("SIGTRAMP_CRASH_BACKTRACE");
    for (key, value) in extra_env {
        command.env(key, value);
    }
    command.output().expect("failed to run child")
}

#[test]
fn test_segfault_outside_region_kills_with_report() {
    let output = run_child("segv", &[("SIGTRAMP_CRASH_BACKTRACE", "0")]);
    assert_eq!(output.status.signal(), Some(libc::SIGSEGV));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unhandled SIGSEGV: a segmentation fault occurred."), "{}", stderr);
    assert!(stderr.contains("The process will now terminate."), "{}", stderr);
}

#[test]
fn test_abort_outside_region_kills_with_report() {
    let output = run_child("abort", &[]);
    assert_eq!(output.status.signal(), Some(libc::SIGABRT));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unhandled SIGABRT"), "{}", stderr);
}

#[test]
fn test_quiet_mode_suppresses_report() {
    let output = run_child("fpe", &[("SIGTRAMP_CRASH_QUIET", "1")]);
    assert_eq!(output.status.signal(), Some(libc::SIGFPE));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("Unhandled"), "{}", stderr);
}

#[test]
fn test_quit_inside_region_kills_with_report() {
    let output = run_child("quit", &[]);
    assert_eq!(output.status.signal(), Some(libc::SIGQUIT));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--------"), "{}", stderr);
    assert!(!stderr.contains("Unhandled"), "{}", stderr);
}

#[test]
fn test_interrupt_outside_region_is_not_fatal() {
    let output = run_child("interrupt", &[]);
    assert!(output.status.success(), "{:?}", output);
}
