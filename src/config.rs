//! Runtime configuration
//!
//! Settings are read from the environment when `initialize()` runs:
//!
//! - `SIGTRAMP_CRASH_QUIET`: when set, a fatal signal outside any protected
//!   region kills the process without printing a report.
//! - `SIGTRAMP_CRASH_BACKTRACE`: `0`, `false`, `no` or `off` leave the
//!   backtrace out of the fatal report.
//! - `SIGTRAMP_EMERGENCY_STACK_SIZE`: size in bytes of each thread's
//!   emergency stack.

/// Pointers the fatal report asks `backtrace()` for.
pub const BACKTRACE_DEPTH: usize = 1024;

/// Smallest emergency stack that still fits the fatal report and its
/// backtrace buffer.
pub const MIN_EMERGENCY_STACK_SIZE: usize =
    libc::MINSIGSTKSZ + 5120 + BACKTRACE_DEPTH * std::mem::size_of::<*const u8>();

/// Default emergency stack size per thread.
pub const DEFAULT_EMERGENCY_STACK_SIZE: usize = 128 * 1024;

pub const ENV_CRASH_QUIET: &str = "SIGTRAMP_CRASH_QUIET";
pub const ENV_CRASH_BACKTRACE: &str = "SIGTRAMP_CRASH_BACKTRACE";
pub const ENV_EMERGENCY_STACK_SIZE: &str = "SIGTRAMP_EMERGENCY_STACK_SIZE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Skip the report printed before a fatal signal terminates the process
    pub crash_quiet: bool,
    /// Include a libc backtrace in the fatal report
    pub crash_backtrace: bool,
    /// Bytes reserved per thread for the emergency signal stack
    pub emergency_stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            crash_quiet: false,
            crash_backtrace: cfg!(feature = "backtrace"),
            emergency_stack_size: DEFAULT_EMERGENCY_STACK_SIZE,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let crash_quiet = lookup(ENV_CRASH_QUIET).is_some();

        let crash_backtrace = match lookup(ENV_CRASH_BACKTRACE) {
            Some(value) => defaults.crash_backtrace && !is_falsy(&value),
            None => defaults.crash_backtrace,
        };

        let emergency_stack_size = lookup(ENV_EMERGENCY_STACK_SIZE)
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or(defaults.emergency_stack_size);

        Self {
            crash_quiet,
            crash_backtrace,
            emergency_stack_size,
        }
        .normalized()
    }

    /// Clamp values to what the dispatcher needs to run safely.
    pub fn normalized(mut self) -> Self {
        self.emergency_stack_size = self.emergency_stack_size.max(MIN_EMERGENCY_STACK_SIZE);
        self
    }
}

fn is_falsy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
