//! sigtramp: recoverable signal handling for native code
//!
//! Long-running or crash-prone native work runs inside a protected region.
//! A keyboard interrupt, an expired alarm, or a hardware fault raised
//! while the region is active ends it with an [`Interrupt`] instead of
//! killing the process:
//!
//! ```no_run
//! use sigtramp::{ErrorCategory, enter_protected, set_alarm};
//!
//! fn busy_work() {
//!     loop {
//!         std::hint::spin_loop();
//!     }
//! }
//!
//! sigtramp::initialize().unwrap();
//! set_alarm(0.5).unwrap();
//! let result = enter_protected(busy_work);
//! assert_eq!(result.unwrap_err().category(), ErrorCategory::TimedOut);
//! ```
//!
//! Frames abandoned by a recovery do not run their destructors, so code
//! inside a region should not own heap data or locks across points where
//! a signal may arrive.

pub mod config;
pub mod error;
pub mod trampoline;

pub use config::Config;
pub use error::{ErrorCategory, Interrupt, SetupError};
pub use trampoline::*;
