//! Signal trampoline
//!
//! Turns asynchronous signals into ordinary error values at well-defined
//! recovery points:
//! - Catalog of handled signals and their categories (catalog.rs)
//! - Per-thread checkpoint stack and region entry (context.rs, checkpoint.rs)
//! - The installed handler and the fatal report (dispatch.rs, report.rs)
//! - Deferred delivery for signals that arrive outside any region (deferred.rs)
//! - Alternate stack for faults on an exhausted stack (emergency.rs)
//! - One-shot alarms and an interruptible descriptor wait (alarm.rs, wait.rs)
//!
//! Nothing reachable from the handler allocates, locks or logs.

pub mod catalog;
mod alarm;
mod checkpoint;
mod context;
mod deferred;
mod dispatch;
mod emergency;
mod jmp;
mod lifecycle;
mod report;
mod wait;

pub use alarm::{cancel_alarm, set_alarm};
pub use catalog::{CatalogEntry, signal_name};
pub use checkpoint::{
    InterruptBlock, block_interrupts, check_interrupts, enter_protected, enter_protected_with,
    protected_depth,
};
pub use lifecycle::{
    initialize, initialize_with, is_initialized, prepare_thread, shutdown, thread_has_emergency_stack,
};
pub use wait::{Interest, WaitOutcome, wait_for};
