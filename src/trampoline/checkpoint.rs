//! Checkpoint stack
//!
//! A protected region is a closure run by `enter_protected`. The frame that
//! owns the region's `Checkpoint` saves its execution context with
//! `sigsetjmp` and publishes the checkpoint as the thread's innermost jump
//! target. When the dispatcher catches a signal it resumes that frame with
//! `siglongjmp`, and `enter_protected` turns the jump into
//! `Err(Interrupt)`.
//!
//! Everything between the checkpoint and the interrupted instruction is
//! discarded without running destructors. Code inside a region must not
//! own resources that such an unwind would leak.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use libc::c_int;

use super::catalog;
use super::context::{ORPHANS, ThreadContext};
use super::emergency;
use super::jmp::{self, SigJmpBuf, siglongjmp, sigsetjmp};
use super::lifecycle;
use crate::error::{ErrorCategory, Interrupt};

/// Saved context of one protected region.
pub(crate) struct Checkpoint {
    env: SigJmpBuf,
    /// Enclosing checkpoint, null for the outermost region
    prev: *mut Checkpoint,
    /// Number of regions active while this one is, itself included
    depth: usize,
    message: Option<&'static str>,
    /// `block_interrupts` depth when the region was entered
    blocked_at_entry: usize,
    // Written by the dispatcher just before it jumps here.
    fault_addr: AtomicUsize,
    has_fault_addr: AtomicBool,
    on_emergency_stack: AtomicBool,
}

impl Checkpoint {
    fn new(ctx: &ThreadContext, message: Option<&'static str>) -> Self {
        Self {
            env: SigJmpBuf::zeroed(),
            prev: ctx.top(),
            depth: ctx.depth() + 1,
            message,
            blocked_at_entry: ctx.block_count(),
            fault_addr: AtomicUsize::new(0),
            has_fault_addr: AtomicBool::new(false),
            on_emergency_stack: AtomicBool::new(false),
        }
    }

    /// Record what was caught and resume execution at this checkpoint.
    ///
    /// # Safety
    ///
    /// `checkpoint` must be the innermost checkpoint of the calling thread,
    /// so the frame that saved it is still live. Async-signal-safe.
    pub(crate) unsafe fn resume(checkpoint: *mut Checkpoint, signal: c_int, fault_addr: Option<usize>) -> ! {
        // SAFETY: guaranteed live by the caller.
        let cp = unsafe { &*checkpoint };
        if let Some(addr) = fault_addr {
            cp.fault_addr.store(addr, Ordering::SeqCst);
            cp.has_fault_addr.store(true, Ordering::SeqCst);
        }
        cp.on_emergency_stack
            .store(emergency::on_emergency_stack(), Ordering::SeqCst);
        // SAFETY: env was filled by sigsetjmp in `arm`, whose frame is live.
        unsafe { siglongjmp(cp.env.as_mut_ptr(), signal) }
    }

    pub(crate) fn depth(&self) -> usize {
        self.depth
    }

    fn interrupt(&self, signal: c_int) -> Interrupt {
        let category = catalog::lookup(signal).map_or(ErrorCategory::Interrupted, |entry| entry.category);
        let fault_addr = if self.has_fault_addr.load(Ordering::SeqCst) {
            Some(self.fault_addr.load(Ordering::SeqCst))
        } else {
            None
        };
        Interrupt::new(category, signal)
            .with_message(self.message)
            .with_fault(fault_addr, self.on_emergency_stack.load(Ordering::SeqCst))
    }
}

/// Pops the region's checkpoint when the body returns or panics.
struct Region {
    ctx: &'static ThreadContext,
    checkpoint: *mut Checkpoint,
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: the checkpoint lives in the caller of `arm`, past this guard.
        unsafe { leave_protected(self.ctx, self.checkpoint) };
    }
}

/// End the region whose checkpoint is innermost on `ctx`.
///
/// # Safety
///
/// `checkpoint` must be live.
unsafe fn leave_protected(ctx: &ThreadContext, checkpoint: *mut Checkpoint) {
    ctx.pop_to(unsafe { (*checkpoint).prev });
}

/// Save the execution context, publish the checkpoint, replay a deferred
/// signal if one is waiting, then run the body.
///
/// Returns 0 when the body completed, otherwise the signal that ended the
/// region. The checkpoint is unpublished before this frame returns on every
/// path, so the dispatcher never jumps into a frame that is gone. Kept out
/// of line so that the frame `sigsetjmp` saves stays distinct from the
/// caller's.
#[inline(never)]
unsafe fn arm(ctx: &'static ThreadContext, checkpoint: *mut Checkpoint, body: &mut dyn FnMut()) -> c_int {
    // SAFETY: checkpoint points into the caller's frame, which outlives
    // this call and every jump back into it.
    let jumped = unsafe { sigsetjmp((*checkpoint).env.as_mut_ptr(), 1) };
    if jumped != 0 {
        // Still published; a signal landing here jumps back to this frame.
        unsafe { leave_protected(ctx, checkpoint) };
        return jumped;
    }

    ctx.push(checkpoint);
    let region = Region { ctx, checkpoint };

    if !ctx.interrupts_blocked() {
        if let Some(signal) = ctx.drain_pending() {
            drop(region);
            return signal;
        }
    }

    body();
    drop(region);
    0
}

fn protect<T, F>(message: Option<&'static str>, f: F) -> Result<T, Interrupt>
where
    F: FnOnce() -> T,
{
    lifecycle::ensure_initialized();
    let Some(ctx) = ThreadContext::current() else {
        log::error!("no trampoline context for this thread, running without protection");
        return Ok(f());
    };

    let mut checkpoint = Checkpoint::new(ctx, message);
    let checkpoint_ptr: *mut Checkpoint = &mut checkpoint;

    let mut f = Some(f);
    let mut output = None;
    let mut body = || {
        if let Some(f) = f.take() {
            output = Some(f());
        }
    };

    // SAFETY: `checkpoint` lives until the end of this function and `arm`
    // unpublishes it before returning or unwinding.
    let signal = unsafe { arm(ctx, checkpoint_ptr, &mut body) };

    if signal == 0 {
        if let Some(value) = output {
            return Ok(value);
        }
    }

    ctx.leave_handler(false);
    jmp::reset_fpu();

    // SAFETY: the checkpoint is no longer published; this is the only access.
    let checkpoint = unsafe { &*checkpoint_ptr };
    // Guards dropped by the unwind never released their blocks.
    ctx.reset_blocks(checkpoint.blocked_at_entry);
    let interrupt = checkpoint.interrupt(signal);
    log::trace!(
        "protected region at depth {} ended by {}",
        checkpoint.depth,
        catalog::signal_name(signal)
    );
    Err(interrupt)
}

/// Run `f` inside a protected region.
///
/// A handled signal delivered while `f` runs (including inside regions
/// nested in `f`, which catch it first) ends the innermost region with
/// `Err(Interrupt)`. If an interrupt or alarm arrived while no region was
/// active, it is reported here instead of running `f`.
///
/// Frames between this call and the point where the signal arrived are
/// abandoned without running their destructors.
pub fn enter_protected<T, F>(f: F) -> Result<T, Interrupt>
where
    F: FnOnce() -> T,
{
    protect(None, f)
}

/// `enter_protected` with a message reported by the resulting `Interrupt`.
pub fn enter_protected_with<T, F>(message: &'static str, f: F) -> Result<T, Interrupt>
where
    F: FnOnce() -> T,
{
    protect(Some(message), f)
}

/// Number of protected regions active on the calling thread.
pub fn protected_depth() -> usize {
    ThreadContext::get().map_or(0, |ctx| ctx.depth())
}

/// Guard returned by [`block_interrupts`].
#[must_use = "interrupts are unblocked as soon as the guard is dropped"]
pub struct InterruptBlock {
    /// Whether a block was taken; the context is looked up again on drop
    held: bool,
    _not_send: PhantomData<*const ()>,
}

/// Hold back interrupts and alarms inside protected regions until the
/// returned guard is dropped.
///
/// While blocked, such signals are queued instead of unwinding the region.
/// When the last guard is dropped inside a region, a queued signal is
/// raised again and unwinds the innermost region. Faults are never blocked.
pub fn block_interrupts() -> InterruptBlock {
    lifecycle::ensure_initialized();
    let held = match ThreadContext::current() {
        Some(ctx) => {
            ctx.block();
            true
        }
        None => false,
    };
    InterruptBlock {
        held,
        _not_send: PhantomData,
    }
}

impl Drop for InterruptBlock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Some(ctx) = ThreadContext::get() else {
            return;
        };
        if ctx.unblock() && !ctx.top().is_null() {
            if let Some(signal) = ctx.drain_pending() {
                // SAFETY: signalling the calling thread; the dispatcher runs
                // before pthread_kill returns and unwinds to the innermost
                // checkpoint.
                unsafe {
                    libc::pthread_kill(libc::pthread_self(), signal);
                }
            }
        }
    }
}

/// Report an interrupt or alarm that was queued while no region could take
/// it, without entering a region. Respects `block_interrupts`.
pub fn check_interrupts() -> Result<(), Interrupt> {
    let pending = match ThreadContext::get() {
        Some(ctx) if ctx.interrupts_blocked() => None,
        Some(ctx) => ctx.drain_pending(),
        None => ORPHANS.drain(),
    };
    match pending.and_then(Interrupt::from_signal) {
        Some(interrupt) => Err(interrupt),
        None => Ok(()),
    }
}
