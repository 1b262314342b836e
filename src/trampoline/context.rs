//! Per-thread trampoline state.
//!
//! The dispatcher must find the state of the thread it interrupted without
//! allocating or locking. The state is boxed once per thread and published
//! through a POSIX thread-specific key: `pthread_getspecific` is on the
//! async-signal-safe list, a lazily initialised `thread_local!` is not. The
//! key destructor frees the box when the thread exits.

use std::ffi::c_void;
use std::io;
use std::ptr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering, compiler_fence};

use super::alarm::AlarmTimer;
use super::checkpoint::Checkpoint;
use super::deferred::DeferredQueue;
use super::emergency::EmergencyStack;
use super::lifecycle;

/// Key for the per-thread `ThreadContext`.
static CONTEXT_KEY: OnceLock<libc::pthread_key_t> = OnceLock::new();

/// Interrupts delivered to threads that never entered a protected region.
pub(crate) static ORPHANS: DeferredQueue = DeferredQueue::new();

pub(crate) struct ThreadContext {
    /// Innermost active checkpoint, null when no region is active
    top: AtomicPtr<Checkpoint>,
    /// Active `block_interrupts` guards
    blocked: AtomicUsize,
    /// Set while the dispatcher runs on this thread
    in_handler: AtomicBool,
    pub(crate) pending: DeferredQueue,
    emergency: Option<EmergencyStack>,
    pub(crate) alarm: AlarmTimer,
}

/// Destructor registered with the key; runs at thread exit.
unsafe extern "C" fn context_dtor(ptr: *mut c_void) {
    if !ptr.is_null() {
        // SAFETY: ptr was produced by Box::into_raw in `ThreadContext::current`.
        drop(unsafe { Box::from_raw(ptr.cast::<ThreadContext>()) });
    }
}

/// Create the thread-specific key. Called with the lifecycle lock held.
pub(crate) fn create_key() -> io::Result<()> {
    if CONTEXT_KEY.get().is_some() {
        return Ok(());
    }
    let mut key: libc::pthread_key_t = 0;
    let ret = unsafe { libc::pthread_key_create(&mut key, Some(context_dtor)) };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    let _ = CONTEXT_KEY.set(key);
    Ok(())
}

impl ThreadContext {
    fn new() -> Self {
        let emergency = match EmergencyStack::install(lifecycle::emergency_stack_size()) {
            Ok(stack) => {
                log::debug!("emergency stack at {:p} ({} bytes)", stack.base(), stack.size());
                Some(stack)
            }
            Err(e) => {
                log::warn!(
                    "failed to set up emergency stack, stack overflow recovery disabled for this thread: {}",
                    e
                );
                None
            }
        };
        Self {
            top: AtomicPtr::new(ptr::null_mut()),
            blocked: AtomicUsize::new(0),
            in_handler: AtomicBool::new(false),
            pending: DeferredQueue::new(),
            emergency,
            alarm: AlarmTimer::new(),
        }
    }

    /// Context of the calling thread, created on first use. Returns `None`
    /// only if the key does not exist or cannot be set.
    ///
    /// Must not be called from the dispatcher.
    pub(crate) fn current() -> Option<&'static ThreadContext> {
        if let Some(ctx) = Self::get() {
            return Some(ctx);
        }
        let key = *CONTEXT_KEY.get()?;
        let raw = Box::into_raw(Box::new(ThreadContext::new()));
        // SAFETY: key is valid; raw is a live heap pointer.
        if unsafe { libc::pthread_setspecific(key, raw.cast()) } != 0 {
            drop(unsafe { Box::from_raw(raw) });
            return None;
        }
        log::debug!("registered trampoline context for thread {:?}", std::thread::current().id());
        // SAFETY: freed only by the key destructor at thread exit.
        Some(unsafe { &*raw })
    }

    /// Context of the calling thread if it has one. Async-signal-safe.
    #[inline]
    pub(crate) fn get() -> Option<&'static ThreadContext> {
        let key = *CONTEXT_KEY.get()?;
        // SAFETY: pthread_getspecific is async-signal-safe; the value is
        // either null or a pointer set by `current` on this thread.
        let raw = unsafe { libc::pthread_getspecific(key) }.cast::<ThreadContext>();
        if raw.is_null() { None } else { Some(unsafe { &*raw }) }
    }

    /// Detach and free the calling thread's context.
    pub(crate) fn release_current() {
        let Some(&key) = CONTEXT_KEY.get() else {
            return;
        };
        // SAFETY: same pointer discipline as `get`; cleared before freeing so
        // the dispatcher can no longer observe it.
        unsafe {
            let raw = libc::pthread_getspecific(key).cast::<ThreadContext>();
            if raw.is_null() {
                return;
            }
            libc::pthread_setspecific(key, ptr::null());
            compiler_fence(Ordering::SeqCst);
            drop(Box::from_raw(raw));
        }
    }

    #[inline]
    pub(crate) fn top(&self) -> *mut Checkpoint {
        self.top.load(Ordering::Acquire)
    }

    /// Publish `checkpoint` as the innermost jump target.
    #[inline]
    pub(crate) fn push(&self, checkpoint: *mut Checkpoint) {
        compiler_fence(Ordering::SeqCst);
        self.top.store(checkpoint, Ordering::Release);
        compiler_fence(Ordering::SeqCst);
    }

    /// Make `previous` the innermost jump target again.
    #[inline]
    pub(crate) fn pop_to(&self, previous: *mut Checkpoint) {
        compiler_fence(Ordering::SeqCst);
        self.top.store(previous, Ordering::Release);
        compiler_fence(Ordering::SeqCst);
    }

    /// Nesting depth, read from the innermost checkpoint so that it can
    /// never disagree with the published jump target.
    pub(crate) fn depth(&self) -> usize {
        let top = self.top();
        if top.is_null() {
            0
        } else {
            // SAFETY: a published checkpoint lives in a frame of this thread
            // that is still active.
            unsafe { (*top).depth() }
        }
    }

    pub(crate) fn interrupts_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn block(&self) {
        self.blocked.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true when this released the last block. A count that is
    /// already zero stays zero.
    pub(crate) fn unblock(&self) -> bool {
        self.blocked
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            == Ok(1)
    }

    pub(crate) fn block_count(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Forget blocks taken by guards that a recovery abandoned.
    pub(crate) fn reset_blocks(&self, count: usize) {
        self.blocked.store(count, Ordering::SeqCst);
    }

    /// Mark entry into the dispatcher; returns whether it was already
    /// running on this thread.
    #[inline]
    pub(crate) fn enter_handler(&self) -> bool {
        self.in_handler.swap(true, Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn leave_handler(&self, was_inside: bool) {
        self.in_handler.store(was_inside, Ordering::SeqCst);
    }

    pub(crate) fn has_emergency_stack(&self) -> bool {
        self.emergency.is_some()
    }

    /// Drain this thread's queue, then the orphan queue.
    pub(crate) fn drain_pending(&self) -> Option<libc::c_int> {
        self.pending.drain().or_else(|| ORPHANS.drain())
    }

    pub(crate) fn peek_pending(&self) -> Option<libc::c_int> {
        self.pending.peek().or_else(|| ORPHANS.peek())
    }
}
