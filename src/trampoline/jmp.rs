//! `sigsetjmp` / `siglongjmp` bindings.
//!
//! The `libc` crate does not expose `sigjmp_buf`, so the buffer is an
//! opaque, over-sized, 16-byte aligned block and the two functions are
//! bound directly.

use std::cell::UnsafeCell;

use libc::c_int;

// glibc x86_64 needs 200 bytes; other targets get a conservative size.
#[cfg(target_arch = "x86_64")]
const JMP_BUF_SIZE: usize = 256;
#[cfg(not(target_arch = "x86_64"))]
const JMP_BUF_SIZE: usize = 512;

/// Saved execution context of a checkpoint, including the signal mask.
#[repr(C, align(16))]
pub(crate) struct SigJmpBuf {
    buf: UnsafeCell<[u8; JMP_BUF_SIZE]>,
}

impl SigJmpBuf {
    pub(crate) const fn zeroed() -> Self {
        Self {
            buf: UnsafeCell::new([0u8; JMP_BUF_SIZE]),
        }
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&self) -> *mut SigJmpBuf {
        self as *const SigJmpBuf as *mut SigJmpBuf
    }
}

unsafe extern "C" {
    // On glibc, sigsetjmp is a macro that expands to __sigsetjmp.
    #[cfg_attr(all(target_os = "linux", target_env = "gnu"), link_name = "__sigsetjmp")]
    pub(crate) fn sigsetjmp(env: *mut SigJmpBuf, savemask: c_int) -> c_int;

    pub(crate) fn siglongjmp(env: *mut SigJmpBuf, val: c_int) -> !;
}

/// Put the FPU back into a usable state after jumping out of a handler
/// that may have interrupted MMX code.
#[inline]
pub(crate) fn reset_fpu() {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    // SAFETY: emms only clears the x87 tag word.
    unsafe {
        std::arch::asm!("emms", options(nomem, nostack));
    }
}
