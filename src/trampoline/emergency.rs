//! Emergency stack manager
//!
//! Each thread that enters protected regions gets its own alternate signal
//! stack so the dispatcher can still run after the primary stack has run
//! into its guard page. The mapping has a guard page of its own at the low
//! end.

use std::io;
use std::ptr;

pub(crate) struct EmergencyStack {
    /// Start of the whole mapping, guard page included
    mapping: *mut libc::c_void,
    mapping_len: usize,
    /// Usable part handed to `sigaltstack`
    stack: libc::stack_t,
    /// Alternate stack that was registered before this one
    previous: libc::stack_t,
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

impl EmergencyStack {
    /// Map `size` bytes (rounded up to whole pages) plus a guard page and
    /// register them as the calling thread's alternate signal stack.
    pub(crate) fn install(size: usize) -> io::Result<Self> {
        let page = page_size();
        let usable = size.div_ceil(page) * page;
        let mapping_len = usable + page;

        // SAFETY: fresh anonymous private mapping; result checked below.
        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: the first page lies inside the mapping created above.
        if unsafe { libc::mprotect(mapping, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(mapping, mapping_len) };
            return Err(err);
        }

        let stack = libc::stack_t {
            ss_sp: unsafe { mapping.cast::<u8>().add(page) }.cast(),
            ss_flags: 0,
            ss_size: usable,
        };
        let mut previous: libc::stack_t = unsafe { std::mem::zeroed() };

        // SAFETY: `stack` describes memory we own for the lifetime of self.
        if unsafe { libc::sigaltstack(&stack, &mut previous) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(mapping, mapping_len) };
            return Err(err);
        }

        Ok(Self {
            mapping,
            mapping_len,
            stack,
            previous,
        })
    }

    pub(crate) fn base(&self) -> *mut libc::c_void {
        self.stack.ss_sp
    }

    pub(crate) fn size(&self) -> usize {
        self.stack.ss_size
    }
}

impl Drop for EmergencyStack {
    fn drop(&mut self) {
        // SAFETY: querying and restoring alternate stacks of the current
        // thread; the mapping is released only once it is no longer
        // registered.
        unsafe {
            let mut current: libc::stack_t = std::mem::zeroed();
            if libc::sigaltstack(ptr::null(), &mut current) == 0 && current.ss_sp == self.stack.ss_sp {
                if current.ss_flags & libc::SS_ONSTACK != 0 {
                    // Still executing on it; leaking is the only safe option.
                    return;
                }
                if self.previous.ss_flags & libc::SS_DISABLE != 0 || self.previous.ss_sp.is_null() {
                    let disable = libc::stack_t {
                        ss_sp: ptr::null_mut(),
                        ss_flags: libc::SS_DISABLE,
                        ss_size: 0,
                    };
                    libc::sigaltstack(&disable, ptr::null_mut());
                } else {
                    libc::sigaltstack(&self.previous, ptr::null_mut());
                }
            }
            libc::munmap(self.mapping, self.mapping_len);
        }
    }
}

/// Whether the calling code is currently executing on an alternate signal
/// stack. Async-signal-safe.
pub(crate) fn on_emergency_stack() -> bool {
    // SAFETY: sigaltstack is async-signal-safe; only queries state.
    unsafe {
        let mut current: libc::stack_t = std::mem::zeroed();
        libc::sigaltstack(ptr::null(), &mut current) == 0 && current.ss_flags & libc::SS_ONSTACK != 0
    }
}
