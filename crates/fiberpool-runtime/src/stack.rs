//! Fiber stacks backed by anonymous mmap
//!
//! Layout (addresses grow upward):
//!
//! ```text
//! +--------------+---------------------------+
//! | guard (NONE) | usable stack (READ|WRITE) |
//! +--------------+---------------------------+
//! base                                       top
//! ```
//!
//! Stacks grow down from `top`; running off the bottom hits the guard page
//! and faults instead of corrupting a neighbour.

use fiberpool_core::constants::GUARD_SIZE;
use fiberpool_core::{MemoryError, SchedResult};

pub struct Stack {
    base: *mut u8,
    len: usize,
    guard: usize,
}

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        GUARD_SIZE
    } else {
        size as usize
    }
}

#[cfg(target_os = "linux")]
const MAP_FLAGS: libc::c_int =
    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_STACK;

#[cfg(not(target_os = "linux"))]
const MAP_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

impl Stack {
    /// Map a stack with at least `usable` writable bytes plus a guard page
    pub fn new(usable: usize) -> SchedResult<Self> {
        let page = page_size();
        let guard = GUARD_SIZE.max(page);
        let usable = usable
            .checked_add(page - 1)
            .map(|n| n & !(page - 1))
            .filter(|n| *n > 0)
            .ok_or(MemoryError::InvalidSize)?;
        let len = usable.checked_add(guard).ok_or(MemoryError::InvalidSize)?;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                MAP_FLAGS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(MemoryError::AllocationFailed.into());
        }

        // Constructed before mprotect so a failure still unmaps.
        let stack = Self { base: base as *mut u8, len, guard };
        let ret = unsafe { libc::mprotect(base, guard, libc::PROT_NONE) };
        if ret != 0 {
            return Err(MemoryError::ProtectionFailed.into());
        }
        Ok(stack)
    }

    /// One past the highest usable byte
    #[inline]
    pub fn top(&self) -> *mut u8 {
        unsafe { self.base.add(self.len) }
    }

    /// Lowest usable byte (just above the guard)
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.add(self.guard) }
    }

    #[inline]
    pub fn usable_size(&self) -> usize {
        self.len - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.len);
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("usable", &self.usable_size())
            .finish()
    }
}
