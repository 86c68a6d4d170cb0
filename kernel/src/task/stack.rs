//! Thread stacks with an overflow guard.
//!
//! ```text
//!   base                  bottom                               top
//!    | guard (cookie x 8)  |  usable stack ... [register frame] |
//! ```
//!
//! The guard is filled with [`STACK_COOKIE`] and checked every time the
//! owning thread is switched out. A thread that has not started yet has
//! its initial register frame parked at the very top.

use alloc::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use core::ptr::NonNull;

use crate::arch::regs::{RegisterBlock, REGISTER_BLOCK_SIZE};
use crate::config::{STACK_COOKIE, STACK_GUARD};

use super::ThreadId;

/// Smallest usable stack: it must at least hold one register frame.
pub const MIN_STACK_SIZE: usize = REGISTER_BLOCK_SIZE;

pub(crate) struct ThreadStack {
    base: NonNull<u8>,
    size: usize,
    /// Allocated by us (and freed on drop), or lent by the boot code.
    owned: bool,
}

// SAFETY: the stack is plain memory owned by exactly one thread record.
unsafe impl Send for ThreadStack {}

impl ThreadStack {
    fn layout(size: usize) -> Layout {
        match Layout::from_size_align(STACK_GUARD + size, 8) {
            Ok(layout) => layout,
            Err(_) => fatal!("invalid stack size: {}", size),
        }
    }

    /// Allocate a stack of `size` usable bytes and arm its guard.
    pub fn new(size: usize) -> Self {
        let layout = Self::layout(size);
        // SAFETY: the layout is never zero-sized (the guard alone is 64 bytes).
        let ptr = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(ptr) else {
            handle_alloc_error(layout)
        };
        let stack = Self {
            base,
            size,
            owned: true,
        };
        stack.arm();
        stack
    }

    /// Adopt an existing stack region (the boot stack of the main thread).
    ///
    /// # Safety
    /// `base..base + STACK_GUARD + size` must be valid, 8-byte aligned and
    /// outlive the returned value. Its first `STACK_GUARD` bytes are
    /// overwritten.
    pub unsafe fn borrowed(base: NonNull<u8>, size: usize) -> Self {
        let stack = Self {
            base,
            size,
            owned: false,
        };
        stack.arm();
        stack
    }

    fn arm(&self) {
        let cookies = self.base.as_ptr() as *mut u64;
        for i in 0..STACK_GUARD / 8 {
            // SAFETY: the guard lies inside the allocation and is aligned.
            unsafe { cookies.add(i).write(STACK_COOKIE) };
        }
    }

    /// Lowest address the thread may touch.
    pub fn bottom(&self) -> usize {
        self.base.as_ptr() as usize + STACK_GUARD
    }

    /// One past the highest usable address.
    pub fn top(&self) -> usize {
        self.bottom() + self.size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Where the register frame of a thread lives while it is not running.
    pub fn frame_slot(&self) -> NonNull<RegisterBlock> {
        let addr = (self.top() - REGISTER_BLOCK_SIZE) & !7;
        // SAFETY: top is derived from a non-null base and the stack is at
        // least one frame large.
        unsafe { NonNull::new_unchecked(addr as *mut RegisterBlock) }
    }

    pub fn guard_intact(&self) -> bool {
        let cookies = self.base.as_ptr() as *const u64;
        // SAFETY: see `arm`.
        (0..STACK_GUARD / 8).all(|i| unsafe { cookies.add(i).read() } == STACK_COOKIE)
    }

    /// Overwrite part of the guard, as a runaway thread would.
    #[cfg(feature = "hosted")]
    pub fn clobber_guard(&self) {
        // SAFETY: first word of the guard.
        unsafe { (self.base.as_ptr() as *mut u64).write(0) };
    }

    /// Fatal if the thread `name` has run off the end of this stack.
    ///
    /// `sp` is where its register frame was saved.
    pub fn check(&self, sp: usize, name: &str, id: ThreadId) {
        let bottom = self.bottom();
        kassert!(
            sp >= bottom,
            "stack overflow in thread: {}[{}]\nSP:{:#x} | Stack top: {:#x} | Overflow: {} bytes",
            name,
            id,
            sp,
            bottom,
            bottom.wrapping_sub(sp)
        );
        kassert!(
            self.guard_intact(),
            "stack overflow in thread: {}[{}]\nStack guard is corrupted",
            name,
            id
        );
    }
}

impl Drop for ThreadStack {
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: allocated in `new` with this exact layout.
            unsafe { dealloc(self.base.as_ptr(), Self::layout(self.size)) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::arena::Arena;

    fn some_id() -> ThreadId {
        ThreadId(Arena::new(0).insert(()))
    }

    #[test]
    fn frame_slot_is_inside_and_aligned() {
        let stack = ThreadStack::new(4096);
        let slot = stack.frame_slot().as_ptr() as usize;
        assert_eq!(slot % 8, 0);
        assert!(slot >= stack.bottom());
        assert!(slot + REGISTER_BLOCK_SIZE <= stack.top());
    }

    #[test]
    fn fresh_stack_passes_check() {
        let stack = ThreadStack::new(1024);
        stack.check(stack.top() - 64, "t", some_id());
    }

    #[test]
    #[should_panic(expected = "Overflow: 16 bytes")]
    fn sp_below_bottom_is_fatal() {
        let stack = ThreadStack::new(1024);
        stack.check(stack.bottom() - 16, "t", some_id());
    }

    #[test]
    #[cfg(feature = "hosted")]
    #[should_panic(expected = "Stack guard is corrupted")]
    fn clobbered_guard_is_fatal() {
        let stack = ThreadStack::new(1024);
        stack.clobber_guard();
        stack.check(stack.top() - 64, "t", some_id());
    }
}
