// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::{
    Fail,
    FailKind,
};
use ::std::alloc::{
    self,
    Layout,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Alignment of stack segments. Both supported ABIs want 16 bytes.
pub const STACK_ALIGNMENT: usize = 16;

/// Size of the native stack each task-thread keeps cached (bytes). It is
/// allocated ahead of activation because a task stack may be too small to
/// allocate one mid-flight.
pub const NATIVE_STACK_SIZE: usize = 1024 * 1024;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A heap-allocated stack segment.
///
/// Stacks grow down: a fresh context is seeded at [top](Self::top) and
/// [limit](Self::limit) is the lowest valid address.
pub struct StackSegment {
    /// Base of the allocation (lowest address).
    base: *mut u8,
    /// Allocation layout, kept for deallocation.
    layout: Layout,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl StackSegment {
    /// Allocates a stack segment of at least `size` bytes.
    pub fn new(size: usize) -> Result<Self, Fail> {
        if size == 0 {
            let cause: &str = "cannot allocate an empty stack segment";
            error!("new(): {}", cause);
            return Err(Fail::new(FailKind::InvalidArgument, cause));
        }

        // Round up so the top of the stack lands on an aligned address.
        let size: usize = size.next_multiple_of(STACK_ALIGNMENT);
        let layout: Layout = match Layout::from_size_align(size, STACK_ALIGNMENT) {
            Ok(layout) => layout,
            Err(_) => {
                let cause: String = format!("invalid stack layout (size={:?})", size);
                error!("new(): {}", cause);
                return Err(Fail::new(FailKind::InvalidArgument, &cause));
            },
        };

        let base: *mut u8 = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            alloc::handle_alloc_error(layout);
        }

        Ok(Self { base, layout })
    }

    /// Returns the top of the stack (one past the highest valid address).
    pub fn top(&self) -> *mut u8 {
        // Safety: the offset stays within the allocation plus one.
        unsafe { self.base.add(self.layout.size()) }
    }

    /// Returns the lowest valid address of the stack.
    pub fn limit(&self) -> *mut u8 {
        self.base
    }

    #[allow(unused)]
    /// Returns the size of the stack (bytes).
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for StackSegment {
    fn drop(&mut self) {
        // Safety: `base` was allocated with `layout` in [Self::new].
        unsafe { alloc::dealloc(self.base, self.layout) };
    }
}

// Safety: a stack segment is plain memory. The runtime hands segments between
// threads only while no context is live on them.
unsafe impl Send for StackSegment {}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        StackSegment,
        STACK_ALIGNMENT,
    };
    use ::anyhow::Result;

    #[test]
    fn stack_top_is_aligned() -> Result<()> {
        let stack: StackSegment = StackSegment::new(4096)?;
        crate::ensure_eq!(stack.top() as usize % STACK_ALIGNMENT, 0);
        crate::ensure_eq!(stack.top() as usize - stack.limit() as usize, stack.size());
        Ok(())
    }

    #[test]
    fn odd_sizes_are_rounded_up() -> Result<()> {
        let stack: StackSegment = StackSegment::new(1000)?;
        crate::ensure_eq!(stack.size() % STACK_ALIGNMENT, 0);
        crate::ensure_eq!(stack.size() >= 1000, true);
        Ok(())
    }

    #[test]
    fn empty_stack_is_rejected() -> Result<()> {
        crate::ensure_eq!(StackSegment::new(0).is_err(), true);
        Ok(())
    }
}
