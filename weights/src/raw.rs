//! Zero-initialized heap blocks of fields.
use std::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout},
    ptr::NonNull,
};

use crate::Field;

/// Computes the allocation layout for `len` fields.
///
/// Callers validate the size via [`WeightLayout`][crate::WeightLayout], so this only fails for
/// lengths that never reach the allocator.
pub(crate) fn array_layout(len: usize) -> Layout {
    match Layout::array::<Field>(len) {
        Ok(layout) => layout,
        Err(_) => panic!("weight storage of {len} fields exceeds the address space"),
    }
}

/// An owned, zero-initialized block of fields on the heap.
pub(crate) struct HeapBlock {
    ptr: NonNull<Field>,
    len: usize,
}

// SAFETY: the block uniquely owns its allocation and `Field` is `Send`
unsafe impl Send for HeapBlock {}

impl HeapBlock {
    /// Allocates `len` fields, all set to `0.0`.
    ///
    /// Allocation failure aborts via [`handle_alloc_error`].
    pub fn zeroed(len: usize) -> Self {
        if len == 0 {
            return Self {
                ptr: NonNull::dangling(),
                len,
            };
        }
        let layout = array_layout(len);
        // SAFETY: the layout has a non-zero size as `len` is non-zero
        let buf = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(buf.cast::<Field>()) else {
            handle_alloc_error(layout)
        };
        Self { ptr, len }
    }

    pub fn fields(&self) -> &[Field] {
        // SAFETY: `ptr` points to `len` initialized fields (all zero bits are a valid `f32`) or is
        // dangling with `len == 0`
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        if self.len != 0 {
            // SAFETY: allocated in `zeroed` with exactly this layout
            unsafe { dealloc(self.ptr.as_ptr().cast::<u8>(), array_layout(self.len)) }
        }
    }
}
