//! Anonymous shared memory mappings.
//!
//! A dense store can move its fields into a `MAP_SHARED | MAP_ANON` mapping. Processes forked
//! after the promotion see the same physical memory, which is what cross-process weight
//! averaging builds on.
//!
//! Mappings are never unmapped. Once created they stay alive until the process exits, even when
//! the store that created them is dropped.
use std::ptr::NonNull;

use crate::{error::UnsupportedOperation, Field};

/// Returns `true` when dense stores can be promoted to shared memory on this platform.
#[inline]
pub const fn shared_memory_supported() -> bool {
    cfg!(unix)
}

/// A process-lifetime shared mapping holding a fixed number of fields.
pub(crate) struct SharedMapping {
    ptr: NonNull<Field>,
    len: usize,
}

// SAFETY: the mapping is never unmapped, so the pointer stays valid on every thread, and `Field`
// is `Send`
unsafe impl Send for SharedMapping {}

impl SharedMapping {
    /// Maps a new shared region and copies `fields` into it.
    ///
    /// Failing to map the region aborts via [`std::alloc::handle_alloc_error`].
    #[cfg(unix)]
    pub fn copy_of(fields: &[Field]) -> Result<Self, UnsupportedOperation> {
        let len = fields.len();
        if len == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                len,
            });
        }
        let layout = crate::raw::array_layout(len);

        // SAFETY: requesting a fresh anonymous mapping has no preconditions
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                layout.size(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            std::alloc::handle_alloc_error(layout);
        }
        let Some(ptr) = NonNull::new(addr.cast::<Field>()) else {
            std::alloc::handle_alloc_error(layout)
        };

        // SAFETY: the fresh mapping is page aligned, large enough for `len` fields and cannot
        // overlap the source
        unsafe { std::ptr::copy_nonoverlapping(fields.as_ptr(), ptr.as_ptr(), len) };

        log::debug!("mapped {} bytes of shared weight memory", layout.size());
        Ok(Self { ptr, len })
    }

    #[cfg(not(unix))]
    pub fn copy_of(_fields: &[Field]) -> Result<Self, UnsupportedOperation> {
        Err(UnsupportedOperation::SharedMemory)
    }

    pub fn fields(&self) -> &[Field] {
        // SAFETY: the mapping holds `len` fields initialized by `copy_of` and is never unmapped
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}
