use core::alloc::Layout;
use core::ptr::NonNull;

use tracing::warn;

use crate::allocator::Allocator;
use crate::error::Error;
use crate::error::Result;

/// A block obtained from an allocator, remembered together with the layout it
/// was requested with so the matching `deallocate` call uses the same layout.
///
/// Zero-sized layouts never reach the allocator; they are represented by an
/// aligned dangling pointer.
#[derive(Debug)]
pub(crate) struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    /// An empty block aligned for `T`.
    pub(crate) fn dangling<T>() -> Self {
        let layout = Layout::new::<[T; 0]>();
        Self {
            ptr: dangling_for(layout),
            layout,
        }
    }

    pub(crate) fn allocate<A: Allocator>(alloc: &A, layout: Layout) -> Result<Self> {
        if layout.size() == 0 {
            return Ok(Self {
                ptr: dangling_for(layout),
                layout,
            });
        }

        match alloc.allocate(layout) {
            Ok(block) => Ok(Self {
                ptr: block.cast(),
                layout,
            }),
            Err(_) => {
                warn!(
                    size = layout.size(),
                    align = layout.align(),
                    "allocator refused block"
                );
                Err(Error::AllocFailed {
                    size: layout.size(),
                    align: layout.align(),
                })
            }
        }
    }

    /// Returns the block to `alloc`.
    ///
    /// # Safety
    ///
    /// `alloc` must be the allocator (or a copy of it) the block was obtained
    /// from, and nothing may access the block afterwards.
    pub(crate) unsafe fn release<A: Allocator>(self, alloc: &A) {
        if self.layout.size() != 0 {
            // SAFETY: Caller guarantees the block came from `alloc` with
            // `self.layout`.
            unsafe { alloc.deallocate(self.ptr, self.layout) }
        }
    }

    #[inline(always)]
    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline(always)]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }
}

fn dangling_for(layout: Layout) -> NonNull<u8> {
    // SAFETY: Alignments are never zero.
    unsafe { NonNull::new_unchecked(core::ptr::without_provenance_mut(layout.align())) }
}

/// Capacity to grow to so that `required` slots fit: at least double the
/// current capacity, at least `minimum`, always a power of two.
pub(crate) fn grown_capacity(current: usize, required: usize, minimum: usize) -> Result<usize> {
    debug_assert!(minimum.is_power_of_two());
    current
        .checked_mul(2)
        .ok_or(Error::CapacityOverflow)?
        .max(required)
        .max(minimum)
        .checked_next_power_of_two()
        .ok_or(Error::CapacityOverflow)
}

/// Aborts through the global allocation error handler. Used only where a
/// trait signature (such as `Clone`) leaves no error channel.
pub(crate) fn unwrap_or_abort<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(Error::AllocFailed { size, align }) => match Layout::from_size_align(size, align) {
            Ok(layout) => alloc::alloc::handle_alloc_error(layout),
            Err(_) => panic!("capacity overflow"),
        },
        Err(err) => panic!("{err}"),
    }
}
