//! Allocation strategies.
//!
//! Containers in this crate take their memory from a value implementing
//! [`Allocator`]. The handle is held by value inside the container and is
//! consulted only at construction, growth, and teardown. Every block obtained
//! through `allocate` is returned through `deallocate` with the same layout.
//!
//! Three strategies are provided next to the heap-backed [`Global`]:
//!
//! - [`StaticBuffer`] / [`StaticAlloc`]: a fixed-capacity inline buffer, so a
//!   bounded container can live entirely on the stack.
//! - [`DoubleAllocator`]: small requests go to a static buffer, large ones (or
//!   ones the buffer cannot satisfy) to a fallback allocator.
//! - [`Tracking`]: forwards to another allocator and counts live blocks.

use core::alloc::Layout;
use core::cell::Cell;
use core::cell::UnsafeCell;
use core::fmt::Debug;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

pub use allocator_api2::alloc::AllocError;
pub use allocator_api2::alloc::Allocator;
pub use allocator_api2::alloc::Global;

/// Fixed-capacity bump storage of `N` bytes.
///
/// The buffer itself is not an allocator; hand out [`StaticAlloc`] handles
/// with [`StaticBuffer::handle`]. This keeps the storage at a fixed address
/// for as long as any container borrows it.
///
/// Blocks are carved off a cursor. Releasing the most recent block rolls the
/// cursor back; other releases are reclaimed by [`StaticBuffer::reset`].
///
/// # Examples
///
/// ```rust
/// use arena_tables::SlotTable;
/// use arena_tables::allocator::StaticBuffer;
///
/// let buffer: StaticBuffer<4096> = StaticBuffer::new();
/// let mut table = SlotTable::new_in(buffer.handle());
/// let index = table.emplace(7u32).unwrap();
/// assert_eq!(table[index], 7);
/// assert!(buffer.used() > 0);
/// ```
#[repr(C, align(16))]
pub struct StaticBuffer<const N: usize> {
    bytes: UnsafeCell<[MaybeUninit<u8>; N]>,
    cursor: Cell<usize>,
}

impl<const N: usize> Default for StaticBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Debug for StaticBuffer<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StaticBuffer")
            .field("capacity", &N)
            .field("used", &self.cursor.get())
            .finish()
    }
}

impl<const N: usize> StaticBuffer<N> {
    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([MaybeUninit::uninit(); N]),
            cursor: Cell::new(0),
        }
    }

    /// Returns a copyable allocator handle backed by this buffer.
    pub fn handle(&self) -> StaticAlloc<'_, N> {
        StaticAlloc { buffer: self }
    }

    /// Total size of the buffer in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes currently handed out, including alignment padding.
    pub fn used(&self) -> usize {
        self.cursor.get()
    }

    /// Bytes still available past the cursor.
    pub fn remaining(&self) -> usize {
        N - self.cursor.get()
    }

    /// Returns `true` if `ptr` points into this buffer.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let start = self.base() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= start && addr < start + N
    }

    /// Reclaims the whole buffer.
    ///
    /// Taking `&mut self` proves that no handle, and therefore no container
    /// block, is still outstanding.
    pub fn reset(&mut self) {
        self.cursor.set(0);
    }

    fn base(&self) -> *mut u8 {
        self.bytes.get().cast()
    }

    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let cursor = self.cursor.get();
        // SAFETY: `cursor <= N`, so the pointer stays within (or one past) the
        // buffer.
        let start = unsafe { self.base().add(cursor) };
        let padding = start.align_offset(layout.align());
        let offset = cursor.checked_add(padding).ok_or(AllocError)?;
        let end = offset.checked_add(layout.size()).ok_or(AllocError)?;
        if end > N {
            return Err(AllocError);
        }

        self.cursor.set(end);
        // SAFETY: `offset <= end <= N`, so the pointer is within the buffer and
        // therefore non-null.
        let ptr = unsafe { NonNull::new_unchecked(self.base().add(offset)) };
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        debug_assert!(self.owns(ptr) || layout.size() == 0);
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base() as usize);
        if self.owns(ptr) && offset + layout.size() == self.cursor.get() {
            self.cursor.set(offset);
        }
    }
}

/// Copyable allocator handle into a [`StaticBuffer`].
#[derive(Clone, Copy)]
pub struct StaticAlloc<'a, const N: usize> {
    buffer: &'a StaticBuffer<N>,
}

impl<const N: usize> Debug for StaticAlloc<'_, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("StaticAlloc").field(self.buffer).finish()
    }
}

impl<'a, const N: usize> StaticAlloc<'a, N> {
    /// The buffer this handle allocates from.
    pub fn buffer(&self) -> &'a StaticBuffer<N> {
        self.buffer
    }
}

// SAFETY: Blocks handed out are disjoint ranges of the buffer, stay valid for
// the buffer's lifetime (which outlives the handle), and are only reused once
// released.
unsafe impl<const N: usize> Allocator for StaticAlloc<'_, N> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.buffer.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.buffer.deallocate(ptr, layout);
    }
}

/// Serves requests up to `threshold` bytes from a static buffer and falls
/// back to a secondary allocator above it, or when the buffer is full.
///
/// # Examples
///
/// ```rust
/// use arena_tables::HashTable;
/// use arena_tables::allocator::DoubleAllocator;
/// use arena_tables::allocator::Global;
/// use arena_tables::allocator::StaticBuffer;
///
/// let buffer: StaticBuffer<1024> = StaticBuffer::new();
/// let alloc = DoubleAllocator::new(buffer.handle(), 512, Global);
/// let mut table: HashTable<u64, u64, _> = HashTable::new_in(alloc);
/// for key in 0..1000 {
///     table.emplace(key, key).unwrap();
/// }
/// assert_eq!(table.len(), 1000);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct DoubleAllocator<'a, const N: usize, A> {
    primary: StaticAlloc<'a, N>,
    threshold: usize,
    fallback: A,
}

impl<'a, const N: usize, A: Allocator> DoubleAllocator<'a, N, A> {
    /// Creates a double allocator over `primary` with the given size
    /// threshold and fallback.
    pub fn new(primary: StaticAlloc<'a, N>, threshold: usize, fallback: A) -> Self {
        Self {
            primary,
            threshold,
            fallback,
        }
    }

    /// Largest request size served from the static buffer.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The fallback allocator.
    pub fn fallback(&self) -> &A {
        &self.fallback
    }
}

// SAFETY: Each block comes from exactly one of the two allocators, and
// `deallocate` routes it back to the one that owns the pointer.
unsafe impl<const N: usize, A: Allocator> Allocator for DoubleAllocator<'_, N, A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if layout.size() <= self.threshold {
            if let Ok(block) = self.primary.allocate(layout) {
                return Ok(block);
            }
        }

        self.fallback.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if self.primary.buffer.owns(ptr) {
            // SAFETY: forwarded; the block came from the primary buffer.
            unsafe { self.primary.deallocate(ptr, layout) }
        } else {
            // SAFETY: forwarded; the block came from the fallback.
            unsafe { self.fallback.deallocate(ptr, layout) }
        }
    }
}

/// Counters updated by a [`Tracking`] allocator.
#[derive(Debug, Default)]
pub struct AllocStats {
    allocations: Cell<usize>,
    deallocations: Cell<usize>,
    live_bytes: Cell<usize>,
}

impl AllocStats {
    /// Creates zeroed counters.
    pub const fn new() -> Self {
        Self {
            allocations: Cell::new(0),
            deallocations: Cell::new(0),
            live_bytes: Cell::new(0),
        }
    }

    /// Number of successful allocations.
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    /// Number of deallocations.
    pub fn deallocations(&self) -> usize {
        self.deallocations.get()
    }

    /// Blocks allocated and not yet released.
    pub fn live_blocks(&self) -> usize {
        self.allocations.get() - self.deallocations.get()
    }

    /// Nominal bytes allocated and not yet released.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.get()
    }
}

/// Forwards to an inner allocator and records every call in an
/// [`AllocStats`].
#[derive(Debug, Clone, Copy)]
pub struct Tracking<'a, A> {
    inner: A,
    stats: &'a AllocStats,
}

impl<'a, A: Allocator> Tracking<'a, A> {
    /// Wraps `inner`, recording into `stats`.
    pub fn new(inner: A, stats: &'a AllocStats) -> Self {
        Self { inner, stats }
    }

    /// The counters this handle records into.
    pub fn stats(&self) -> &'a AllocStats {
        self.stats
    }
}

// SAFETY: All calls are forwarded unchanged to `inner`.
unsafe impl<A: Allocator> Allocator for Tracking<'_, A> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let block = self.inner.allocate(layout)?;
        self.stats.allocations.set(self.stats.allocations.get() + 1);
        self.stats
            .live_bytes
            .set(self.stats.live_bytes.get() + layout.size());
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats
            .deallocations
            .set(self.stats.deallocations.get() + 1);
        self.stats
            .live_bytes
            .set(self.stats.live_bytes.get() - layout.size());
        // SAFETY: forwarded.
        unsafe { self.inner.deallocate(ptr, layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_buffer_bumps_and_rolls_back() {
        let buffer: StaticBuffer<64> = StaticBuffer::new();
        let alloc = buffer.handle();

        let a = alloc.allocate(Layout::new::<u64>()).unwrap();
        assert_eq!(a.len(), 8);
        assert_eq!(buffer.used(), 8);

        let b = alloc.allocate(Layout::new::<u32>()).unwrap();
        assert_eq!(buffer.used(), 12);

        // Releasing the latest block rolls the cursor back.
        unsafe { alloc.deallocate(b.cast(), Layout::new::<u32>()) };
        assert_eq!(buffer.used(), 8);

        // Releasing an older block does not.
        let _c = alloc.allocate(Layout::new::<u8>()).unwrap();
        unsafe { alloc.deallocate(a.cast(), Layout::new::<u64>()) };
        assert_eq!(buffer.used(), 9);
    }

    #[test]
    fn static_buffer_respects_alignment() {
        let buffer: StaticBuffer<128> = StaticBuffer::new();
        let alloc = buffer.handle();

        alloc.allocate(Layout::new::<u8>()).unwrap();
        let wide = alloc
            .allocate(Layout::from_size_align(16, 16).unwrap())
            .unwrap();
        assert_eq!(wide.cast::<u8>().as_ptr() as usize % 16, 0);
        assert!(buffer.owns(wide.cast()));
    }

    #[test]
    fn static_buffer_exhaustion_fails() {
        let buffer: StaticBuffer<16> = StaticBuffer::new();
        let alloc = buffer.handle();

        assert!(alloc.allocate(Layout::array::<u8>(17).unwrap()).is_err());
        alloc.allocate(Layout::array::<u8>(16).unwrap()).unwrap();
        assert_eq!(buffer.remaining(), 0);
        assert!(alloc.allocate(Layout::new::<u8>()).is_err());
    }

    #[test]
    fn static_buffer_reset() {
        let mut buffer: StaticBuffer<32> = StaticBuffer::new();
        buffer
            .handle()
            .allocate(Layout::array::<u8>(32).unwrap())
            .unwrap();
        assert_eq!(buffer.remaining(), 0);
        buffer.reset();
        assert_eq!(buffer.remaining(), 32);
    }

    #[test]
    fn double_allocator_routes_by_size() {
        let buffer: StaticBuffer<256> = StaticBuffer::new();
        let alloc = DoubleAllocator::new(buffer.handle(), 64, Global);

        let small = alloc.allocate(Layout::array::<u8>(32).unwrap()).unwrap();
        assert!(buffer.owns(small.cast()));

        let large = alloc.allocate(Layout::array::<u8>(128).unwrap()).unwrap();
        assert!(!buffer.owns(large.cast()));

        unsafe {
            alloc.deallocate(large.cast(), Layout::array::<u8>(128).unwrap());
            alloc.deallocate(small.cast(), Layout::array::<u8>(32).unwrap());
        }
        assert_eq!(buffer.used(), 0);
    }

    #[test]
    fn double_allocator_falls_back_when_full() {
        let buffer: StaticBuffer<32> = StaticBuffer::new();
        let alloc = DoubleAllocator::new(buffer.handle(), 32, Global);

        let first = alloc.allocate(Layout::array::<u8>(32).unwrap()).unwrap();
        let second = alloc.allocate(Layout::array::<u8>(16).unwrap()).unwrap();
        assert!(buffer.owns(first.cast()));
        assert!(!buffer.owns(second.cast()));

        unsafe {
            alloc.deallocate(second.cast(), Layout::array::<u8>(16).unwrap());
            alloc.deallocate(first.cast(), Layout::array::<u8>(32).unwrap());
        }
    }

    #[test]
    fn tracking_counts_pairs() {
        let stats = AllocStats::new();
        let alloc = Tracking::new(Global, &stats);

        let layout = Layout::array::<u64>(4).unwrap();
        let block = alloc.allocate(layout).unwrap();
        assert_eq!(stats.live_blocks(), 1);
        assert_eq!(stats.live_bytes(), 32);

        unsafe { alloc.deallocate(block.cast(), layout) };
        assert_eq!(stats.allocations(), 1);
        assert_eq!(stats.deallocations(), 1);
        assert_eq!(stats.live_blocks(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }
}
