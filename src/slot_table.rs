//! Index-stable slot container.
//!
//! A [`SlotTable`] stores elements at integer indices that stay valid for as
//! long as the element is live, which makes them suitable as long-lived
//! handles held by unrelated subsystems. Occupancy is tracked by a bitset;
//! element storage and the bitset are two separate allocations from the
//! table's allocator.

use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::ops::Index;
use core::ops::IndexMut;
use core::ptr::NonNull;

use tracing::debug;

use crate::allocator::Allocator;
use crate::allocator::Global;
use crate::bitset;
use crate::bitset::WORD_BITS;
use crate::bitset::Word;
use crate::error::Error;
use crate::error::Result;
use crate::raw::RawBlock;
use crate::raw::grown_capacity;
use crate::raw::unwrap_or_abort;

/// An index-stable container over an [`Allocator`].
///
/// Capacity is always zero or a power of two no smaller than the bitset word
/// width. [`emplace`] reuses the lowest free index before growing, and
/// growth never moves an element to a different index.
///
/// [`emplace`]: SlotTable::emplace
///
/// # Examples
///
/// ```rust
/// use arena_tables::SlotTable;
///
/// let mut table = SlotTable::new();
/// let a = table.emplace("a").unwrap();
/// let b = table.emplace("b").unwrap();
/// assert_eq!((a, b), (0, 1));
///
/// assert_eq!(table.pop(a), Ok("a"));
/// assert!(!table.is_slot_occupied(a));
///
/// // The freed index is handed out again before any new one.
/// assert_eq!(table.emplace("c").unwrap(), a);
/// ```
pub struct SlotTable<T, A: Allocator = Global> {
    data: RawBlock,
    bits: RawBlock,
    capacity: usize,
    len: usize,
    alloc: A,

    _phantom: PhantomData<T>,
}

// SAFETY: The table owns its elements; sending or sharing it is equivalent to
// sending or sharing the elements and the allocator.
unsafe impl<T: Send, A: Allocator + Send> Send for SlotTable<T, A> {}
// SAFETY: See above; `&SlotTable` only hands out `&T`.
unsafe impl<T: Sync, A: Allocator + Sync> Sync for SlotTable<T, A> {}

impl<T> SlotTable<T> {
    /// Creates an empty table backed by the global heap. Does not allocate.
    pub fn new() -> Self {
        Self::new_in(Global)
    }

    /// Creates a table able to hold `capacity` elements before growing.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::with_capacity_in(capacity, Global)
    }
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: Allocator> SlotTable<T, A> {
    /// Creates an empty table that will allocate from `alloc`. Does not
    /// allocate.
    pub fn new_in(alloc: A) -> Self {
        Self {
            data: RawBlock::dangling::<T>(),
            bits: RawBlock::dangling::<Word>(),
            capacity: 0,
            len: 0,
            alloc,
            _phantom: PhantomData,
        }
    }

    /// Creates a table in `alloc` able to hold `capacity` elements before
    /// growing.
    ///
    /// The capacity is rounded up to a power of two no smaller than the
    /// bitset word width.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::SlotTable;
    /// use arena_tables::allocator::Global;
    ///
    /// let table: SlotTable<u32> = SlotTable::with_capacity_in(100, Global).unwrap();
    /// assert_eq!(table.capacity(), 128);
    /// ```
    pub fn with_capacity_in(capacity: usize, alloc: A) -> Result<Self> {
        let mut table = Self::new_in(alloc);
        if capacity > 0 {
            let capacity = grown_capacity(0, capacity, WORD_BITS)?;
            table.grow_to(capacity)?;
        }
        Ok(table)
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The allocator backing this table.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    fn words(&self) -> &[Word] {
        // SAFETY: `bits` holds `capacity / WORD_BITS` initialized words, or is
        // an aligned dangling pointer when the capacity is zero.
        unsafe {
            core::slice::from_raw_parts(
                self.bits.ptr().cast::<Word>().as_ptr(),
                self.capacity / WORD_BITS,
            )
        }
    }

    fn words_mut(&mut self) -> &mut [Word] {
        // SAFETY: As in `words`, and `&mut self` guarantees exclusivity.
        unsafe {
            core::slice::from_raw_parts_mut(
                self.bits.ptr().cast::<Word>().as_ptr(),
                self.capacity / WORD_BITS,
            )
        }
    }

    #[inline(always)]
    fn slot_ptr(&self, index: usize) -> *mut T {
        debug_assert!(index < self.capacity);
        // SAFETY: `index < capacity` keeps the offset within the data block.
        unsafe { self.data.ptr().cast::<T>().as_ptr().add(index) }
    }

    /// Returns `true` if `index` holds a live element. Out-of-range indices
    /// are never occupied.
    #[inline]
    pub fn is_slot_occupied(&self, index: usize) -> bool {
        bitset::test(self.words(), index)
    }

    /// Returns a reference to the element at `index`, if occupied.
    pub fn get(&self, index: usize) -> Option<&T> {
        if !self.is_slot_occupied(index) {
            return None;
        }

        // SAFETY: The occupancy bit guarantees the slot is initialized.
        Some(unsafe { &*self.slot_ptr(index) })
    }

    /// Returns a mutable reference to the element at `index`, if occupied.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.is_slot_occupied(index) {
            return None;
        }

        // SAFETY: The occupancy bit guarantees the slot is initialized, and
        // `&mut self` guarantees exclusivity.
        Some(unsafe { &mut *self.slot_ptr(index) })
    }

    /// Stores `value` at the lowest free index and returns that index.
    ///
    /// If every slot is occupied the capacity doubles first. Indices of other
    /// live elements are never affected.
    ///
    /// # Errors
    ///
    /// [`Error::AllocFailed`] or [`Error::CapacityOverflow`] if growth fails;
    /// the table is unchanged and `value` is dropped.
    pub fn emplace(&mut self, value: T) -> Result<usize> {
        self.emplace_with(|_| value)
    }

    /// Like [`emplace`](Self::emplace), but builds the element from the index
    /// it is about to occupy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::SlotTable;
    ///
    /// #[derive(Debug)]
    /// struct Node {
    ///     id: usize,
    /// }
    ///
    /// let mut nodes = SlotTable::new();
    /// let id = nodes.emplace_with(|id| Node { id }).unwrap();
    /// assert_eq!(nodes[id].id, id);
    /// ```
    pub fn emplace_with(&mut self, f: impl FnOnce(usize) -> T) -> Result<usize> {
        let index = match bitset::first_clear(self.words()) {
            Some(index) => index,
            None => {
                let index = self.capacity;
                self.grow_for(index)?;
                index
            }
        };

        // SAFETY: `index` is in range and its bit is clear.
        unsafe { self.write(index, f(index)) };
        Ok(index)
    }

    /// Stores `value` at exactly `index`, growing so that the index is in
    /// range, and returns a reference to it.
    ///
    /// # Errors
    ///
    /// [`Error::SlotOccupied`] if `index` already holds an element (it is
    /// left untouched), or an allocation error if growth fails.
    pub fn emplace_at(&mut self, index: usize, value: T) -> Result<&mut T> {
        if self.is_slot_occupied(index) {
            return Err(Error::SlotOccupied(index));
        }
        if index >= self.capacity {
            self.grow_for(index)?;
        }

        // SAFETY: `index` is in range and its bit is clear.
        Ok(unsafe { self.write(index, value) })
    }

    /// Removes the element at `index` and returns it. The index becomes
    /// available to later calls to [`emplace`](Self::emplace).
    ///
    /// # Errors
    ///
    /// [`Error::SlotNotOccupied`] if `index` holds no element.
    pub fn pop(&mut self, index: usize) -> Result<T> {
        if !self.is_slot_occupied(index) {
            return Err(Error::SlotNotOccupied(index));
        }

        bitset::clear(self.words_mut(), index);
        self.len -= 1;
        // SAFETY: The bit was set, so the slot was initialized; clearing the
        // bit hands ownership of the value to the caller.
        Ok(unsafe { self.slot_ptr(index).read() })
    }

    /// Drops every live element and clears all bits. Capacity is unchanged.
    pub fn clear(&mut self) {
        let end = self.capacity;
        let mut from = 0;
        while let Some(index) = bitset::next_set(self.words(), from, end) {
            bitset::clear(self.words_mut(), index);
            self.len -= 1;
            // SAFETY: The bit was set, so the slot was initialized. The bit is
            // cleared before dropping so a panicking destructor leaks instead
            // of double dropping.
            unsafe { self.slot_ptr(index).drop_in_place() };
            from = index + 1;
        }

        debug_assert_eq!(self.len, 0);
    }

    /// Ensures at least `additional` more elements fit without growing.
    ///
    /// # Errors
    ///
    /// An allocation error if growth fails; the table is unchanged.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let required = self
            .len
            .checked_add(additional)
            .ok_or(Error::CapacityOverflow)?;
        if required > self.capacity {
            self.grow_to(grown_capacity(self.capacity, required, WORD_BITS)?)?;
        }
        Ok(())
    }

    /// Returns an iterator over `(index, &element)` in ascending index order.
    ///
    /// The iterator is double-ended; `.rev()` walks indices in descending
    /// order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::SlotTable;
    ///
    /// let mut table = SlotTable::new();
    /// for c in ['a', 'b', 'c', 'd'] {
    ///     table.emplace(c).unwrap();
    /// }
    /// table.pop(2).unwrap();
    ///
    /// let forward: Vec<_> = table.iter().map(|(i, &c)| (i, c)).collect();
    /// assert_eq!(forward, [(0, 'a'), (1, 'b'), (3, 'd')]);
    ///
    /// let backward: Vec<_> = table.iter().rev().map(|(i, _)| i).collect();
    /// assert_eq!(backward, [3, 1, 0]);
    /// ```
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            words: self.words(),
            data: self.data.ptr().cast(),
            cursor: Cursor::new(self.capacity, self.len),
            _phantom: PhantomData,
        }
    }

    /// Returns an iterator over `(index, &mut element)` in ascending index
    /// order.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        let cursor = Cursor::new(self.capacity, self.len);
        let data = self.data.ptr().cast();
        IterMut {
            words: self.words(),
            data,
            cursor,
            _phantom: PhantomData,
        }
    }

    /// Returns an iterator over the occupied indices in ascending order.
    pub fn indices(&self) -> impl DoubleEndedIterator<Item = usize> + ExactSizeIterator + '_ {
        self.iter().map(|(index, _)| index)
    }

    /// Clones the table into a new allocation from a clone of its allocator.
    /// Every element keeps its index.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
        A: Clone,
    {
        let mut table = Self::new_in(self.alloc.clone());
        if self.capacity > 0 {
            table.grow_to(self.capacity)?;
        }
        for (index, value) in self.iter() {
            // SAFETY: Same capacity, and each index is written once.
            unsafe { table.write(index, value.clone()) };
        }
        Ok(table)
    }

    /// # Safety
    ///
    /// `index < capacity` and the slot must be vacant.
    unsafe fn write(&mut self, index: usize, value: T) -> &mut T {
        debug_assert!(!self.is_slot_occupied(index));
        let slot = self.slot_ptr(index);
        // SAFETY: Caller guarantees `index` is in range and vacant.
        unsafe { slot.write(value) };
        bitset::set(self.words_mut(), index);
        self.len += 1;
        // SAFETY: Just initialized.
        unsafe { &mut *slot }
    }

    #[cold]
    fn grow_for(&mut self, index: usize) -> Result<()> {
        let required = index.checked_add(1).ok_or(Error::CapacityOverflow)?;
        self.grow_to(grown_capacity(self.capacity, required, WORD_BITS)?)
    }

    fn grow_to(&mut self, capacity: usize) -> Result<()> {
        debug_assert!(capacity.is_power_of_two());
        debug_assert!(capacity >= WORD_BITS);
        debug_assert!(capacity > self.capacity);

        let data_layout = Layout::array::<T>(capacity).map_err(|_| Error::CapacityOverflow)?;
        let bits_layout =
            Layout::array::<Word>(capacity / WORD_BITS).map_err(|_| Error::CapacityOverflow)?;

        let new_data = RawBlock::allocate(&self.alloc, data_layout)?;
        let new_bits = match RawBlock::allocate(&self.alloc, bits_layout) {
            Ok(block) => block,
            Err(err) => {
                // SAFETY: Just allocated from `self.alloc` and never exposed.
                unsafe { new_data.release(&self.alloc) };
                return Err(err);
            }
        };

        let old_words = self.capacity / WORD_BITS;
        // SAFETY: Both new blocks are sized for `capacity`, which exceeds the
        // old capacity. Live elements are moved bitwise to the same index, and
        // the old blocks are released without dropping anything, so each
        // element is owned by exactly one block at any time.
        unsafe {
            let words = new_bits.ptr().cast::<Word>().as_ptr();
            core::ptr::copy_nonoverlapping(self.bits.ptr().cast::<Word>().as_ptr(), words, old_words);
            core::ptr::write_bytes(words.add(old_words), 0, capacity / WORD_BITS - old_words);

            let dst = new_data.ptr().cast::<T>().as_ptr();
            let mut from = 0;
            while let Some(index) = bitset::next_set(self.words(), from, self.capacity) {
                core::ptr::copy_nonoverlapping(self.slot_ptr(index), dst.add(index), 1);
                from = index + 1;
            }

            let old_data = core::mem::replace(&mut self.data, new_data);
            let old_bits = core::mem::replace(&mut self.bits, new_bits);
            old_data.release(&self.alloc);
            old_bits.release(&self.alloc);
        }

        debug!(
            from = self.capacity,
            to = capacity,
            live = self.len,
            "slot table grown"
        );
        self.capacity = capacity;
        Ok(())
    }
}

impl<T, A: Allocator> Drop for SlotTable<T, A> {
    fn drop(&mut self) {
        if core::mem::needs_drop::<T>() && self.len > 0 {
            self.clear();
        }

        let data = core::mem::replace(&mut self.data, RawBlock::dangling::<T>());
        let bits = core::mem::replace(&mut self.bits, RawBlock::dangling::<Word>());
        // SAFETY: Both blocks came from `self.alloc` and no element is live.
        unsafe {
            data.release(&self.alloc);
            bits.release(&self.alloc);
        }
    }
}

impl<T: Clone, A: Allocator + Clone> Clone for SlotTable<T, A> {
    fn clone(&self) -> Self {
        unwrap_or_abort(self.try_clone())
    }
}

impl<T: Debug, A: Allocator> Debug for SlotTable<T, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T, A: Allocator> Index<usize> for SlotTable<T, A> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(value) => value,
            None => panic!("slot {index} is not occupied"),
        }
    }
}

impl<T, A: Allocator> IndexMut<usize> for SlotTable<T, A> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        match self.get_mut(index) {
            Some(value) => value,
            None => panic!("slot {index} is not occupied"),
        }
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a SlotTable<T, A> {
    type Item = (usize, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T, A: Allocator> IntoIterator for &'a mut SlotTable<T, A> {
    type Item = (usize, &'a mut T);
    type IntoIter = IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// Front/back window over the bitset, shared by both iterators.
#[derive(Clone)]
struct Cursor {
    front: usize,
    back: usize,
    remaining: usize,
}

impl Cursor {
    fn new(capacity: usize, len: usize) -> Self {
        Self {
            front: 0,
            back: capacity,
            remaining: len,
        }
    }

    fn next(&mut self, words: &[Word]) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }

        let index = bitset::next_set(words, self.front, self.back)?;
        self.front = index + 1;
        self.remaining -= 1;
        Some(index)
    }

    fn next_back(&mut self, words: &[Word]) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }

        let index = bitset::prev_set(words, self.front, self.back)?;
        self.back = index;
        self.remaining -= 1;
        Some(index)
    }
}

/// An iterator over the live elements of a [`SlotTable`].
///
/// Created by [`SlotTable::iter`].
pub struct Iter<'a, T> {
    words: &'a [Word],
    data: NonNull<T>,
    cursor: Cursor,
    _phantom: PhantomData<&'a T>,
}

impl<T> Clone for Iter<'_, T> {
    fn clone(&self) -> Self {
        Self {
            words: self.words,
            data: self.data,
            cursor: self.cursor.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor.next(self.words)?;
        // SAFETY: The bit at `index` is set, so the slot is initialized, and
        // the shared borrow of the table outlives `'a`.
        Some((index, unsafe { &*self.data.as_ptr().add(index) }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let index = self.cursor.next_back(self.words)?;
        // SAFETY: As in `next`.
        Some((index, unsafe { &*self.data.as_ptr().add(index) }))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

/// A mutable iterator over the live elements of a [`SlotTable`].
///
/// Created by [`SlotTable::iter_mut`].
pub struct IterMut<'a, T> {
    words: &'a [Word],
    data: NonNull<T>,
    cursor: Cursor,
    _phantom: PhantomData<&'a mut T>,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = (usize, &'a mut T);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor.next(self.words)?;
        // SAFETY: The slot is initialized, and the cursor yields each index at
        // most once, so no two returned references alias.
        Some((index, unsafe { &mut *self.data.as_ptr().add(index) }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cursor.remaining, Some(self.cursor.remaining))
    }
}

impl<T> DoubleEndedIterator for IterMut<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let index = self.cursor.next_back(self.words)?;
        // SAFETY: As in `next`.
        Some((index, unsafe { &mut *self.data.as_ptr().add(index) }))
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use core::cell::Cell;

    use super::*;
    use crate::allocator::AllocStats;
    use crate::allocator::StaticBuffer;
    use crate::allocator::Tracking;

    #[test]
    fn popped_index_is_reused_before_tail() {
        let mut table = SlotTable::new();
        for i in 0..4 {
            assert_eq!(table.emplace(i).unwrap(), i);
        }

        assert_eq!(table.pop(1), Ok(1));
        assert_eq!(table.emplace(10).unwrap(), 1);
        assert_eq!(table.emplace(11).unwrap(), 4);
        assert_eq!(table[1], 10);
    }

    #[test]
    fn occupied_index_is_never_handed_out() {
        let mut table = SlotTable::new();
        let mut live: Vec<(usize, usize)> = Vec::new();
        for round in 0..300usize {
            let index = table.emplace(round).unwrap();
            assert!(
                live.iter().all(|&(i, _)| i != index),
                "index {index} handed out twice"
            );
            live.push((index, round));
            if round % 3 == 0 {
                let (victim, value) = live.remove(round % live.len());
                assert_eq!(table.pop(victim), Ok(value));
            }
        }
        assert_eq!(table.len(), live.len());
        for (index, value) in live {
            assert_eq!(table[index], value);
        }
    }

    #[test]
    fn clear_then_emplace_starts_at_zero() {
        let mut table = SlotTable::with_capacity(8).unwrap();
        for i in 0..20 {
            table.emplace(i).unwrap();
        }
        let capacity = table.capacity();

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.capacity(), capacity);
        assert_eq!(table.iter().count(), 0);

        assert_eq!(table.emplace(99).unwrap(), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn growth_keeps_indices() {
        let mut table = SlotTable::new();
        for i in 0..WORD_BITS {
            table.emplace(i.to_string()).unwrap();
        }
        assert_eq!(table.capacity(), WORD_BITS);

        table.pop(5).unwrap();
        table.pop(WORD_BITS - 1).unwrap();
        table.emplace_at(3 * WORD_BITS + 7, "far".to_string()).unwrap();
        assert_eq!(table.capacity(), 4 * WORD_BITS);

        for i in 0..WORD_BITS {
            if i == 5 || i == WORD_BITS - 1 {
                assert!(!table.is_slot_occupied(i));
            } else {
                assert_eq!(table[i], i.to_string());
            }
        }
        assert_eq!(table[3 * WORD_BITS + 7], "far");
    }

    #[test]
    fn capacity_is_power_of_two_word_multiple() {
        for requested in [1, 3, WORD_BITS, WORD_BITS + 1, 1000] {
            let table: SlotTable<u8> = SlotTable::with_capacity(requested).unwrap();
            assert!(table.capacity().is_power_of_two());
            assert_eq!(table.capacity() % WORD_BITS, 0);
            assert!(table.capacity() >= requested);
        }
        let empty: SlotTable<u8> = SlotTable::with_capacity(0).unwrap();
        assert_eq!(empty.capacity(), 0);
    }

    #[test]
    fn emplace_at_rejects_occupied_slot() {
        let mut table = SlotTable::new();
        table.emplace_at(2, "first").unwrap();
        assert_eq!(table.emplace_at(2, "second"), Err(Error::SlotOccupied(2)));
        assert_eq!(table[2], "first");

        // Lower indices are still free for emplace.
        assert_eq!(table.emplace("zero").unwrap(), 0);
    }

    #[test]
    fn pop_unoccupied_is_an_error() {
        let mut table: SlotTable<u32> = SlotTable::new();
        assert_eq!(table.pop(0), Err(Error::SlotNotOccupied(0)));
        table.emplace(1).unwrap();
        assert_eq!(table.pop(1), Err(Error::SlotNotOccupied(1)));
        assert_eq!(table.pop(0), Ok(1));
        assert_eq!(table.pop(0), Err(Error::SlotNotOccupied(0)));
    }

    #[test]
    fn iterates_forward_and_backward() {
        let mut table = SlotTable::new();
        for i in 0..(2 * WORD_BITS + 3) {
            table.emplace(i).unwrap();
        }
        for i in (0..table.capacity()).step_by(3) {
            let _ = table.pop(i);
        }

        let forward: Vec<usize> = table.indices().collect();
        let mut expected: Vec<usize> = (0..(2 * WORD_BITS + 3)).filter(|i| i % 3 != 0).collect();
        assert_eq!(forward, expected);
        assert_eq!(table.iter().len(), expected.len());

        let backward: Vec<usize> = table.indices().rev().collect();
        expected.reverse();
        assert_eq!(backward, expected);

        // Meeting in the middle yields each element once.
        let mut iter = table.iter();
        let mut seen = Vec::new();
        loop {
            match (iter.next(), iter.next_back()) {
                (None, None) => break,
                (a, b) => seen.extend(a.into_iter().chain(b).map(|(i, _)| i)),
            }
        }
        seen.sort();
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[test]
    fn iter_mut_updates_in_place() {
        let mut table = SlotTable::new();
        for i in 0..10u32 {
            table.emplace(i).unwrap();
        }
        for (index, value) in table.iter_mut() {
            *value += index as u32;
        }
        for (index, value) in &table {
            assert_eq!(*value, 2 * index as u32);
        }
    }

    struct DropCounter<'a>(&'a Cell<usize>);

    impl Drop for DropCounter<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn drops_each_element_once() {
        let drops = Cell::new(0);
        {
            let mut table = SlotTable::new();
            for _ in 0..100 {
                table.emplace(DropCounter(&drops)).unwrap();
            }
            drop(table.pop(10).unwrap());
            assert_eq!(drops.get(), 1);
            table.clear();
            assert_eq!(drops.get(), 100);

            for _ in 0..5 {
                table.emplace(DropCounter(&drops)).unwrap();
            }
        }
        assert_eq!(drops.get(), 105);
    }

    #[test]
    fn allocations_are_released() {
        let stats = AllocStats::new();
        {
            let mut table = SlotTable::new_in(Tracking::new(Global, &stats));
            for i in 0..1000 {
                table.emplace(Rc::new(i)).unwrap();
            }
            let cloned = table.clone();
            assert_eq!(cloned.len(), 1000);
            assert_eq!(*cloned[999], 999);
        }
        assert!(stats.allocations() > 2);
        assert_eq!(stats.live_blocks(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn exhausted_allocator_leaves_table_intact() {
        let buffer: StaticBuffer<512> = StaticBuffer::new();
        let mut table = SlotTable::new_in(buffer.handle());

        let mut inserted = 0usize;
        let err = loop {
            match table.emplace(inserted as u8) {
                Ok(_) => inserted += 1,
                Err(err) => break err,
            }
        };
        assert!(matches!(err, Error::AllocFailed { .. }));
        assert!(inserted >= WORD_BITS);
        assert_eq!(table.len(), inserted);
        assert_eq!(table.capacity(), inserted);
        for i in 0..inserted {
            assert_eq!(table[i], i as u8);
        }
    }

    #[test]
    fn zero_sized_elements() {
        let mut table = SlotTable::new();
        for _ in 0..(WORD_BITS + 1) {
            table.emplace(()).unwrap();
        }
        assert_eq!(table.len(), WORD_BITS + 1);
        assert_eq!(table.pop(0), Ok(()));
        assert_eq!(table.emplace(()).unwrap(), 0);
    }

    #[test]
    fn debug_lists_index_value_pairs() {
        let mut table = SlotTable::new();
        table.emplace("x".to_string()).unwrap();
        table.emplace_at(3, "y".to_string()).unwrap();
        let rendered: String = alloc::format!("{table:?}");
        assert_eq!(rendered, r#"{0: "x", 3: "y"}"#);
    }
}
