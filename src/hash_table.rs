//! A bucketed hash table over integer-convertible keys.
//!
//! Every bucket has a fixed number of slots. Keys live in per-bucket key
//! windows (`[length, key, key, ...]`) at the front of a single allocation,
//! and the matching values live in per-bucket value windows after all key
//! windows. When an insert targets a full bucket, the whole table doubles
//! both its bucket count and its bucket capacity and rehashes.

use core::alloc::Layout;
use core::fmt::Debug;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use tracing::debug;

use crate::allocator::Allocator;
use crate::allocator::Global;
use crate::error::Error;
use crate::error::Result;
use crate::key::HashKey;
use crate::raw::RawBlock;
use crate::raw::unwrap_or_abort;

/// Bucket count and per-bucket capacity of a [`HashTable`].
///
/// Both are powers of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Geometry {
    bucket_count: usize,
    bucket_capacity: usize,
}

impl Geometry {
    const UNALLOCATED: Self = Self {
        bucket_count: 0,
        bucket_capacity: 0,
    };

    const INITIAL: Self = Self {
        bucket_count: 2,
        bucket_capacity: 1,
    };

    /// Builds a geometry from an explicit bucket count and capacity, each
    /// rounded up to the next power of two (at least one).
    ///
    /// # Errors
    ///
    /// [`Error::CapacityOverflow`] if rounding overflows.
    pub fn new(bucket_count: usize, bucket_capacity: usize) -> Result<Self> {
        Ok(Self {
            bucket_count: round_up(bucket_count)?,
            bucket_capacity: round_up(bucket_capacity)?,
        })
    }

    /// Builds a geometry from a bucket count alone, with each bucket holding
    /// half as many slots as there are buckets.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::Geometry;
    ///
    /// let geometry = Geometry::from_bucket_count(100).unwrap();
    /// assert_eq!(geometry.bucket_count(), 128);
    /// assert_eq!(geometry.bucket_capacity(), 64);
    ///
    /// // A single bucket would have no slots, so the count is doubled.
    /// let tiny = Geometry::from_bucket_count(1).unwrap();
    /// assert_eq!((tiny.bucket_count(), tiny.bucket_capacity()), (2, 1));
    /// ```
    pub fn from_bucket_count(bucket_count: usize) -> Result<Self> {
        let mut bucket_count = round_up(bucket_count)?;
        while bucket_count / 2 == 0 {
            bucket_count = bucket_count
                .checked_mul(2)
                .ok_or(Error::CapacityOverflow)?;
        }

        Ok(Self {
            bucket_count,
            bucket_capacity: bucket_count / 2,
        })
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Slots per bucket.
    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    /// Geometry taken as-is, for decoding. Both values must already be
    /// powers of two, or both zero for an unallocated table.
    pub(crate) fn exact(bucket_count: usize, bucket_capacity: usize) -> Option<Self> {
        if bucket_count == 0 && bucket_capacity == 0 {
            return Some(Self::UNALLOCATED);
        }

        (bucket_count.is_power_of_two() && bucket_capacity.is_power_of_two()).then_some(Self {
            bucket_count,
            bucket_capacity,
        })
    }

    fn doubled(self) -> Result<Self> {
        if self.bucket_count == 0 {
            return Ok(Self::INITIAL);
        }

        Ok(Self {
            bucket_count: self
                .bucket_count
                .checked_mul(2)
                .ok_or(Error::CapacityOverflow)?,
            bucket_capacity: self
                .bucket_capacity
                .checked_mul(2)
                .ok_or(Error::CapacityOverflow)?,
        })
    }

    #[inline(always)]
    fn mask(&self) -> usize {
        self.bucket_count.wrapping_sub(1)
    }

    /// Length of one key window: the length word plus the key slots.
    #[inline(always)]
    fn window(&self) -> usize {
        self.bucket_capacity + 1
    }
}

fn round_up(n: usize) -> Result<usize> {
    n.max(1)
        .checked_next_power_of_two()
        .ok_or(Error::CapacityOverflow)
}

#[derive(Debug)]
struct DataLayout {
    layout: Layout,
    keys_len: usize,
    values_offset: usize,
}

impl DataLayout {
    fn new<V>(geometry: Geometry) -> Result<Self> {
        let keys_len = geometry
            .bucket_count
            .checked_mul(geometry.window())
            .ok_or(Error::CapacityOverflow)?;
        let slots = geometry
            .bucket_count
            .checked_mul(geometry.bucket_capacity)
            .ok_or(Error::CapacityOverflow)?;

        let keys_layout = Layout::array::<u64>(keys_len).map_err(|_| Error::CapacityOverflow)?;
        let values_layout =
            Layout::array::<MaybeUninit<V>>(slots).map_err(|_| Error::CapacityOverflow)?;
        let (layout, values_offset) = keys_layout
            .extend(values_layout)
            .map_err(|_| Error::CapacityOverflow)?;

        Ok(DataLayout {
            layout,
            keys_len,
            values_offset,
        })
    }
}

/// Bucket fill statistics for a [`HashTable`].
///
/// Available in tests and with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of entries in the table
    pub populated: usize,
    /// Total slots across all buckets
    pub capacity: usize,
    /// Number of buckets
    pub bucket_count: usize,
    /// Slots per bucket
    pub bucket_capacity: usize,
    /// Buckets holding at least one entry
    pub occupied_buckets: usize,
    /// Length of the fullest bucket
    pub longest_bucket: usize,
    /// populated / capacity
    pub load_factor: f64,
    /// Bytes held in the table's allocation
    pub total_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Hash Table Statistics ===");
        println!(
            "Population: {}/{} ({:.2}% load factor)",
            self.populated,
            self.capacity,
            self.load_factor * 100.0
        );
        println!(
            "Buckets: {} x {} slots, {} occupied ({:.2}%)",
            self.bucket_count,
            self.bucket_capacity,
            self.occupied_buckets,
            if self.bucket_count == 0 {
                0.0
            } else {
                self.occupied_buckets as f64 / self.bucket_count as f64 * 100.0
            }
        );
        println!("Longest bucket: {}", self.longest_bucket);
        println!("Total Allocated: {} bytes", self.total_bytes);
    }
}

/// A hash table mapping unique integer-convertible keys to values.
///
/// A key's bucket is `key & (bucket_count - 1)`, and lookup scans that
/// bucket's key window. An insert into a full bucket doubles the whole
/// table first, so a single hot bucket can grow every bucket.
///
/// Memory comes from the allocator `A`, which is consulted only on
/// construction, growth, and drop. Allocation failure is reported as
/// [`Error::AllocFailed`] and leaves the table unchanged.
///
/// ## Example
///
/// ```rust
/// use arena_tables::Error;
/// use arena_tables::HashTable;
///
/// let mut table = HashTable::new();
/// table.emplace(7u64, "seven").unwrap();
/// table.emplace(9, "nine").unwrap();
///
/// assert!(table.find(7));
/// assert_eq!(table.at(9), Ok(&"nine"));
/// assert_eq!(table.emplace(7, "again"), Err(Error::KeyAlreadyExists(7)));
///
/// assert_eq!(table.remove(7), Some("seven"));
/// assert_eq!(table.try_get(7), None);
/// ```
pub struct HashTable<K, V, A: Allocator = Global> {
    block: RawBlock,
    values_offset: usize,
    geometry: Geometry,

    populated: usize,
    alloc: A,

    _phantom: PhantomData<(K, V)>,
}

// SAFETY: The table owns its keys and values; the raw block is not shared.
unsafe impl<K: Send, V: Send, A: Allocator + Send> Send for HashTable<K, V, A> {}
// SAFETY: `&HashTable` only hands out shared references.
unsafe impl<K: Sync, V: Sync, A: Allocator + Sync> Sync for HashTable<K, V, A> {}

impl<K: HashKey + Debug, V: Debug, A: Allocator> Debug for HashTable<K, V, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V: Clone, A: Allocator + Clone> Clone for HashTable<K, V, A> {
    fn clone(&self) -> Self {
        unwrap_or_abort(self.try_clone())
    }
}

impl<K, V, A: Allocator> Drop for HashTable<K, V, A> {
    fn drop(&mut self) {
        if core::mem::needs_drop::<V>() && self.populated > 0 {
            self.clear();
        }

        let block = core::mem::replace(&mut self.block, Self::unallocated_block());
        // SAFETY: The block came from `self.alloc` and no value is live.
        unsafe { block.release(&self.alloc) };
    }
}

impl<K, V> HashTable<K, V> {
    /// Creates an empty table on the global heap. Does not allocate.
    pub fn new() -> Self {
        Self::new_in(Global)
    }

    /// Creates a table with [`Geometry::from_bucket_count`]`(bucket_count)`.
    pub fn with_buckets(bucket_count: usize) -> Result<Self> {
        Self::with_buckets_in(bucket_count, Global)
    }
}

impl<K, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, A: Allocator> HashTable<K, V, A> {
    /// Creates an empty table that will allocate from `alloc`. Does not
    /// allocate; the first insert uses two buckets of one slot each.
    pub fn new_in(alloc: A) -> Self {
        Self {
            block: Self::unallocated_block(),
            values_offset: 0,
            geometry: Geometry::UNALLOCATED,
            populated: 0,
            alloc,
            _phantom: PhantomData,
        }
    }

    /// Creates a table in `alloc` with
    /// [`Geometry::from_bucket_count`]`(bucket_count)`.
    pub fn with_buckets_in(bucket_count: usize, alloc: A) -> Result<Self> {
        Self::with_geometry_in(Geometry::from_bucket_count(bucket_count)?, alloc)
    }

    /// Creates a table in `alloc` with an explicit geometry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::Geometry;
    /// use arena_tables::HashTable;
    /// use arena_tables::allocator::Global;
    ///
    /// let geometry = Geometry::new(16, 8).unwrap();
    /// let table: HashTable<u32, f32> = HashTable::with_geometry_in(geometry, Global).unwrap();
    /// assert_eq!(table.capacity(), 128);
    /// ```
    pub fn with_geometry_in(geometry: Geometry, alloc: A) -> Result<Self> {
        let mut table = Self::new_in(alloc);
        if geometry.bucket_count > 0 {
            table.rehash(geometry)?;
        }
        Ok(table)
    }

    fn unallocated_block() -> RawBlock {
        RawBlock::dangling::<([u64; 0], [V; 0])>()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.populated
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Current geometry. Both fields are zero before the first allocation.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.geometry.bucket_count
    }

    /// Slots per bucket.
    pub fn bucket_capacity(&self) -> usize {
        self.geometry.bucket_capacity
    }

    /// Total slots across all buckets.
    pub fn capacity(&self) -> usize {
        self.geometry.bucket_count * self.geometry.bucket_capacity
    }

    /// Number of entries in `bucket`, or zero if it is out of range.
    pub fn bucket_len(&self, bucket: usize) -> usize {
        if bucket < self.geometry.bucket_count {
            self.len_of(bucket)
        } else {
            0
        }
    }

    /// The allocator backing this table.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    fn keys_ptr(&self) -> NonNull<[u64]> {
        NonNull::slice_from_raw_parts(
            self.block.ptr().cast(),
            self.geometry.bucket_count * self.geometry.window(),
        )
    }

    fn values_ptr(&self) -> NonNull<[MaybeUninit<V>]> {
        // SAFETY: `values_offset` lies within the block (or is zero for the
        // unallocated block).
        unsafe {
            NonNull::slice_from_raw_parts(
                self.block.ptr().add(self.values_offset).cast(),
                self.capacity(),
            )
        }
    }

    #[inline(always)]
    fn key_words(&self) -> &[u64] {
        // SAFETY: The key region is zeroed on allocation, so every word is
        // initialized.
        unsafe { self.keys_ptr().as_ref() }
    }

    #[inline(always)]
    fn key_words_mut(&mut self) -> &mut [u64] {
        // SAFETY: As in `keys`, and `&mut self` guarantees exclusivity.
        unsafe { self.keys_ptr().as_mut() }
    }

    #[inline(always)]
    fn value_slots(&self) -> &[MaybeUninit<V>] {
        // SAFETY: The value region is sized for `capacity()` slots.
        unsafe { self.values_ptr().as_ref() }
    }

    #[inline(always)]
    fn value_slots_mut(&mut self) -> &mut [MaybeUninit<V>] {
        // SAFETY: As in `values`, and `&mut self` guarantees exclusivity.
        unsafe { self.values_ptr().as_mut() }
    }

    #[inline(always)]
    fn window_start(&self, bucket: usize) -> usize {
        bucket * self.geometry.window()
    }

    #[inline(always)]
    fn value_index(&self, bucket: usize, slot: usize) -> usize {
        bucket * self.geometry.bucket_capacity + slot
    }

    #[inline(always)]
    fn len_of(&self, bucket: usize) -> usize {
        self.key_words()[self.window_start(bucket)] as usize
    }

    #[inline(always)]
    fn set_len_of(&mut self, bucket: usize, len: usize) {
        debug_assert!(len <= self.geometry.bucket_capacity);
        let start = self.window_start(bucket);
        self.key_words_mut()[start] = len as u64;
    }

    #[inline(always)]
    pub(crate) fn bucket_for(&self, bits: u64) -> usize {
        bits as usize & self.geometry.mask()
    }

    /// The live keys of `bucket`, in slot order.
    pub(crate) fn bucket_keys(&self, bucket: usize) -> &[u64] {
        let start = self.window_start(bucket) + 1;
        &self.key_words()[start..start + self.len_of(bucket)]
    }

    /// The live values of `bucket`, in slot order.
    pub(crate) fn bucket_values(&self, bucket: usize) -> &[V] {
        let start = self.value_index(bucket, 0);
        let live = &self.value_slots()[start..start + self.len_of(bucket)];
        // SAFETY: Slots below the bucket length are initialized, and
        // `MaybeUninit<V>` has the same layout as `V`.
        unsafe { &*(live as *const [MaybeUninit<V>] as *const [V]) }
    }

    fn position(&self, bits: u64) -> Option<(usize, usize)> {
        if self.populated == 0 {
            return None;
        }

        let bucket = self.bucket_for(bits);
        self.bucket_keys(bucket)
            .iter()
            .position(|&k| k == bits)
            .map(|slot| (bucket, slot))
    }

    pub(crate) fn contains_bits(&self, bits: u64) -> bool {
        self.position(bits).is_some()
    }

    /// Appends an entry to `bucket`.
    ///
    /// # Safety
    ///
    /// `bucket` must be the bucket of `bits`, the bucket must have a free
    /// slot, and `bits` must not already be present.
    pub(crate) unsafe fn push_unchecked(&mut self, bucket: usize, bits: u64, value: V) -> &mut V {
        let len = self.len_of(bucket);
        debug_assert_eq!(bucket, self.bucket_for(bits));
        debug_assert!(len < self.geometry.bucket_capacity);

        let start = self.window_start(bucket) + 1;
        self.key_words_mut()[start + len] = bits;
        self.set_len_of(bucket, len + 1);
        self.populated += 1;

        let index = self.value_index(bucket, len);
        self.value_slots_mut()[index].write(value)
    }

    fn remove_at(&mut self, bucket: usize, slot: usize) -> V {
        let len = self.len_of(bucket);
        debug_assert!(slot < len);

        let start = self.window_start(bucket) + 1;
        let index = self.value_index(bucket, slot);
        // SAFETY: `slot < len`, so the value is initialized. It is moved out
        // and the later values are shifted over it, so each value is owned by
        // exactly one slot afterwards.
        let value = unsafe {
            let values = self.values_ptr().cast::<MaybeUninit<V>>().as_ptr();
            let value = values.add(index).read().assume_init();
            core::ptr::copy(values.add(index + 1), values.add(index), len - slot - 1);
            value
        };
        self.key_words_mut()
            .copy_within(start + slot + 1..start + len, start + slot);

        self.set_len_of(bucket, len - 1);
        self.populated -= 1;
        value
    }

    /// Makes room for `bits`, growing if its bucket is full, and returns the
    /// bucket it will land in.
    fn prepare_slot(&mut self, bits: u64) -> Result<usize> {
        if self.geometry.bucket_count == 0 {
            self.rehash(Geometry::INITIAL)?;
        }

        let bucket = self.bucket_for(bits);
        if self.len_of(bucket) < self.geometry.bucket_capacity {
            return Ok(bucket);
        }

        self.rehash(self.geometry.doubled()?)?;
        let bucket = self.bucket_for(bits);
        debug_assert!(self.len_of(bucket) < self.geometry.bucket_capacity);
        Ok(bucket)
    }

    /// Moves every entry into a fresh allocation with `geometry`.
    ///
    /// Entries of one old bucket land in at most two new buckets, so
    /// `geometry` must have at least the current bucket capacity and a bucket
    /// count that is a multiple of the current one.
    #[cold]
    fn rehash(&mut self, geometry: Geometry) -> Result<()> {
        debug_assert!(geometry.bucket_count >= self.geometry.bucket_count);
        debug_assert!(geometry.bucket_capacity >= self.geometry.bucket_capacity);

        let layout = DataLayout::new::<V>(geometry)?;
        let block = RawBlock::allocate(&self.alloc, layout.layout)?;
        // SAFETY: The block holds at least `keys_len` words at its start.
        unsafe {
            core::ptr::write_bytes(block.ptr().cast::<u64>().as_ptr(), 0, layout.keys_len);
        }

        let old_geometry = self.geometry;
        let old_keys = self.keys_ptr();
        let old_values = self.values_ptr().cast::<MaybeUninit<V>>();
        let old_block = core::mem::replace(&mut self.block, block);
        self.values_offset = layout.values_offset;
        self.geometry = geometry;

        // SAFETY: The old block stays allocated until released below, and no
        // reference into it is live. Each value is moved bitwise exactly once,
        // and the old block is released without dropping anything.
        unsafe {
            let old_keys = old_keys.as_ref();
            let new_values = self.values_ptr().cast::<MaybeUninit<V>>().as_ptr();

            for bucket in 0..old_geometry.bucket_count {
                let start = bucket * old_geometry.window();
                let len = old_keys[start] as usize;
                for slot in 0..len {
                    let bits = old_keys[start + 1 + slot];
                    let target = self.bucket_for(bits);
                    let target_len = self.len_of(target);
                    debug_assert!(target_len < geometry.bucket_capacity);

                    let target_start = self.window_start(target) + 1;
                    self.key_words_mut()[target_start + target_len] = bits;
                    core::ptr::copy_nonoverlapping(
                        old_values
                            .as_ptr()
                            .add(bucket * old_geometry.bucket_capacity + slot),
                        new_values.add(self.value_index(target, target_len)),
                        1,
                    );
                    self.set_len_of(target, target_len + 1);
                }
            }

            old_block.release(&self.alloc);
        }

        debug!(
            from_buckets = old_geometry.bucket_count,
            from_capacity = old_geometry.bucket_capacity,
            to_buckets = geometry.bucket_count,
            to_capacity = geometry.bucket_capacity,
            live = self.populated,
            "hash table rehashed"
        );
        Ok(())
    }

    /// Drops every entry. The geometry and allocation are kept.
    pub fn clear(&mut self) {
        if self.populated == 0 {
            return;
        }

        for bucket in 0..self.geometry.bucket_count {
            let len = self.len_of(bucket);
            if len == 0 {
                continue;
            }

            // Lengths go to zero first so a panicking destructor leaks the
            // rest of the bucket instead of dropping it twice.
            self.set_len_of(bucket, 0);
            self.populated -= len;
            let start = self.value_index(bucket, 0);
            for value in &mut self.value_slots_mut()[start..start + len] {
                // SAFETY: Slots below the old length were initialized.
                unsafe { value.assume_init_drop() };
            }
        }

        debug_assert_eq!(self.populated, 0);
    }

    /// Clones the table into a new allocation from a clone of its allocator,
    /// with the same geometry and the same entry order.
    ///
    /// # Errors
    ///
    /// An allocation error if the new table cannot be allocated.
    pub fn try_clone(&self) -> Result<Self>
    where
        V: Clone,
        A: Clone,
    {
        let mut table = Self::with_geometry_in(self.geometry, self.alloc.clone())?;
        for bucket in 0..self.geometry.bucket_count {
            for (&bits, value) in self.bucket_keys(bucket).iter().zip(self.bucket_values(bucket)) {
                // SAFETY: Same geometry, so the key maps to the same bucket,
                // which has no more entries than the source bucket.
                unsafe { table.push_unchecked(bucket, bits, value.clone()) };
            }
        }

        debug_assert_eq!(table.populated, self.populated);
        Ok(table)
    }

    /// Removes every entry, yielding them as `(key, value)` pairs in bucket
    /// order. The geometry and allocation are kept.
    ///
    /// Dropping the iterator early drops the remaining entries.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::HashTable;
    ///
    /// let mut table = HashTable::new();
    /// for key in 0..10u32 {
    ///     table.emplace(key, key * key).unwrap();
    /// }
    ///
    /// let mut drained: Vec<(u32, u32)> = table.drain().collect();
    /// drained.sort();
    /// assert_eq!(drained[3], (3, 9));
    /// assert!(table.is_empty());
    /// ```
    pub fn drain(&mut self) -> Drain<'_, K, V, A> {
        Drain {
            table: self,
            next_bucket: 0,
            bucket: 0,
            slot: 0,
            len: 0,
        }
    }

    /// Returns bucket statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let mut occupied_buckets = 0;
        let mut longest_bucket = 0;
        for bucket in 0..self.geometry.bucket_count {
            let len = self.len_of(bucket);
            if len > 0 {
                occupied_buckets += 1;
            }
            longest_bucket = longest_bucket.max(len);
        }

        DebugStats {
            populated: self.populated,
            capacity: self.capacity(),
            bucket_count: self.geometry.bucket_count,
            bucket_capacity: self.geometry.bucket_capacity,
            occupied_buckets,
            longest_bucket,
            load_factor: if self.capacity() == 0 {
                0.0
            } else {
                self.populated as f64 / self.capacity() as f64
            },
            total_bytes: self.block.size(),
        }
    }

    /// Counts buckets by fill level: entry `n` is the number of buckets
    /// holding exactly `n` entries. The result has `bucket_capacity + 1`
    /// entries.
    #[cfg(any(test, feature = "stats"))]
    pub fn fill_histogram(&self) -> alloc::vec::Vec<usize> {
        let mut hist = alloc::vec![0usize; self.geometry.bucket_capacity + 1];
        for bucket in 0..self.geometry.bucket_count {
            hist[self.len_of(bucket)] += 1;
        }
        hist
    }
}

impl<K: HashKey, V, A: Allocator> HashTable<K, V, A> {
    /// Inserts `key` with `value` and returns a reference to the stored
    /// value.
    ///
    /// Grows the table first if the key's bucket is full.
    ///
    /// # Errors
    ///
    /// [`Error::KeyAlreadyExists`] if the key is present (the stored value is
    /// untouched), or an allocation error if growth fails.
    pub fn emplace(&mut self, key: K, value: V) -> Result<&mut V> {
        match self.entry(key)? {
            Entry::Occupied(_) => Err(Error::KeyAlreadyExists(key.to_bits())),
            Entry::Vacant(entry) => Ok(entry.insert(value)),
        }
    }

    /// Inserts `key` with `value` unless the key is present.
    ///
    /// Returns the stored value and `true` if the insert happened, or the
    /// existing value and `false` otherwise (`value` is dropped).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::HashTable;
    ///
    /// let mut table = HashTable::new();
    /// assert_eq!(table.try_emplace(1u8, 'a').unwrap(), (&mut 'a', true));
    /// assert_eq!(table.try_emplace(1u8, 'b').unwrap(), (&mut 'a', false));
    /// ```
    pub fn try_emplace(&mut self, key: K, value: V) -> Result<(&mut V, bool)> {
        Ok(match self.entry(key)? {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(value), true),
        })
    }

    /// Gets the entry for `key`.
    ///
    /// If the key is absent and its bucket is full, the table grows before
    /// the [`VacantEntry`] is returned, so inserting through it cannot fail.
    ///
    /// # Errors
    ///
    /// An allocation error if growth fails.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::HashTable;
    ///
    /// let mut counts: HashTable<u64, usize> = HashTable::new();
    /// for word in [3, 1, 3, 3, 2] {
    ///     *counts.entry(word).unwrap().or_default() += 1;
    /// }
    /// assert_eq!(counts.at(3), Ok(&3));
    /// ```
    pub fn entry(&mut self, key: K) -> Result<Entry<'_, K, V, A>> {
        let bits = key.to_bits();
        if let Some((bucket, slot)) = self.position(bits) {
            return Ok(Entry::Occupied(OccupiedEntry {
                table: self,
                key,
                bucket,
                slot,
            }));
        }

        let bucket = self.prepare_slot(bits)?;
        Ok(Entry::Vacant(VacantEntry {
            table: self,
            key,
            bucket,
        }))
    }

    /// Returns `true` if `key` is present.
    pub fn find(&self, key: K) -> bool {
        self.contains_bits(key.to_bits())
    }

    /// Returns a reference to the value for `key`, if present.
    pub fn try_get(&self, key: K) -> Option<&V> {
        let (bucket, slot) = self.position(key.to_bits())?;
        let index = self.value_index(bucket, slot);
        // SAFETY: `slot` is below the bucket length.
        Some(unsafe { self.value_slots()[index].assume_init_ref() })
    }

    /// Returns a mutable reference to the value for `key`, if present.
    pub fn try_get_mut(&mut self, key: K) -> Option<&mut V> {
        let (bucket, slot) = self.position(key.to_bits())?;
        let index = self.value_index(bucket, slot);
        // SAFETY: `slot` is below the bucket length.
        Some(unsafe { self.value_slots_mut()[index].assume_init_mut() })
    }

    /// Returns a reference to the value for `key`.
    ///
    /// The reference is invalidated by the next mutation, since growth may
    /// move every value. Holding it across an insert does not compile:
    ///
    /// ```compile_fail,E0502
    /// use arena_tables::HashTable;
    ///
    /// let mut table = HashTable::new();
    /// table.emplace(1u64, 10u32).unwrap();
    /// let value = table.at(1).unwrap();
    /// table.emplace(2, 20).unwrap();
    /// assert_eq!(*value, 10);
    /// ```
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] if the key is absent.
    pub fn at(&self, key: K) -> Result<&V> {
        self.try_get(key).ok_or(Error::KeyNotFound(key.to_bits()))
    }

    /// Returns a mutable reference to the value for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] if the key is absent.
    pub fn at_mut(&mut self, key: K) -> Result<&mut V> {
        self.try_get_mut(key)
            .ok_or(Error::KeyNotFound(key.to_bits()))
    }

    /// Removes `key` and returns its value, if present.
    ///
    /// Later entries of the same bucket shift down one slot.
    pub fn remove(&mut self, key: K) -> Option<V> {
        let (bucket, slot) = self.position(key.to_bits())?;
        Some(self.remove_at(bucket, slot))
    }

    /// Returns an iterator over `(key, &value)` in bucket order.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            keys: self.key_words(),
            values: self.value_slots(),
            bucket_capacity: self.geometry.bucket_capacity,
            bucket: 0,
            slot: 0,
            remaining: self.populated,
            _phantom: PhantomData,
        }
    }

    /// Returns an iterator over `(key, &mut value)` in bucket order.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            // SAFETY: Keys are only read while the iterator lives, and the
            // value region is disjoint from the key region.
            keys: unsafe { self.keys_ptr().as_ref() },
            values: self.values_ptr().cast(),
            bucket_capacity: self.geometry.bucket_capacity,
            bucket: 0,
            slot: 0,
            remaining: self.populated,
            _phantom: PhantomData,
        }
    }

    /// Returns an iterator over the keys in bucket order.
    pub fn keys(&self) -> impl ExactSizeIterator<Item = K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over the values in bucket order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = &V> + '_ {
        self.iter().map(|(_, value)| value)
    }
}

impl<'a, K: HashKey, V, A: Allocator> IntoIterator for &'a HashTable<K, V, A> {
    type Item = (K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A view into a single entry of a [`HashTable`].
///
/// Created by [`HashTable::entry`].
pub enum Entry<'a, K, V, A: Allocator = Global> {
    /// The key is absent.
    Vacant(VacantEntry<'a, K, V, A>),
    /// The key is present.
    Occupied(OccupiedEntry<'a, K, V, A>),
}

impl<'a, K: HashKey, V, A: Allocator> Entry<'a, K, V, A> {
    /// The key this entry was created for.
    pub fn key(&self) -> K {
        match self {
            Entry::Vacant(entry) => entry.key,
            Entry::Occupied(entry) => entry.key,
        }
    }

    /// Inserts `default` if vacant and returns the stored value.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts the result of `default` if vacant and returns the stored
    /// value. `default` is not called when occupied.
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Applies `f` to the value if occupied and returns it; returns `None`
    /// without inserting if vacant.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Option<&'a mut V> {
        match self {
            Entry::Occupied(entry) => {
                let value = entry.into_mut();
                f(&mut *value);
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Inserts `V::default()` if vacant and returns the stored value.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(Default::default)
    }
}

/// A vacant entry of a [`HashTable`]. Its bucket is guaranteed to have a
/// free slot.
pub struct VacantEntry<'a, K, V, A: Allocator = Global> {
    table: &'a mut HashTable<K, V, A>,
    key: K,
    bucket: usize,
}

impl<'a, K: HashKey, V, A: Allocator> VacantEntry<'a, K, V, A> {
    /// The key that would be inserted.
    pub fn key(&self) -> K {
        self.key
    }

    /// Inserts `value` and returns a reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        // SAFETY: `entry` checked the key is absent and made room in its
        // bucket, and the exclusive borrow prevented any change since.
        unsafe {
            self.table
                .push_unchecked(self.bucket, self.key.to_bits(), value)
        }
    }
}

/// An occupied entry of a [`HashTable`].
pub struct OccupiedEntry<'a, K, V, A: Allocator = Global> {
    table: &'a mut HashTable<K, V, A>,
    key: K,
    bucket: usize,
    slot: usize,
}

impl<'a, K: HashKey, V, A: Allocator> OccupiedEntry<'a, K, V, A> {
    /// The key of this entry.
    pub fn key(&self) -> K {
        self.key
    }

    /// Returns a reference to the value.
    pub fn get(&self) -> &V {
        let index = self.table.value_index(self.bucket, self.slot);
        // SAFETY: The entry points at a live slot.
        unsafe { self.table.value_slots()[index].assume_init_ref() }
    }

    /// Returns a mutable reference to the value.
    pub fn get_mut(&mut self) -> &mut V {
        let index = self.table.value_index(self.bucket, self.slot);
        // SAFETY: The entry points at a live slot.
        unsafe { self.table.value_slots_mut()[index].assume_init_mut() }
    }

    /// Converts the entry into a mutable reference with the table's
    /// lifetime.
    pub fn into_mut(self) -> &'a mut V {
        let index = self.table.value_index(self.bucket, self.slot);
        // SAFETY: The entry points at a live slot.
        unsafe { self.table.value_slots_mut()[index].assume_init_mut() }
    }

    /// Removes the entry and returns its value.
    pub fn remove(self) -> V {
        self.table.remove_at(self.bucket, self.slot)
    }
}

/// An iterator over the entries of a [`HashTable`].
///
/// Created by [`HashTable::iter`].
pub struct Iter<'a, K, V> {
    keys: &'a [u64],
    values: &'a [MaybeUninit<V>],
    bucket_capacity: usize,
    bucket: usize,
    slot: usize,
    remaining: usize,
    _phantom: PhantomData<K>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys,
            values: self.values,
            bucket_capacity: self.bucket_capacity,
            bucket: self.bucket,
            slot: self.slot,
            remaining: self.remaining,
            _phantom: PhantomData,
        }
    }
}

impl<'a, K: HashKey, V> Iterator for Iter<'a, K, V> {
    type Item = (K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let values = self.values;
        while self.remaining > 0 {
            let start = self.bucket * (self.bucket_capacity + 1);
            let len = *self.keys.get(start)? as usize;
            if self.slot < len {
                let bits = self.keys[start + 1 + self.slot];
                let value = &values[self.bucket * self.bucket_capacity + self.slot];
                self.slot += 1;
                self.remaining -= 1;
                // SAFETY: Slots below the bucket length are initialized.
                return Some((K::from_bits(bits), unsafe { value.assume_init_ref() }));
            }

            self.bucket += 1;
            self.slot = 0;
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: HashKey, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K: HashKey, V> FusedIterator for Iter<'_, K, V> {}

/// A mutable iterator over the entries of a [`HashTable`].
///
/// Created by [`HashTable::iter_mut`].
pub struct IterMut<'a, K, V> {
    keys: &'a [u64],
    values: NonNull<MaybeUninit<V>>,
    bucket_capacity: usize,
    bucket: usize,
    slot: usize,
    remaining: usize,
    _phantom: PhantomData<(K, &'a mut V)>,
}

impl<'a, K: HashKey, V> Iterator for IterMut<'a, K, V> {
    type Item = (K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        while self.remaining > 0 {
            let start = self.bucket * (self.bucket_capacity + 1);
            let len = *self.keys.get(start)? as usize;
            if self.slot < len {
                let bits = self.keys[start + 1 + self.slot];
                let index = self.bucket * self.bucket_capacity + self.slot;
                self.slot += 1;
                self.remaining -= 1;
                // SAFETY: The slot is initialized, and each slot is visited at
                // most once, so no two returned references alias.
                let value = unsafe { (*self.values.as_ptr().add(index)).assume_init_mut() };
                return Some((K::from_bits(bits), value));
            }

            self.bucket += 1;
            self.slot = 0;
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: HashKey, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K: HashKey, V> FusedIterator for IterMut<'_, K, V> {}

/// A draining iterator over the entries of a [`HashTable`].
///
/// Created by [`HashTable::drain`].
pub struct Drain<'a, K, V, A: Allocator = Global> {
    table: &'a mut HashTable<K, V, A>,
    next_bucket: usize,
    bucket: usize,
    slot: usize,
    len: usize,
}

impl<K, V, A: Allocator> Drain<'_, K, V, A> {
    fn next_raw(&mut self) -> Option<(u64, V)> {
        loop {
            if self.slot < self.len {
                let bits = self.table.bucket_keys_raw(self.bucket)[self.slot];
                let index = self.table.value_index(self.bucket, self.slot);
                self.slot += 1;
                // SAFETY: The slot was below the bucket length when the
                // bucket was entered. That length was zeroed on entry, so the
                // table no longer owns the value and it is read exactly once.
                let value = unsafe { self.table.value_slots()[index].assume_init_read() };
                return Some((bits, value));
            }

            if self.table.populated == 0 || self.next_bucket >= self.table.geometry.bucket_count {
                return None;
            }

            self.bucket = self.next_bucket;
            self.next_bucket += 1;
            self.slot = 0;
            self.len = self.table.len_of(self.bucket);
            self.table.set_len_of(self.bucket, 0);
            self.table.populated -= self.len;
        }
    }
}

impl<K, V, A: Allocator> Drop for Drain<'_, K, V, A> {
    fn drop(&mut self) {
        while self.next_raw().is_some() {}
    }
}

impl<K: HashKey, V, A: Allocator> Iterator for Drain<'_, K, V, A> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_raw()
            .map(|(bits, value)| (K::from_bits(bits), value))
    }
}

impl<K, V, A: Allocator> HashTable<K, V, A> {
    /// Key slots of `bucket` regardless of its recorded length.
    fn bucket_keys_raw(&self, bucket: usize) -> &[u64] {
        let start = self.window_start(bucket) + 1;
        &self.key_words()[start..start + self.geometry.bucket_capacity]
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec::Vec;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;

    use super::*;
    use crate::allocator::AllocStats;
    use crate::allocator::StaticBuffer;
    use crate::allocator::Tracking;

    fn scrambled(n: u64) -> Vec<u64> {
        let mut keys: Vec<u64> = (0..n)
            .map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .collect();
        keys.shuffle(&mut SmallRng::seed_from_u64(0x5EED));
        keys
    }

    #[test]
    fn geometry_rounding() {
        assert_eq!(Geometry::from_bucket_count(2).unwrap(), Geometry::INITIAL);
        assert_eq!(Geometry::from_bucket_count(0).unwrap(), Geometry::INITIAL);
        assert_eq!(
            Geometry::new(5, 3).unwrap(),
            Geometry {
                bucket_count: 8,
                bucket_capacity: 4
            }
        );
        assert_eq!(
            Geometry::new(usize::MAX, 1),
            Err(Error::CapacityOverflow)
        );
        assert_eq!(
            Geometry::INITIAL.doubled().unwrap(),
            Geometry {
                bucket_count: 4,
                bucket_capacity: 2
            }
        );
        assert_eq!(Geometry::exact(4, 3), None);
        assert_eq!(Geometry::exact(0, 0), Some(Geometry::UNALLOCATED));
    }

    #[test]
    fn new_table_does_not_allocate() {
        let stats = AllocStats::new();
        let table: HashTable<u64, u64, _> = HashTable::new_in(Tracking::new(Global, &stats));
        assert_eq!(table.bucket_count(), 0);
        assert_eq!(table.capacity(), 0);
        assert!(!table.find(0));
        assert_eq!(table.iter().count(), 0);
        drop(table);
        assert_eq!(stats.allocations(), 0);
    }

    #[test]
    fn insert_and_remove_across_growth() {
        let mut table: HashTable<u64, u64> = HashTable::with_buckets(2).unwrap();
        table.emplace(2, 1).unwrap();
        table.emplace(3, 2).unwrap();
        table.emplace(0, 3).unwrap();
        table.emplace(1, 4).unwrap();

        assert_eq!(table.remove(0), Some(3));
        assert_eq!(table.try_get(0), None);
        assert_eq!(table.try_get(1), Some(&4));
        assert_eq!(table.try_get(3), Some(&2));
        assert_eq!(table.try_get(2), Some(&1));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn insert_many_from_two_buckets() {
        let mut table = HashTable::with_buckets(2).unwrap();
        for i in 0..=8192u64 {
            table.emplace(i, i * 3).unwrap();
        }

        assert_eq!(table.len(), 8193);
        for i in 0..8193u64 {
            assert!(table.find(i), "missing {i}");
            assert_eq!(table.at(i), Ok(&(i * 3)));
        }
        assert!(!table.find(8193));
        assert!(table.bucket_count().is_power_of_two());
        assert!(table.bucket_capacity().is_power_of_two());
    }

    #[test]
    fn iteration_visits_each_entry_once() {
        let probe: HashTable<u64, u64> = HashTable::with_buckets(8).unwrap();
        let cap = probe.bucket_capacity();

        for n in [1, cap, cap + 1, 8193] {
            let mut table = HashTable::with_buckets(8).unwrap();
            for i in 0..n as u64 {
                table.emplace(i, i + 1000).unwrap();
            }

            let mut keys: Vec<u64> = Vec::new();
            for (key, value) in &table {
                assert_eq!(*value, key + 1000);
                keys.push(key);
            }
            assert_eq!(keys.len(), n);
            keys.sort();
            assert_eq!(keys, (0..n as u64).collect::<Vec<_>>());
            assert_eq!(table.values().count(), n);
        }
    }

    #[test]
    fn growth_preserves_entries() {
        let keys = scrambled(4000);
        let (present, absent) = keys.split_at(3000);

        let mut table = HashTable::new();
        let (before, after) = present.split_at(1000);
        for &key in before {
            table.emplace(key, key ^ 0xFF).unwrap();
        }
        let geometry = table.geometry();

        for &key in after {
            table.emplace(key, key ^ 0xFF).unwrap();
        }
        assert_ne!(table.geometry(), geometry);

        for &key in present {
            assert_eq!(table.try_get(key), Some(&(key ^ 0xFF)));
        }
        for &key in absent {
            assert!(!table.find(key));
        }
    }

    #[test]
    fn remove_shifts_bucket() {
        let mut table = HashTable::with_geometry_in(Geometry::new(1, 8).unwrap(), Global).unwrap();
        for key in [10u32, 20, 30, 40] {
            table.emplace(key, key.to_string()).unwrap();
        }

        assert_eq!(table.remove(20).as_deref(), Some("20"));
        assert_eq!(table.bucket_len(0), 3);
        assert_eq!(table.keys().collect::<Vec<_>>(), [10, 30, 40]);
        assert_eq!(table.at(40).map(String::as_str), Ok("40"));
        assert_eq!(table.remove(20), None);
        assert_eq!(table.bucket_len(7), 0);
    }

    #[test]
    fn remove_then_emplace_again() {
        let mut table = HashTable::new();
        table.emplace(5i64, 'a').unwrap();
        assert_eq!(table.remove(5), Some('a'));
        assert_eq!(table.at(5), Err(Error::KeyNotFound(5)));
        table.emplace(5, 'b').unwrap();
        assert_eq!(table.at(5), Ok(&'b'));
    }

    #[test]
    fn duplicate_emplace_is_rejected() {
        let mut table = HashTable::new();
        table.emplace(1u16, 10).unwrap();
        assert_eq!(table.emplace(1, 20), Err(Error::KeyAlreadyExists(1)));
        assert_eq!(table.at(1), Ok(&10));
        assert_eq!(table.len(), 1);

        let (value, inserted) = table.try_emplace(1, 30).unwrap();
        assert!(!inserted);
        *value += 1;
        assert_eq!(table.at(1), Ok(&11));
    }

    #[test]
    fn signed_keys_round_trip() {
        let mut table = HashTable::new();
        for key in [-3i32, -1, 0, 1, i32::MIN, i32::MAX] {
            table.emplace(key, key.unsigned_abs()).unwrap();
        }
        let mut keys: Vec<i32> = table.keys().collect();
        keys.sort();
        assert_eq!(keys, [i32::MIN, -3, -1, 0, 1, i32::MAX]);
        assert_eq!(table.at(-3), Ok(&3));
    }

    #[test]
    fn entry_api() {
        let mut table: HashTable<u64, Vec<u32>> = HashTable::new();

        table.entry(1).unwrap().or_default().push(1);
        table.entry(1).unwrap().or_default().push(2);
        assert_eq!(table.at(1).unwrap(), &[1, 2]);

        assert!(
            table
                .entry(2)
                .unwrap()
                .and_modify(|v| v.push(9))
                .is_none()
        );
        assert!(!table.find(2));

        let value = table
            .entry(3)
            .unwrap()
            .or_insert_with(|| alloc::vec![7]);
        value.push(8);

        match table.entry(3).unwrap() {
            Entry::Occupied(mut entry) => {
                assert_eq!(entry.key(), 3);
                entry.get_mut().push(9);
                assert_eq!(entry.get(), &[7, 8, 9]);
                assert_eq!(entry.remove(), [7, 8, 9]);
            }
            Entry::Vacant(_) => panic!("key 3 should be present"),
        }
        assert!(!table.find(3));

        match table.entry(4).unwrap() {
            Entry::Vacant(entry) => {
                assert_eq!(entry.key(), 4);
                entry.insert(alloc::vec![4]);
            }
            Entry::Occupied(_) => panic!("key 4 should be absent"),
        }
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn iter_mut_updates_values() {
        let mut table = HashTable::new();
        for key in 0..100u8 {
            table.emplace(key, key as u32).unwrap();
        }
        for (key, value) in table.iter_mut() {
            *value += key as u32;
        }
        for key in 0..100u8 {
            assert_eq!(table.at(key), Ok(&(2 * key as u32)));
        }
    }

    #[test]
    fn drain_empties_table() {
        let mut table = HashTable::new();
        for key in 0..64u32 {
            table.emplace(key, key.to_string()).unwrap();
        }
        let geometry = table.geometry();

        let mut drained: Vec<(u32, String)> = table.drain().collect();
        drained.sort();
        assert_eq!(drained.len(), 64);
        assert_eq!(drained[17], (17, "17".to_string()));
        assert!(table.is_empty());
        assert_eq!(table.geometry(), geometry);
        assert!((0..table.bucket_count()).all(|b| table.bucket_len(b) == 0));

        for key in 0..10u32 {
            table.emplace(key, key.to_string()).unwrap();
        }
        let partial: Vec<_> = table.drain().take(3).collect();
        assert_eq!(partial.len(), 3);
        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn values_are_dropped_once() {
        let marker = Rc::new(());
        {
            let mut table = HashTable::new();
            for key in 0..500u64 {
                table.emplace(key, Rc::clone(&marker)).unwrap();
            }
            assert_eq!(Rc::strong_count(&marker), 501);

            drop(table.remove(7));
            assert_eq!(Rc::strong_count(&marker), 500);

            let cloned = table.clone();
            assert_eq!(Rc::strong_count(&marker), 999);
            drop(cloned);

            table.clear();
            assert_eq!(Rc::strong_count(&marker), 1);

            table.emplace(1, Rc::clone(&marker)).unwrap();
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn clone_matches_source() {
        let mut table = HashTable::new();
        for key in scrambled(300) {
            table.emplace(key, key.to_string()).unwrap();
        }
        let cloned = table.clone();
        assert_eq!(cloned.geometry(), table.geometry());
        assert!(table.iter().eq(cloned.iter()));

        let empty: HashTable<u8, u8> = HashTable::new();
        assert_eq!(empty.clone().bucket_count(), 0);
    }

    #[test]
    fn allocations_are_released() {
        let stats = AllocStats::new();
        {
            let mut table = HashTable::new_in(Tracking::new(Global, &stats));
            for key in 0..2000u32 {
                table.emplace(key, key.to_string()).unwrap();
            }
            let _cloned = table.clone();
            assert_eq!(stats.live_blocks(), 2);
        }
        assert!(stats.allocations() > 2);
        assert_eq!(stats.live_blocks(), 0);
        assert_eq!(stats.live_bytes(), 0);
    }

    #[test]
    fn exhausted_allocator_leaves_table_intact() {
        let buffer: StaticBuffer<1024> = StaticBuffer::new();
        let mut table = HashTable::new_in(buffer.handle());

        let mut inserted = 0u32;
        let err = loop {
            match table.emplace(inserted, inserted * 2) {
                Ok(_) => inserted += 1,
                Err(err) => break err,
            }
        };

        assert!(matches!(err, Error::AllocFailed { .. }));
        assert!(inserted > 0);
        assert_eq!(table.len(), inserted as usize);
        assert!(!table.find(inserted));
        for key in 0..inserted {
            assert_eq!(table.at(key), Ok(&(key * 2)));
        }
    }

    #[test]
    fn zero_sized_values() {
        let mut table = HashTable::new();
        for key in 0..100u64 {
            table.emplace(key, ()).unwrap();
        }
        assert_eq!(table.remove(50), Some(()));
        assert_eq!(table.len(), 99);
        assert_eq!(table.iter().count(), 99);
    }

    #[test]
    fn stats_report_fill() {
        let mut table = HashTable::with_geometry_in(Geometry::new(4, 4).unwrap(), Global).unwrap();
        for key in [0u64, 4, 8, 1] {
            table.emplace(key, key).unwrap();
        }

        let stats = table.debug_stats();
        assert_eq!(stats.populated, 4);
        assert_eq!(stats.capacity, 16);
        assert_eq!(stats.occupied_buckets, 2);
        assert_eq!(stats.longest_bucket, 3);
        assert!((stats.load_factor - 0.25).abs() < f64::EPSILON);
        assert!(stats.total_bytes >= 4 * 5 * 8 + 16 * 8);

        assert_eq!(table.fill_histogram(), [2, 1, 0, 1, 0]);
    }

    #[test]
    fn debug_lists_entries() {
        let mut table = HashTable::new();
        table.emplace(1u8, "one").unwrap();
        assert_eq!(alloc::format!("{table:?}"), r#"{1: "one"}"#);
    }
}
