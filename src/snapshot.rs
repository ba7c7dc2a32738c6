//! Byte snapshots of a [`HashTable`].
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! [bucket_count: u32][bucket_capacity: u32]
//! per bucket: [length: u64][key: u64; length][value: V; length]
//! ```
//!
//! Values are written as their in-memory bytes, so a snapshot is only
//! meaningful to a build with the same `V` layout. It is a cache format, not
//! a portable wire format.

use alloc::vec::Vec;

use bytemuck::Pod;

use crate::allocator::Allocator;
use crate::allocator::Global;
use crate::error::Error;
use crate::error::Result;
use crate::hash_table::Geometry;
use crate::hash_table::HashTable;
use crate::key::HashKey;

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(Error::Truncated);
        }

        let bytes = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut word = [0u8; 4];
        word.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(word))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut word = [0u8; 8];
        word.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(word))
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

impl<K: HashKey, V: Pod, A: Allocator> HashTable<K, V, A> {
    /// Largest `bucket_count * bucket_capacity` that
    /// [`restore_in`](Self::restore_in) accepts. The header alone decides the
    /// allocation size, so larger geometries are rejected before allocating.
    pub const MAX_RESTORE_SLOTS: usize = 1 << 28;

    /// Appends a snapshot of the table to `out`.
    ///
    /// # Errors
    ///
    /// [`Error::CapacityOverflow`] if the geometry does not fit the `u32`
    /// header fields. Nothing is written in that case.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use arena_tables::HashTable;
    ///
    /// let mut table = HashTable::new();
    /// table.emplace(1u64, 0.5f32).unwrap();
    ///
    /// let mut bytes = Vec::new();
    /// table.append_to(&mut bytes).unwrap();
    ///
    /// let (restored, used) = HashTable::<u64, f32>::restore(&bytes).unwrap();
    /// assert_eq!(used, bytes.len());
    /// assert_eq!(restored.at(1), Ok(&0.5));
    /// ```
    pub fn append_to(&self, out: &mut Vec<u8>) -> Result<()> {
        let geometry = self.geometry();
        let bucket_count =
            u32::try_from(geometry.bucket_count()).map_err(|_| Error::CapacityOverflow)?;
        let bucket_capacity =
            u32::try_from(geometry.bucket_capacity()).map_err(|_| Error::CapacityOverflow)?;

        out.reserve(
            8 + geometry.bucket_count() * 8
                + self.len() * (8 + core::mem::size_of::<V>()),
        );
        out.extend_from_slice(&bucket_count.to_le_bytes());
        out.extend_from_slice(&bucket_capacity.to_le_bytes());

        for bucket in 0..geometry.bucket_count() {
            let keys = self.bucket_keys(bucket);
            out.extend_from_slice(&(keys.len() as u64).to_le_bytes());
            for key in keys {
                out.extend_from_slice(&key.to_le_bytes());
            }
            for value in self.bucket_values(bucket) {
                out.extend_from_slice(bytemuck::bytes_of(value));
            }
        }

        Ok(())
    }

    /// Restores a table from the start of `bytes` into `alloc`.
    ///
    /// Returns the table and the number of bytes consumed; anything after
    /// that is left for the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::Truncated`] if `bytes` ends early.
    /// - [`Error::InvalidSnapshot`] if the geometry is not a power of two or
    ///   has more than [`MAX_RESTORE_SLOTS`](Self::MAX_RESTORE_SLOTS) slots, a
    ///   bucket is over capacity, a key does not fit `K`, a key sits in the
    ///   wrong bucket, or a key repeats.
    /// - An allocation error if the table cannot be allocated.
    pub fn restore_in(bytes: &[u8], alloc: A) -> Result<(Self, usize)> {
        let mut reader = Reader { bytes, offset: 0 };
        let bucket_count = reader.u32()? as usize;
        let bucket_capacity = reader.u32()? as usize;
        let geometry = Geometry::exact(bucket_count, bucket_capacity)
            .ok_or(Error::InvalidSnapshot("geometry is not a power of two"))?;
        if bucket_count.saturating_mul(bucket_capacity) > Self::MAX_RESTORE_SLOTS {
            return Err(Error::InvalidSnapshot("geometry exceeds restore limit"));
        }

        // Every bucket needs at least its length word; reject short input
        // before allocating for it.
        if reader.remaining() / 8 < bucket_count {
            return Err(Error::Truncated);
        }

        let value_size = core::mem::size_of::<V>();
        let mut table = Self::with_geometry_in(geometry, alloc)?;
        for bucket in 0..bucket_count {
            let len = reader.u64()?;
            if len > bucket_capacity as u64 {
                return Err(Error::InvalidSnapshot("bucket length exceeds capacity"));
            }

            let len = len as usize;
            let keys = reader.take(len.checked_mul(8).ok_or(Error::Truncated)?)?;
            let values = reader.take(len.checked_mul(value_size).ok_or(Error::Truncated)?)?;
            for slot in 0..len {
                let bits = read_u64(&keys[slot * 8..]);
                if K::from_bits(bits).to_bits() != bits {
                    return Err(Error::InvalidSnapshot("key out of range for key type"));
                }
                if table.bucket_for(bits) != bucket {
                    return Err(Error::InvalidSnapshot("key stored in the wrong bucket"));
                }
                if table.contains_bits(bits) {
                    return Err(Error::InvalidSnapshot("duplicate key"));
                }

                let value: V = bytemuck::pod_read_unaligned(
                    &values[slot * value_size..(slot + 1) * value_size],
                );
                // SAFETY: The key maps to `bucket`, is not yet present, and
                // the bucket holds fewer than `len <= bucket_capacity`
                // entries so far.
                unsafe { table.push_unchecked(bucket, bits, value) };
            }
        }

        Ok((table, reader.offset))
    }
}

impl<K: HashKey, V: Pod> HashTable<K, V> {
    /// Restores a table from the start of `bytes` onto the global heap.
    ///
    /// See [`restore_in`](Self::restore_in).
    pub fn restore(bytes: &[u8]) -> Result<(Self, usize)> {
        Self::restore_in(bytes, Global)
    }
}
