//! Keys accepted by [`HashTable`](crate::HashTable).
//!
//! The table stores every key as a `u64` and picks its bucket from the low
//! bits, so keys must convert losslessly to and from `u64`. Callers that want
//! to key on other data (strings, structs) reduce it to an integer first,
//! e.g. with [`hash_key`].

/// An integer-convertible key.
///
/// `from_bits(k.to_bits())` must return `k`, and distinct keys must have
/// distinct bits.
pub trait HashKey: Copy {
    /// The key as stored in the table.
    fn to_bits(self) -> u64;

    /// Recovers a key from its stored bits.
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_hash_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl HashKey for $ty {
                #[inline(always)]
                fn to_bits(self) -> u64 {
                    self as u64
                }

                #[inline(always)]
                fn from_bits(bits: u64) -> Self {
                    bits as $ty
                }
            }
        )*
    };
}

impl_hash_key!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

#[cfg(feature = "foldhash")]
const SEED: u64 = 0x243F_6A88_85A3_08D3;

/// Reduces arbitrary hashable data to a table key.
///
/// The digest uses a fixed seed, so equal inputs give equal keys across runs
/// of the same build. Distinct inputs may collide; callers that cannot
/// tolerate that must keep the original data next to the value and compare.
///
/// # Examples
///
/// ```rust
/// use arena_tables::HashTable;
/// use arena_tables::key::hash_key;
///
/// let mut uniforms = HashTable::new();
/// uniforms.emplace(hash_key("u_color"), 3u32).unwrap();
/// assert_eq!(uniforms.at(hash_key("u_color")), Ok(&3));
/// ```
#[cfg(feature = "foldhash")]
pub fn hash_key<T: core::hash::Hash + ?Sized>(value: &T) -> u64 {
    use core::hash::BuildHasher;

    foldhash::fast::FixedState::with_seed(SEED).hash_one(value)
}
