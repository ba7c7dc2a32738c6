#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod allocator;

mod bitset;

/// Crate error type.
pub mod error;

pub mod hash_table;

pub mod key;

mod raw;

pub mod slot_table;

mod snapshot;

pub use error::Error;
pub use error::Result;
pub use hash_table::Entry;
pub use hash_table::Geometry;
pub use hash_table::HashTable;
pub use key::HashKey;
pub use slot_table::SlotTable;
