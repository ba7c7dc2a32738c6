//! Occupancy bitset helpers.
//!
//! One bit per slot, packed into machine-word cells. Bit `i` lives in word
//! `i / WORD_BITS` at position `i % WORD_BITS`.

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        pub(crate) type Word = u64;
    } else if #[cfg(target_pointer_width = "32")] {
        pub(crate) type Word = u32;
    } else {
        pub(crate) type Word = u16;
    }
}

pub(crate) const WORD_BITS: usize = Word::BITS as usize;

#[inline(always)]
fn split(index: usize) -> (usize, Word) {
    (index / WORD_BITS, 1 << (index % WORD_BITS))
}

#[inline(always)]
pub(crate) fn test(words: &[Word], index: usize) -> bool {
    let (word, mask) = split(index);
    words.get(word).is_some_and(|w| w & mask != 0)
}

#[inline(always)]
pub(crate) fn set(words: &mut [Word], index: usize) {
    let (word, mask) = split(index);
    debug_assert!(words[word] & mask == 0);
    words[word] |= mask;
}

#[inline(always)]
pub(crate) fn clear(words: &mut [Word], index: usize) {
    let (word, mask) = split(index);
    debug_assert!(words[word] & mask != 0);
    words[word] &= !mask;
}

/// Lowest clear bit, if any word has one.
pub(crate) fn first_clear(words: &[Word]) -> Option<usize> {
    words
        .iter()
        .position(|&w| w != Word::MAX)
        .map(|word| word * WORD_BITS + (!words[word]).trailing_zeros() as usize)
}

/// Lowest set bit in `[from, end)`.
///
/// `end` must not exceed `words.len() * WORD_BITS`.
pub(crate) fn next_set(words: &[Word], from: usize, end: usize) -> Option<usize> {
    if from >= end {
        return None;
    }

    let mut word_index = from / WORD_BITS;
    let mut word = words[word_index] & (Word::MAX << (from % WORD_BITS));
    loop {
        if word != 0 {
            let index = word_index * WORD_BITS + word.trailing_zeros() as usize;
            return (index < end).then_some(index);
        }

        word_index += 1;
        if word_index * WORD_BITS >= end {
            return None;
        }
        word = words[word_index];
    }
}

/// Highest set bit in `[start, end)`.
///
/// `end` must not exceed `words.len() * WORD_BITS`.
pub(crate) fn prev_set(words: &[Word], start: usize, end: usize) -> Option<usize> {
    if start >= end {
        return None;
    }

    let last = end - 1;
    let mut word_index = last / WORD_BITS;
    let mut word = words[word_index] & (Word::MAX >> (WORD_BITS - 1 - last % WORD_BITS));
    loop {
        if word != 0 {
            let index = word_index * WORD_BITS + (WORD_BITS - 1 - word.leading_zeros() as usize);
            return (index >= start).then_some(index);
        }

        if word_index * WORD_BITS <= start {
            return None;
        }
        word_index -= 1;
        word = words[word_index];
    }
}
