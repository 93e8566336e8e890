/// A vector of single-bit flags.
///
/// Used by the generational pool to answer "is this slot free?" without
/// touching the slot itself. The vector grows as indices are set but never
/// shrinks.
#[derive(Clone, Default)]
pub struct FlagVec {
    words: Vec<u64>,
    length: usize,
    ones: usize,
}

impl FlagVec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of the highest set bit + 1. This value is 'sticky'
    /// and will never decrease, even if that bit is later cleared.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if no flag was ever set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The number of flags currently set.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    /// Sets the flag at the given index to the given value, and returns the
    /// old value.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        let (word, bit) = (index / 64, index % 64);

        if word >= self.words.len() {
            if !value {
                return false;
            }
            self.words.resize(word + 1, 0);
        }

        if value {
            self.length = self.length.max(index + 1);
        }

        let mask = 1u64 << bit;
        let old = self.words[word] & mask != 0;

        if value {
            self.words[word] |= mask;
        } else {
            self.words[word] &= !mask;
        }

        match (old, value) {
            (false, true) => self.ones += 1,
            (true, false) => self.ones -= 1,
            _ => {}
        }

        old
    }

    /// Returns the value of the flag at the given index, or false if the
    /// index is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .map_or(false, |word| word & (1 << (index % 64)) != 0)
    }

    /// Iterates over the indices of every set flag in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |bit| word & (1 << bit) != 0).map(move |bit| w * 64 + bit)
        })
    }
}
