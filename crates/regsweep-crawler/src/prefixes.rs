//! Enumeration of the fixed-length search key space.
//!
//! Prefixes are the cartesian product of the alphabet with itself, in odometer
//! order: the last character varies fastest. The order is total and stable, so
//! the index of a prefix can be used as a resume offset.

pub const DEFAULT_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 &()-'./";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixSpace {
    alphabet: Vec<char>,
    length: usize,
}

impl PrefixSpace {
    pub fn new(alphabet: &str, length: usize) -> anyhow::Result<Self> {
        let mut chars: Vec<char> = Vec::new();
        for c in alphabet.chars() {
            if chars.contains(&c) {
                anyhow::bail!("Duplicate character {c:?} in prefix alphabet");
            }
            chars.push(c);
        }
        if chars.is_empty() {
            anyhow::bail!("Prefix alphabet is empty");
        }
        if length == 0 {
            anyhow::bail!("Prefix length must be at least 1");
        }
        let size = (chars.len() as u128).checked_pow(length as u32);
        if size.map_or(true, |n| n > usize::MAX as u128) {
            anyhow::bail!("Prefix space too large: {} ^ {length}", chars.len());
        }
        Ok(Self {
            alphabet: chars,
            length,
        })
    }

    pub fn len(&self) -> usize {
        self.alphabet.len().pow(self.length as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The prefix at `index` in enumeration order.
    pub fn nth(&self, index: usize) -> Option<String> {
        if index >= self.len() {
            return None;
        }
        let base = self.alphabet.len();
        let mut digits = vec![0usize; self.length];
        let mut rest = index;
        for slot in digits.iter_mut().rev() {
            *slot = rest % base;
            rest /= base;
        }
        Some(digits.into_iter().map(|d| self.alphabet[d]).collect())
    }

    /// The index of `prefix`, if it belongs to this space.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        if prefix.chars().count() != self.length {
            return None;
        }
        let base = self.alphabet.len();
        prefix.chars().try_fold(0usize, |index, c| {
            let digit = self.alphabet.iter().position(|a| *a == c)?;
            index.checked_mul(base)?.checked_add(digit)
        })
    }

    /// All prefixes from `start` (inclusive) to the end of the space.
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = String> + '_ {
        (start..self.len()).filter_map(move |i| self.nth(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        self.iter_from(0)
    }
}

impl Default for PrefixSpace {
    fn default() -> Self {
        Self {
            alphabet: DEFAULT_ALPHABET.chars().collect(),
            length: 3,
        }
    }
}
