//! Suffix index over a delta base.
//!
//! A sorted suffix array: finding the longest prefix of a pattern that
//! occurs anywhere in the base reduces to one binary search plus a prefix
//! comparison with the two neighbouring suffixes of the insertion point.

/// Sorted suffix array over a byte slice.
pub struct SuffixIndex<'a> {
    data: &'a [u8],
    suffixes: Vec<u32>,
}

impl<'a> SuffixIndex<'a> {
    /// Build the index. O(n log n) comparisons, each up to O(n).
    pub fn build(data: &'a [u8]) -> Self {
        let mut suffixes: Vec<u32> = (0..data.len() as u32).collect();
        suffixes.sort_unstable_by(|&a, &b| data[a as usize..].cmp(&data[b as usize..]));
        Self { data, suffixes }
    }

    /// The indexed base.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Longest prefix of `pattern` occurring anywhere in the base.
    ///
    /// Returns `(base_offset, match_len)` with `match_len >= 1`, or `None`
    /// when not even the first byte occurs.
    pub fn longest_match(&self, pattern: &[u8]) -> Option<(usize, usize)> {
        if self.suffixes.is_empty() || pattern.is_empty() {
            return None;
        }

        // The suffix sharing the longest prefix with `pattern` is adjacent
        // to the insertion point in suffix order.
        let at = self
            .suffixes
            .partition_point(|&s| &self.data[s as usize..] < pattern);

        let mut best: Option<(usize, usize)> = None;
        for i in [at.checked_sub(1), Some(at)].into_iter().flatten() {
            if let Some(&suffix) = self.suffixes.get(i) {
                let start = suffix as usize;
                let len = common_prefix(&self.data[start..], pattern);
                if len > 0 && best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((start, len));
                }
            }
        }
        best
    }

    /// Whether `pattern` occurs in full anywhere in the base.
    pub fn contains(&self, pattern: &[u8]) -> bool {
        match self.longest_match(pattern) {
            Some((_, len)) => len >= pattern.len(),
            None => pattern.is_empty(),
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
