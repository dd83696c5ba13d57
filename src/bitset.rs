//! Compact bitset representation for leaf sets (splits) in phylogenetic trees.
//!
//! Each bit position corresponds to a taxon index. Taxon indices are assigned
//! by sorting the leaf names, so the same taxon maps to the same bit in every
//! tree that is compared.
//!
//! For leaves [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - split {A, C} | {B, D} → bitset `0b0101` or its complement `0b1010`
//! - split {B, C, D} | {A} → bitset `0b1110`

/// A set of taxon indices packed into 64-bit words.
///
/// Bits past the number of taxa are always zero, which keeps equal sets
/// hashing and comparing equal.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Number of 64-bit words needed to hold `num_taxa` bits.
    #[inline]
    pub fn words_for(num_taxa: usize) -> usize {
        num_taxa.div_ceil(64).max(1)
    }

    /// Creates an empty bitset of `words` words.
    ///
    /// ```
    /// # use phylo_engine::bitset::Bitset;
    /// let bs = Bitset::zeros(Bitset::words_for(100));
    /// assert_eq!(bs.0.len(), 2);
    /// assert_eq!(bs.count_ones(), 0);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Bitset of a single taxon.
    pub fn singleton(words: usize, idx: usize) -> Self {
        let mut bs = Bitset::zeros(words);
        bs.set(idx);
        bs
    }

    /// Marks taxon `idx` as present.
    ///
    /// ```
    /// # use phylo_engine::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        self.0[idx >> 6] |= 1u64 << (idx & 63);
    }

    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        (self.0[idx >> 6] >> (idx & 63)) & 1 == 1
    }

    /// Union in place: `self` becomes `self ∪ other`.
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Population count: number of taxa in the set.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The taxa of `0..num_taxa` not in this set.
    ///
    /// ```
    /// # use phylo_engine::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(1);
    /// assert_eq!(bs.complement(4).0[0], 0b1100);
    /// ```
    pub fn complement(&self, num_taxa: usize) -> Bitset {
        let mut out = Bitset(self.0.iter().map(|w| !w).collect());
        let tail = num_taxa & 63;
        let full_words = num_taxa >> 6;
        for (i, w) in out.0.iter_mut().enumerate() {
            if i > full_words || (i == full_words && tail == 0) {
                *w = 0;
            } else if i == full_words {
                *w &= (1u64 << tail) - 1;
            }
        }
        out
    }

    /// Orient a split on the side that does not contain taxon 0.
    ///
    /// Both halves of a bipartition then map to one representation, which is
    /// what makes splits from differently rooted trees comparable.
    pub fn canonical(self, num_taxa: usize) -> Bitset {
        if self.contains(0) { self.complement(num_taxa) } else { self }
    }

    /// True when the split separates at least two taxa on each side.
    pub fn is_informative(&self, num_taxa: usize) -> bool {
        let k = self.count_ones();
        k >= 2 && k + 2 <= num_taxa
    }

    /// Indices of the set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(wi, &w)| {
            (0..64).filter(move |b| (w >> b) & 1 == 1).map(move |b| wi * 64 + b)
        })
    }
}
