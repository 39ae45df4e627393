//! Compressed bit vectors over feature identifiers.
//!
//! A [`Cbv`] is either one of two distinguished values, `Empty` and `Full`
//! (conceptually "every identifier"), or an explicit roaring bitmap. `Full`
//! never materializes a bitmap: union and intersection against it are
//! algebraic short-circuits.
//!
//! # Examples
//!
//! ```
//! use geocoder::Cbv;
//!
//! let a = Cbv::from_ids([1, 2, 3]);
//! let b = Cbv::from_ids([2, 3, 4]);
//!
//! assert_eq!(a.intersect(&b), Cbv::from_ids([2, 3]));
//! assert_eq!(Cbv::full().intersect(&a), a);
//! assert!(Cbv::empty().intersect(&a).is_empty());
//! ```

use roaring::RoaringBitmap;

/// Hash reported for the `Empty` set.
pub const EMPTY_HASH: u64 = 0;

/// Hash reported for the `Full` set.
pub const FULL_HASH: u64 = u64::MAX;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cbv {
    #[default]
    Empty,
    Full,
    /// Never holds an empty bitmap; constructors normalize that to `Empty`.
    Bits(RoaringBitmap),
}

impl Cbv {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn full() -> Self {
        Self::Full
    }

    pub fn from_bitmap(bits: RoaringBitmap) -> Self {
        if bits.is_empty() {
            Self::Empty
        } else {
            Self::Bits(bits)
        }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        Self::from_bitmap(ids.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }

    pub fn has_bit(&self, id: u32) -> bool {
        match self {
            Self::Empty => false,
            Self::Full => true,
            Self::Bits(bits) => bits.contains(id),
        }
    }

    /// Number of identifiers in the set.
    ///
    /// The population of `Full` is undefined; debug builds assert, release
    /// builds report `u64::MAX`.
    pub fn pop_count(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Full => {
                debug_assert!(false, "pop_count() called on a full CBV");
                u64::MAX
            }
            Self::Bits(bits) => bits.len(),
        }
    }

    pub fn union(&self, other: &Cbv) -> Cbv {
        match (self, other) {
            (Self::Full, _) | (_, Self::Full) => Self::Full,
            (Self::Empty, rhs) => rhs.clone(),
            (lhs, Self::Empty) => lhs.clone(),
            (Self::Bits(a), Self::Bits(b)) => Self::Bits(a | b),
        }
    }

    pub fn intersect(&self, other: &Cbv) -> Cbv {
        match (self, other) {
            (Self::Empty, _) | (_, Self::Empty) => Self::Empty,
            (Self::Full, rhs) => rhs.clone(),
            (lhs, Self::Full) => lhs.clone(),
            (Self::Bits(a), Self::Bits(b)) => Self::from_bitmap(a & b),
        }
    }

    /// Returns the first `n` identifiers in ascending order.
    ///
    /// For `Full` the result is the dense set `0..n`.
    pub fn take(&self, n: u64) -> Cbv {
        match self {
            Self::Empty => Self::Empty,
            Self::Full => {
                let end = n.min(u64::from(u32::MAX)) as u32;
                let mut bits = RoaringBitmap::new();
                bits.insert_range(0..end);
                Self::from_bitmap(bits)
            }
            Self::Bits(bits) => {
                if bits.len() <= n {
                    return self.clone();
                }
                Self::from_ids(bits.iter().take(n as usize))
            }
        }
    }

    /// Iterates over the identifiers in ascending order.
    ///
    /// Enumerating `Full` is undefined: debug builds assert, release builds
    /// yield nothing.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        debug_assert!(!self.is_full(), "iter() called on a full CBV");
        let bits = match self {
            Self::Bits(bits) => Some(bits.iter()),
            _ => None,
        };
        bits.into_iter().flatten()
    }

    pub fn for_each(&self, mut f: impl FnMut(u32)) {
        for id in self.iter() {
            f(id);
        }
    }

    pub fn to_sorted_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    /// Stable content hash, used as a key by small result caches.
    pub fn hash(&self) -> u64 {
        match self {
            Self::Empty => EMPTY_HASH,
            Self::Full => FULL_HASH,
            Self::Bits(bits) => {
                let ids: Vec<u32> = bits.iter().collect();
                xxhash_rust::xxh3::xxh3_64(bytemuck::cast_slice(&ids))
            }
        }
    }

    /// Pairwise union of adjacent sets until at most one is left.
    pub fn unite_all(mut cbvs: Vec<Cbv>) -> Cbv {
        while cbvs.len() > 1 {
            let mut next = Vec::with_capacity(cbvs.len().div_ceil(2));
            let mut it = cbvs.into_iter();
            while let Some(a) = it.next() {
                match it.next() {
                    Some(b) => next.push(a.union(&b)),
                    None => next.push(a),
                }
            }
            cbvs = next;
        }
        cbvs.pop().unwrap_or_default()
    }
}

impl FromIterator<u32> for Cbv {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}
