// tagmap.rs — dense tag -> index map and its inverse.
//
// The original chains tags into fixed hash buckets it sizes and rehashes by
// hand; the chaining strategy itself isn't observable through the public
// interface, so this uses `std::collections::HashMap` for storage (the std
// map already gives the externally-visible contract: fail-on-duplicate
// insert, absent-sentinel lookup, sorted-order dense indices) while keeping
// myq2-common's `Option`-sentinel idiom (`net.rs`'s
// registration dispatch) rather than reaching for a C-style magic constant.

use std::collections::HashMap;

/// Sentinel returned by [`TagIndex::insert`] when a tag is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fail;

/// The canonical dense tag -> index map, built once by rank 0 in setup and
/// then shared (by value, since it's small and immutable afterwards) with
/// every rank that needs to translate indices back to tags.
#[derive(Debug, Default, Clone)]
pub struct TagIndex {
    idmap: HashMap<i64, i32>,
    rev_idmap: Vec<i64>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the canonical map from a tag list that is already sorted in
    /// ascending order: rank 0 sorts the gathered `taglist`, then inserts
    /// `(taglist[i], i)` for each position. Returns `Err(Fail)` if a
    /// duplicate tag is encountered.
    pub fn build_from_sorted_tags(sorted_tags: &[i64]) -> Result<Self, Fail> {
        let mut idmap = HashMap::with_capacity(sorted_tags.len());
        let mut rev_idmap = Vec::with_capacity(sorted_tags.len());
        for (i, &tag) in sorted_tags.iter().enumerate() {
            if idmap.insert(tag, i as i32).is_some() {
                return Err(Fail);
            }
            rev_idmap.push(tag);
        }
        Ok(Self { idmap, rev_idmap })
    }

    /// Number of particles in the reporting group (`num_coords`).
    pub fn len(&self) -> usize {
        self.rev_idmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rev_idmap.is_empty()
    }

    /// Dense index for `tag`, or `None` if it's not in the reporting group.
    pub fn index_of(&self, tag: i64) -> Option<i32> {
        self.idmap.get(&tag).copied()
    }

    /// Inverse lookup: the tag originally assigned dense index `index`.
    /// Used to translate client-supplied MDCOMM indices back to tags.
    pub fn tag_of(&self, index: i32) -> Option<i64> {
        self.rev_idmap.get(usize::try_from(index).ok()?).copied()
    }
}

/// Sort a list of (tag) records the way rank 0 does once all ranks' tags
/// have been gathered into one buffer. A plain comparison sort is used;
/// a handwritten partitioning quicksort would have no externally observable
/// difference from a stable sort over the same key.
pub fn sort_tags(tags: &mut [i64]) {
    tags.sort_unstable();
}


impl std::fmt::Display for Fail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tag already present in index")
    }
}

impl std::error::Error for Fail {}
