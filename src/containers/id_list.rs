use crate::containers::MmapFile;
use std::sync::Arc;

/// A sorted sequence of entity ids, either owned or a view into a mapped index file.
///
/// Everything the executor passes around (prestored ranges, probe results,
/// leapfrog outputs) is one of these. Cloning is cheap: the owned variant
/// shares its buffer and the view variant shares the mapping.
#[derive(Clone)]
pub enum IdList {
    /// Decoded sets, join results and the inline `count == 1` case.
    Owned(Arc<[u32]>),
    /// A window of `len` words into `ENTITY_INDEX_ARRAYS`.
    View { map: Arc<MmapFile>, offset: usize, len: usize },
}

impl IdList {
    pub fn empty() -> Self {
        IdList::Owned(Arc::from([]))
    }

    pub fn singleton(value: u32) -> Self {
        IdList::Owned(Arc::from([value]))
    }

    pub fn len(&self) -> usize {
        match self {
            IdList::Owned(data) => data.len(),
            IdList::View { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The id at `index`, or the sentinel `0` when out of bounds.
    pub fn get(&self, index: usize) -> u32 {
        match self {
            IdList::Owned(data) => data.get(index).copied().unwrap_or(0),
            IdList::View { map, offset, len } => {
                if index < *len {
                    map.get(offset + index)
                } else {
                    0
                }
            }
        }
    }

    pub fn first(&self) -> Option<u32> {
        if self.is_empty() { None } else { Some(self.get(0)) }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).map(|i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    /// Binary search for `value`; the sequence is sorted ascending.
    pub fn contains(&self, value: u32) -> bool {
        let (mut low, mut high) = (0, self.len());
        while low < high {
            let mid = usize::midpoint(low, high);
            match self.get(mid).cmp(&value) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }
}

impl Default for IdList {
    fn default() -> Self {
        IdList::empty()
    }
}

impl From<Vec<u32>> for IdList {
    fn from(data: Vec<u32>) -> Self {
        IdList::Owned(data.into())
    }
}

impl std::fmt::Debug for IdList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdList::Owned(data) => write!(f, "IdList::Owned({} ids)", data.len()),
            IdList::View { offset, len, .. } => write!(f, "IdList::View({len} ids at {offset})"),
        }
    }
}
