//! The six on-disk index arrays: build and retrieval.
//!
//! Layout under `<db>/index/`, all files arrays of 32-bit little-endian words:
//!
//! - `PREDICATE_INDEX`: two words per predicate, the offsets in
//!   `PREDICATE_INDEX_ARRAYS` of its sorted subject-set and object-set.
//! - `PREDICATE_INDEX_ARRAYS`: the concatenated sets.
//! - `ENTITY_INDEX`: two words per entity, the offsets of its blocks in
//!   `PO_PREDICATE_MAP` (as subject) and `PS_PREDICATE_MAP` (as object).
//! - `PO_PREDICATE_MAP` / `PS_PREDICATE_MAP`: per-entity blocks of
//!   `(predicate, arrays offset or inline id, count)` triples; a count of one
//!   stores the single id inline.
//! - `ENTITY_INDEX_ARRAYS`: the concatenated sorted adjacency lists the maps
//!   point into.
//!
//! `DB_INFO` records the byte size of each file; block and set lengths at the
//! end of a file are derived from these sizes, never from reads past the end.
use crate::containers::{MmapFile, mmap};
use crate::dictionary;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod builder;
mod retriever;

pub use builder::IndexBuilder;
pub use retriever::IndexRetriever;

pub(crate) const DB_INFO: &str = "DB_INFO";
pub(crate) const PREDICATE_INDEX: &str = "PREDICATE_INDEX";
pub(crate) const PREDICATE_INDEX_ARRAYS: &str = "PREDICATE_INDEX_ARRAYS";
pub(crate) const ENTITY_INDEX: &str = "ENTITY_INDEX";
pub(crate) const PO_PREDICATE_MAP: &str = "PO_PREDICATE_MAP";
pub(crate) const PS_PREDICATE_MAP: &str = "PS_PREDICATE_MAP";
pub(crate) const ENTITY_INDEX_ARRAYS: &str = "ENTITY_INDEX_ARRAYS";

pub type Result<T> = core::result::Result<T, Error>;

/// The error type for index build and retrieval.
#[derive(Error, Debug)]
pub enum Error {
    #[error("index file error")]
    Mmap(#[from] mmap::Error),
    #[error("dictionary error")]
    Dictionary(#[from] dictionary::Error),
    #[error("missing database at {0}")]
    MissingDatabase(PathBuf),
    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("adjacency arrays need {reserved} words but only {bound} were provisioned")]
    ArraysOverflow { reserved: usize, bound: usize },
}

/// Byte sizes of the six index files, persisted as the `DB_INFO` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct DbInfo {
    pub predicate_index_bytes: u32,
    pub predicate_index_arrays_bytes: u32,
    pub entity_index_bytes: u32,
    pub po_predicate_map_bytes: u32,
    pub ps_predicate_map_bytes: u32,
    pub entity_index_arrays_bytes: u32,
}

impl DbInfo {
    fn as_words(&self) -> [u32; 6] {
        [
            self.predicate_index_bytes,
            self.predicate_index_arrays_bytes,
            self.entity_index_bytes,
            self.po_predicate_map_bytes,
            self.ps_predicate_map_bytes,
            self.entity_index_arrays_bytes,
        ]
    }

    pub fn write(&self, index_dir: &Path) -> Result<()> {
        let mut map = MmapFile::create(index_dir.join(DB_INFO), 6 * 4)?;
        for (i, word) in self.as_words().into_iter().enumerate() {
            map.set(i, word);
        }
        map.flush()?;
        Ok(())
    }

    pub fn read(index_dir: &Path) -> Result<Self> {
        let path = index_dir.join(DB_INFO);
        if !path.is_file() {
            return Err(Error::MissingDatabase(index_dir.to_path_buf()));
        }
        let map = MmapFile::open(path, 6 * 4)?;
        Ok(DbInfo {
            predicate_index_bytes: map.get(0),
            predicate_index_arrays_bytes: map.get(1),
            entity_index_bytes: map.get(2),
            po_predicate_map_bytes: map.get(3),
            ps_predicate_map_bytes: map.get(4),
            entity_index_arrays_bytes: map.get(5),
        })
    }
}
