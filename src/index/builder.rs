//! Converts an encoded triple stream into the six on-disk index arrays.
use super::{
    DbInfo, ENTITY_INDEX, ENTITY_INDEX_ARRAYS, Error, PO_PREDICATE_MAP, PREDICATE_INDEX,
    PREDICATE_INDEX_ARRAYS, PS_PREDICATE_MAP, Result,
};
use crate::containers::{MmapFile, SortedChain, mmap::RegionWriter};
use crate::dictionary::{Dictionary, Pso};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;

/// Builds the index files for one database from the dictionary-encoded triples.
pub struct IndexBuilder<'a> {
    dict: &'a Dictionary,
    index_dir: PathBuf,
    threads: usize,
}

/// Offsets shared between the build workers, advanced only under one lock.
struct Reservations {
    /// next free word per entity block in `PO_PREDICATE_MAP`
    po_cursor: Vec<u32>,
    /// next free word per entity block in `PS_PREDICATE_MAP`
    ps_cursor: Vec<u32>,
    /// next free word in `ENTITY_INDEX_ARRAYS`
    arrays_offset: usize,
}

enum Direction {
    SubjectToObject,
    ObjectToSubject,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(index_dir: impl Into<PathBuf>, dict: &'a Dictionary, threads: usize) -> Self {
        IndexBuilder { dict, index_dir: index_dir.into(), threads: threads.max(1) }
    }

    /// Run all build steps and persist `DB_INFO` last.
    pub fn build(&self, pso: &Pso) -> Result<()> {
        std::fs::create_dir_all(&self.index_dir)
            .map_err(|source| Error::CreateDir { path: self.index_dir.clone(), source })?;

        let rank = self.predicate_rank(pso);
        let sets = self.build_predicate_sets(pso);

        let max_id = self.dict.max_entity_id() as usize;
        let arrays_words: usize = sets.iter().map(|(s, o)| s.len() + o.len()).sum();
        let po_map_words: usize = sets.iter().map(|(s, _)| s.len() * 3).sum();
        let ps_map_words: usize = sets.iter().map(|(_, o)| o.len() * 3).sum();

        let (po_block_cnt, ps_block_cnt) = self.store_predicate_index(&sets, arrays_words)?;
        let (po_cursor, ps_cursor) = self.store_entity_index(max_id, &po_block_cnt, &ps_block_cnt)?;
        drop(sets);

        let entity_arrays_bytes =
            self.store_predicate_maps(pso, &rank, po_map_words, ps_map_words, po_cursor, ps_cursor)?;

        DbInfo {
            predicate_index_bytes: (self.dict.predicate_cnt() * 2 * 4),
            predicate_index_arrays_bytes: (arrays_words * 4) as u32,
            entity_index_bytes: (max_id * 2 * 4) as u32,
            po_predicate_map_bytes: (po_map_words * 4) as u32,
            ps_predicate_map_bytes: (ps_map_words * 4) as u32,
            entity_index_arrays_bytes: entity_arrays_bytes as u32,
        }
        .write(&self.index_dir)
    }

    /// Predicates ordered by descending pair count, so the worker pool starts
    /// the long-running ones first and overlaps them with shorter ones.
    fn predicate_rank(&self, pso: &Pso) -> Vec<u32> {
        let mut rank: Vec<u32> = (1..=self.dict.predicate_cnt()).collect();
        rank.sort_by_key(|pid| std::cmp::Reverse(pso.get(pid).map_or(0, Vec::len)));
        rank
    }

    /// Sorted subject-set and object-set per predicate.
    fn build_predicate_sets(&self, pso: &Pso) -> Vec<(Vec<u32>, Vec<u32>)> {
        let timer = std::time::Instant::now();
        let sets: Vec<(Vec<u32>, Vec<u32>)> = (1..=self.dict.predicate_cnt())
            .into_par_iter()
            .map(|pid| {
                let mut subjects = BTreeSet::new();
                let mut objects = BTreeSet::new();
                if let Some(pairs) = pso.get(&pid) {
                    for &(s, o) in pairs {
                        subjects.insert(s);
                        objects.insert(o);
                    }
                }
                (subjects.into_iter().collect(), objects.into_iter().collect())
            })
            .collect();
        info!("predicate sets built in {:?}", timer.elapsed());
        sets
    }

    /// Write `PREDICATE_INDEX` and `PREDICATE_INDEX_ARRAYS`, counting along the
    /// way how many predicates touch each entity in each direction. Those
    /// counts size the per-entity blocks of the two predicate maps.
    fn store_predicate_index(
        &self, sets: &[(Vec<u32>, Vec<u32>)], arrays_words: usize,
    ) -> Result<(Vec<u32>, Vec<u32>)> {
        let timer = std::time::Instant::now();
        let mut index =
            MmapFile::create(self.index_dir.join(PREDICATE_INDEX), sets.len() * 2 * 4)?;
        let mut arrays =
            MmapFile::create(self.index_dir.join(PREDICATE_INDEX_ARRAYS), arrays_words * 4)?;

        let max_id = self.dict.max_entity_id() as usize;
        let mut po_block_cnt = vec![0u32; max_id];
        let mut ps_block_cnt = vec![0u32; max_id];
        let mut offset = 0usize;
        for (i, (subjects, objects)) in sets.iter().enumerate() {
            index.set(i * 2, offset as u32);
            for &s in subjects {
                po_block_cnt[s as usize - 1] += 1;
                arrays.set(offset, s);
                offset += 1;
            }
            index.set(i * 2 + 1, offset as u32);
            for &o in objects {
                ps_block_cnt[o as usize - 1] += 1;
                arrays.set(offset, o);
                offset += 1;
            }
        }
        index.flush()?;
        arrays.flush()?;
        info!("predicate index stored in {:?}", timer.elapsed());
        Ok((po_block_cnt, ps_block_cnt))
    }

    /// Write the two block offsets per entity and return the same offsets as
    /// the workers' write cursors.
    fn store_entity_index(
        &self, max_id: usize, po_block_cnt: &[u32], ps_block_cnt: &[u32],
    ) -> Result<(Vec<u32>, Vec<u32>)> {
        let timer = std::time::Instant::now();
        let mut index = MmapFile::create(self.index_dir.join(ENTITY_INDEX), max_id * 2 * 4)?;
        let mut po_cursor = vec![0u32; max_id];
        let mut ps_cursor = vec![0u32; max_id];
        let mut offset = 0u32;
        for e in 0..max_id {
            index.set(e * 2, offset);
            po_cursor[e] = offset;
            offset += po_block_cnt[e] * 3;
        }
        offset = 0;
        for e in 0..max_id {
            index.set(e * 2 + 1, offset);
            ps_cursor[e] = offset;
            offset += ps_block_cnt[e] * 3;
        }
        index.flush()?;
        info!("entity index stored in {:?}", timer.elapsed());
        Ok((po_cursor, ps_cursor))
    }

    /// Build the per-predicate adjacency in both directions and write the two
    /// predicate maps plus `ENTITY_INDEX_ARRAYS`.
    ///
    /// Workers pull predicates from the shared queue in rank order. The mutex
    /// guards only interval reservation (entity cursors and the running arrays
    /// offset); the reserved intervals are disjoint, so the writes themselves
    /// need no lock. Returns the final byte size of `ENTITY_INDEX_ARRAYS`
    /// after shrinking it from the provisional bound.
    fn store_predicate_maps(
        &self, pso: &Pso, rank: &[u32], po_map_words: usize, ps_map_words: usize,
        po_cursor: Vec<u32>, ps_cursor: Vec<u32>,
    ) -> Result<usize> {
        let timer = std::time::Instant::now();
        // each triple contributes at most one slot per direction
        let provisional_words = self.dict.triple_cnt() as usize * 2;

        let mut po_map = MmapFile::create(self.index_dir.join(PO_PREDICATE_MAP), po_map_words * 4)?;
        let mut ps_map = MmapFile::create(self.index_dir.join(PS_PREDICATE_MAP), ps_map_words * 4)?;
        let mut arrays =
            MmapFile::create(self.index_dir.join(ENTITY_INDEX_ARRAYS), provisional_words * 4)?;

        let po_writer = po_map.region_writer();
        let ps_writer = ps_map.region_writer();
        let arrays_writer = arrays.region_writer();
        let reservations =
            Mutex::new(Reservations { po_cursor, ps_cursor, arrays_offset: 0 });
        let queue = Mutex::new(rank.iter().copied().collect::<VecDeque<u32>>());

        thread::scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(|| {
                    loop {
                        let Some(pid) = queue.lock().unwrap().pop_front() else {
                            break;
                        };
                        let Some(pairs) = pso.get(&pid) else { continue };
                        let mut s_to_o: HashMap<u32, SortedChain> = HashMap::new();
                        let mut o_to_s: HashMap<u32, SortedChain> = HashMap::new();
                        for &(s, o) in pairs {
                            s_to_o.entry(s).or_default().insert(o);
                            o_to_s.entry(o).or_default().insert(s);
                        }
                        store_adjacency(
                            pid,
                            &s_to_o,
                            Direction::SubjectToObject,
                            &po_writer,
                            &arrays_writer,
                            &reservations,
                        );
                        store_adjacency(
                            pid,
                            &o_to_s,
                            Direction::ObjectToSubject,
                            &ps_writer,
                            &arrays_writer,
                            &reservations,
                        );
                        debug!("predicate {pid} mapped ({} pairs)", pairs.len());
                    }
                });
            }
        });

        let reserved = reservations.into_inner().unwrap().arrays_offset;
        if reserved > provisional_words {
            return Err(Error::ArraysOverflow { reserved, bound: provisional_words });
        }
        drop((po_writer, ps_writer, arrays_writer));
        po_map.flush()?;
        ps_map.flush()?;
        if reserved != provisional_words {
            arrays.resize(reserved * 4)?;
        }
        arrays.flush()?;
        info!("predicate maps stored in {:?}", timer.elapsed());
        Ok(reserved * 4)
    }
}

/// Write one predicate's adjacency in one direction: a `(predicate, offset or
/// inline id, count)` entry at each touched entity's cursor and, for counts
/// above one, the sorted ids into the reserved arrays interval.
fn store_adjacency(
    pid: u32, adjacency: &HashMap<u32, SortedChain>, direction: Direction,
    map_writer: &RegionWriter<'_>, arrays_writer: &RegionWriter<'_>,
    reservations: &Mutex<Reservations>,
) {
    for (&entity, chain) in adjacency {
        let count = chain.len();
        if count == 0 {
            continue;
        }
        let (entry_offset, arrays_start) = {
            let mut guard = reservations.lock().unwrap();
            let cursor = match direction {
                Direction::SubjectToObject => &mut guard.po_cursor[entity as usize - 1],
                Direction::ObjectToSubject => &mut guard.ps_cursor[entity as usize - 1],
            };
            let entry_offset = *cursor as usize;
            *cursor += 3;
            let arrays_start = guard.arrays_offset;
            if count != 1 {
                guard.arrays_offset += count;
            }
            (entry_offset, arrays_start)
        };

        map_writer.set(entry_offset, pid);
        if count == 1 {
            let single = chain.iter().next().unwrap_or(0);
            map_writer.set(entry_offset + 1, single);
            map_writer.set(entry_offset + 2, 1);
        } else {
            map_writer.set(entry_offset + 1, arrays_start as u32);
            map_writer.set(entry_offset + 2, count as u32);
            for (i, id) in chain.iter().enumerate() {
                arrays_writer.set(arrays_start + i, id);
            }
        }
    }
}
