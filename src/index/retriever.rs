//! Read-only access to a built database: set and adjacency probes plus decoding.
use super::{
    DbInfo, ENTITY_INDEX, ENTITY_INDEX_ARRAYS, Error, PO_PREDICATE_MAP, PREDICATE_INDEX,
    PREDICATE_INDEX_ARRAYS, PS_PREDICATE_MAP, Result,
};
use crate::containers::{IdList, MmapFile};
use crate::dictionary::{Dictionary, ExtractError, TermRole};
use log::info;
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Opens the six index files and the dictionary of one database and answers
/// the probes the planner and executor need. Immutable after `open`, so it is
/// freely shareable across concurrent queries.
pub struct IndexRetriever {
    dict: Dictionary,
    info: DbInfo,
    entity_index: MmapFile,
    po_map: MmapFile,
    ps_map: MmapFile,
    entity_arrays: Arc<MmapFile>,
    // per-predicate sets decoded once at open so queries do not re-walk the mapping
    subject_sets: Vec<IdList>,
    object_sets: Vec<IdList>,
}

impl IndexRetriever {
    /// Open the database directory. The dictionary shards load on their own
    /// thread while the predicate sets are decoded.
    pub fn open(db_dir: &Path) -> Result<Self> {
        let timer = std::time::Instant::now();
        let index_dir = db_dir.join("index");
        let dict_dir = db_dir.join("dictionary");
        if !index_dir.is_dir() || !dict_dir.is_dir() {
            return Err(Error::MissingDatabase(db_dir.to_path_buf()));
        }
        let info = DbInfo::read(&index_dir)?;

        let predicate_index = MmapFile::open(
            index_dir.join(PREDICATE_INDEX),
            info.predicate_index_bytes as usize,
        )?;
        let predicate_arrays = MmapFile::open(
            index_dir.join(PREDICATE_INDEX_ARRAYS),
            info.predicate_index_arrays_bytes as usize,
        )?;
        let entity_index =
            MmapFile::open(index_dir.join(ENTITY_INDEX), info.entity_index_bytes as usize)?;
        let po_map =
            MmapFile::open(index_dir.join(PO_PREDICATE_MAP), info.po_predicate_map_bytes as usize)?;
        let ps_map =
            MmapFile::open(index_dir.join(PS_PREDICATE_MAP), info.ps_predicate_map_bytes as usize)?;
        let entity_arrays = Arc::new(MmapFile::open(
            index_dir.join(ENTITY_INDEX_ARRAYS),
            info.entity_index_arrays_bytes as usize,
        )?);

        let (dict, (subject_sets, object_sets)) = thread::scope(|scope| {
            let loader = scope.spawn(|| Dictionary::load(&dict_dir));
            let sets = Self::decode_predicate_sets(&predicate_index, &predicate_arrays);
            (loader.join().expect("dictionary loader panicked"), sets)
        });
        let dict = dict?;
        info!("database {} opened in {:?}", db_dir.display(), timer.elapsed());

        Ok(IndexRetriever {
            dict,
            info,
            entity_index,
            po_map,
            ps_map,
            entity_arrays,
            subject_sets,
            object_sets,
        })
    }

    /// Decode every predicate's subject-set and object-set into owned lists.
    /// The object-set of the last predicate ends at the end of the arrays file.
    fn decode_predicate_sets(
        predicate_index: &MmapFile, predicate_arrays: &MmapFile,
    ) -> (Vec<IdList>, Vec<IdList>) {
        let predicate_cnt = predicate_index.words() / 2;
        let arrays_words = predicate_arrays.words();
        let mut subject_sets = Vec::with_capacity(predicate_cnt);
        let mut object_sets = Vec::with_capacity(predicate_cnt);
        for p in 0..predicate_cnt {
            let s_offset = predicate_index.get(p * 2) as usize;
            let o_offset = predicate_index.get(p * 2 + 1) as usize;
            let o_end = if p + 1 < predicate_cnt {
                predicate_index.get((p + 1) * 2) as usize
            } else {
                arrays_words
            };
            let decode = |from: usize, to: usize| -> IdList {
                (from..to).map(|i| predicate_arrays.get(i)).collect::<Vec<u32>>().into()
            };
            subject_sets.push(decode(s_offset, o_offset));
            object_sets.push(decode(o_offset, o_end));
        }
        (subject_sets, object_sets)
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn string_to_id(&self, term: &str, role: TermRole) -> u32 {
        self.dict.string_to_id(term, role)
    }

    pub fn id_to_string(&self, id: u32, role: TermRole) -> core::result::Result<&str, ExtractError> {
        self.dict.id_to_string(id, role)
    }

    /// All subjects `s` with some triple `(s, p, _)`, sorted ascending.
    pub fn subjects_of(&self, pid: u32) -> IdList {
        self.predicate_set(&self.subject_sets, pid)
    }

    /// All objects `o` with some triple `(_, p, o)`, sorted ascending.
    pub fn objects_of(&self, pid: u32) -> IdList {
        self.predicate_set(&self.object_sets, pid)
    }

    pub fn size_subjects_of(&self, pid: u32) -> usize {
        self.subjects_of(pid).len()
    }

    pub fn size_objects_of(&self, pid: u32) -> usize {
        self.objects_of(pid).len()
    }

    fn predicate_set(&self, sets: &[IdList], pid: u32) -> IdList {
        match pid {
            0 => IdList::empty(),
            _ => sets.get(pid as usize - 1).cloned().unwrap_or_else(IdList::empty),
        }
    }

    /// All objects `o` with a triple `(s, p, o)`, sorted ascending; empty when
    /// `s` or `p` is unknown or no such triple exists.
    pub fn objects_with_subject(&self, pid: u32, s: u32) -> IdList {
        self.adjacency(&self.po_map, self.po_map_entry(s), pid)
    }

    /// All subjects `s` with a triple `(s, p, o)`, sorted ascending.
    pub fn subjects_with_object(&self, pid: u32, o: u32) -> IdList {
        self.adjacency(&self.ps_map, self.ps_map_entry(o), pid)
    }

    pub fn size_objects_with_subject(&self, pid: u32, s: u32) -> usize {
        self.block_entry(&self.po_map, self.po_map_entry(s), pid).map_or(0, |(_, count)| count)
    }

    pub fn size_subjects_with_object(&self, pid: u32, o: u32) -> usize {
        self.block_entry(&self.ps_map, self.ps_map_entry(o), pid).map_or(0, |(_, count)| count)
    }

    /// Word range of the entity's block in `PO_PREDICATE_MAP`, the direction
    /// where the entity plays subject.
    fn po_map_entry(&self, entity: u32) -> Option<(usize, usize)> {
        self.block_bounds(entity, 0, self.info.po_predicate_map_bytes as usize / 4)
    }

    fn ps_map_entry(&self, entity: u32) -> Option<(usize, usize)> {
        self.block_bounds(entity, 1, self.info.ps_predicate_map_bytes as usize / 4)
    }

    /// The block of the last entity ends at the end of the map file; every
    /// other block ends where the next entity's begins.
    fn block_bounds(&self, entity: u32, direction: usize, map_words: usize) -> Option<(usize, usize)> {
        let max_id = self.dict.max_entity_id();
        if entity == 0 || entity > max_id {
            return None;
        }
        let offset = self.entity_index.get((entity as usize - 1) * 2 + direction) as usize;
        let end = if entity < max_id {
            self.entity_index.get(entity as usize * 2 + direction) as usize
        } else {
            map_words
        };
        Some((offset, (end - offset) / 3))
    }

    /// Linear scan of the `3·k` block cells for the entry of `pid`.
    fn block_entry(
        &self, map: &MmapFile, bounds: Option<(usize, usize)>, pid: u32,
    ) -> Option<(usize, usize)> {
        let (offset, entries) = bounds?;
        (0..entries)
            .map(|i| offset + 3 * i)
            .find(|&at| map.get(at) == pid)
            .map(|at| (at, map.get(at + 2) as usize))
    }

    fn adjacency(&self, map: &MmapFile, bounds: Option<(usize, usize)>, pid: u32) -> IdList {
        match self.block_entry(map, bounds, pid) {
            // a single id is stored inline in place of the arrays offset
            Some((at, 1)) => IdList::singleton(map.get(at + 1)),
            Some((at, count)) => IdList::View {
                map: Arc::clone(&self.entity_arrays),
                offset: map.get(at + 1) as usize,
                len: count,
            },
            None => IdList::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexBuilder;
    use crate::tests::init;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    /// Build a database from raw triple lines and open it again.
    fn build_and_open(lines: &[&str], threads: usize) -> color_eyre::Result<IndexRetriever> {
        let tmp = tempfile::tempdir()?;
        let input = tmp.path().join("input.nt");
        std::fs::write(&input, lines.join("\n"))?;
        let db_dir = tmp.path().join("db");
        let (dict, pso) = Dictionary::encode(&db_dir.join("dictionary"), &input)?;
        IndexBuilder::new(db_dir.join("index"), &dict, threads).build(&pso)?;
        Ok(IndexRetriever::open(&db_dir)?)
    }

    fn strictly_increasing(list: &IdList) -> bool {
        list.to_vec().windows(2).all(|w| w[0] < w[1])
    }

    const ZOO: &[&str] = &[
        "<cat> <eats> <fish> .",
        "<cat> <eats> <mouse> .",
        "<dog> <eats> <meat> .",
        "<fish> <eats> <algae> .",
        "<cat> <likes> <dog> .",
        "<dog> <likes> <cat> .",
        "<dog> <likes> <dog> .",
        "<cat> <eats> <fish> .", // duplicate triple
    ];

    #[test]
    fn probes_match_input() -> color_eyre::Result<()> {
        init();
        let index = build_and_open(ZOO, 1)?;
        let dict = index.dict();
        let eats = dict.string_to_id("<eats>", TermRole::Predicate);
        let likes = dict.string_to_id("<likes>", TermRole::Predicate);
        let cat = dict.string_to_id("<cat>", TermRole::Subject);
        let dog = dict.string_to_id("<dog>", TermRole::Subject);
        let fish = dict.string_to_id("<fish>", TermRole::Object);

        assert_eq!(index.size_subjects_of(eats), 3); // cat, dog, fish
        assert_eq!(index.size_objects_of(eats), 4); // fish, mouse, meat, algae
        assert_eq!(index.size_subjects_of(likes), 2);
        assert_eq!(index.size_objects_of(likes), 2);

        // adjacency probes, including the inline count == 1 case
        assert_eq!(index.size_objects_with_subject(eats, cat), 2);
        assert_eq!(index.objects_with_subject(eats, dog).len(), 1);
        assert_eq!(
            index.objects_with_subject(eats, dog).to_vec(),
            vec![dict.string_to_id("<meat>", TermRole::Object)]
        );
        assert_eq!(index.subjects_with_object(eats, fish).to_vec(), vec![cat]);
        assert_eq!(index.subjects_with_object(likes, dog).to_vec(), {
            let mut v = vec![cat, dog];
            v.sort_unstable();
            v
        });

        // unknown ids and predicates yield empty lists, not errors
        assert!(index.subjects_of(0).is_empty());
        assert!(index.objects_of(99).is_empty());
        assert!(index.objects_with_subject(eats, 0).is_empty());
        assert!(index.objects_with_subject(eats, 9999).is_empty());
        assert_eq!(index.size_objects_with_subject(likes, fish), 0);
        Ok(())
    }

    #[test]
    fn sets_and_adjacency_are_strictly_sorted() -> color_eyre::Result<()> {
        init();
        let index = build_and_open(ZOO, 1)?;
        for pid in 1..=index.dict().predicate_cnt() {
            assert!(strictly_increasing(&index.subjects_of(pid)), "subject set of {pid}");
            assert!(strictly_increasing(&index.objects_of(pid)), "object set of {pid}");
            for s in index.subjects_of(pid).iter() {
                assert!(
                    strictly_increasing(&index.objects_with_subject(pid, s)),
                    "objects of ({s}, {pid})"
                );
            }
            for o in index.objects_of(pid).iter() {
                assert!(
                    strictly_increasing(&index.subjects_with_object(pid, o)),
                    "subjects of ({pid}, {o})"
                );
            }
        }
        Ok(())
    }

    /// Enumerating every predicate and its per-subject objects reconstructs the
    /// deduplicated input, in both directions.
    #[test]
    fn coverage_reconstructs_input() -> color_eyre::Result<()> {
        init();
        let index = build_and_open(ZOO, 2)?;
        let dict = index.dict();
        let expected: BTreeSet<(String, String, String)> = ZOO
            .iter()
            .map(|line| {
                let mut parts = line.split_whitespace();
                (
                    parts.next().unwrap().to_owned(),
                    parts.next().unwrap().to_owned(),
                    parts.next().unwrap().to_owned(),
                )
            })
            .collect();

        let mut forward = BTreeSet::new();
        let mut backward = BTreeSet::new();
        for pid in 1..=dict.predicate_cnt() {
            let p = dict.id_to_string(pid, TermRole::Predicate)?.to_owned();
            for s in index.subjects_of(pid).iter() {
                for o in index.objects_with_subject(pid, s).iter() {
                    forward.insert((
                        dict.id_to_string(s, TermRole::Subject)?.to_owned(),
                        p.clone(),
                        dict.id_to_string(o, TermRole::Object)?.to_owned(),
                    ));
                }
            }
            for o in index.objects_of(pid).iter() {
                for s in index.subjects_with_object(pid, o).iter() {
                    backward.insert((
                        dict.id_to_string(s, TermRole::Subject)?.to_owned(),
                        p.clone(),
                        dict.id_to_string(o, TermRole::Object)?.to_owned(),
                    ));
                }
            }
        }
        assert_eq!(forward, expected);
        assert_eq!(backward, expected);
        Ok(())
    }

    #[test]
    fn triple_count_matches_dict_info() -> color_eyre::Result<()> {
        init();
        let index = build_and_open(ZOO, 1)?;
        // every input line counts, duplicates included
        assert_eq!(index.dict().triple_cnt(), ZOO.len() as u32);
        Ok(())
    }

    /// The parallel build produces the same probe results as the serial one.
    #[test]
    fn parallel_build_is_equivalent() -> color_eyre::Result<()> {
        init();
        let lines: Vec<String> = (0..60)
            .map(|i| format!("<s{}> <p{}> <o{}> .", i % 12, i % 3, (i * 7) % 20))
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let serial = build_and_open(&refs, 1)?;
        let parallel = build_and_open(&refs, 4)?;
        for pid in 1..=serial.dict().predicate_cnt() {
            let p = serial.dict().id_to_string(pid, TermRole::Predicate)?;
            let parallel_pid = parallel.string_to_id(p, TermRole::Predicate);
            assert_eq!(
                serial.subjects_of(pid).len(),
                parallel.subjects_of(parallel_pid).len()
            );
            for s in serial.subjects_of(pid).iter() {
                let term = serial.dict().id_to_string(s, TermRole::Subject)?;
                let mut objects = BTreeSet::new();
                for o in serial.objects_with_subject(pid, s).iter() {
                    objects.insert(serial.dict().id_to_string(o, TermRole::Object)?.to_owned());
                }
                let other_s = parallel.string_to_id(term, TermRole::Subject);
                let mut other = BTreeSet::new();
                for o in parallel.objects_with_subject(parallel_pid, other_s).iter() {
                    other.insert(parallel.dict().id_to_string(o, TermRole::Object)?.to_owned());
                }
                assert_eq!(objects, other, "objects of ({term}, {p})");
            }
        }
        Ok(())
    }
}
