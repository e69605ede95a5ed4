//! Four-partition term dictionary: shared, subject-only, object-only, predicate.
//!
//! Entity ids form one space laid out shared-first: shared terms get
//! `1..=shared`, subject-only terms `shared+1..=shared+subjects` and
//! object-only terms the block after that, so a term's role is inferable from
//! its id alone. Predicates live in their own space starting at 1. Term text
//! is persisted one term per line: predicates unsharded in id order, each
//! entity partition split over six shard files keyed by `id % 6` so loading
//! parallelises.
use log::{debug, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// Number of term files per entity partition.
pub const SHARD_COUNT: u32 = 6;

/// Encoded triples grouped by predicate: `pid -> [(subject id, object id)]`.
pub type Pso = HashMap<u32, Vec<(u32, u32)>>;

/// Position of a term in a triple, used to pick the partition for lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRole {
    Subject,
    Predicate,
    Object,
}

/// The error type for building and loading the dictionary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed count on line {line} of dict_info: {text:?}")]
    DictInfo { line: usize, text: String },
    #[error("line {line} of the input has fewer than three terms: {text:?}")]
    MalformedTriple { line: usize, text: String },
    #[error("term shard {path} holds more terms than dict_info declares")]
    OversizedShard { path: PathBuf },
}

/// Extraction failure: the id does not exist in the partition the role selects.
#[derive(Error, Debug)]
#[error("no {role:?} term with id {id}")]
pub struct ExtractError {
    pub id: u32,
    pub role: TermRole,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io { path: path.to_path_buf(), source }
}

/// Two-way mapping between term text and ids, immutable once built or loaded.
#[derive(Debug, Default)]
pub struct Dictionary {
    subject_cnt: u32,
    predicate_cnt: u32,
    object_cnt: u32,
    shared_cnt: u32,
    triple_cnt: u32,
    // id -> term, index 0 unused so ids index directly
    shared_terms: Vec<String>,
    subject_terms: Vec<String>,
    object_terms: Vec<String>,
    predicate_terms: Vec<String>,
    // term -> id within the partition (entity ids stored without the block offset)
    shared_ids: HashMap<String, u32>,
    subject_ids: HashMap<String, u32>,
    object_ids: HashMap<String, u32>,
    predicate_ids: HashMap<String, u32>,
}

impl Dictionary {
    /// Number of terms seen only in subject position.
    pub const fn subject_cnt(&self) -> u32 {
        self.subject_cnt
    }

    pub const fn predicate_cnt(&self) -> u32 {
        self.predicate_cnt
    }

    /// Number of terms seen only in object position.
    pub const fn object_cnt(&self) -> u32 {
        self.object_cnt
    }

    /// Number of terms seen in both subject and object position.
    pub const fn shared_cnt(&self) -> u32 {
        self.shared_cnt
    }

    /// Number of input lines, duplicates included.
    pub const fn triple_cnt(&self) -> u32 {
        self.triple_cnt
    }

    /// Largest entity id; the entity space is `1..=max_entity_id`.
    pub const fn max_entity_id(&self) -> u32 {
        self.shared_cnt + self.subject_cnt + self.object_cnt
    }

    /// Id for a term in the given role, or the sentinel `0` when unknown.
    pub fn string_to_id(&self, term: &str, role: TermRole) -> u32 {
        match role {
            TermRole::Predicate => self.predicate_ids.get(term).copied().unwrap_or(0),
            TermRole::Subject => self.entity_id(term, &self.subject_ids, self.shared_cnt),
            TermRole::Object => {
                self.entity_id(term, &self.object_ids, self.shared_cnt + self.subject_cnt)
            }
        }
    }

    fn entity_id(&self, term: &str, partition: &HashMap<String, u32>, block_start: u32) -> u32 {
        if let Some(&id) = self.shared_ids.get(term) {
            return id;
        }
        partition.get(term).map_or(0, |&id| block_start + id)
    }

    /// Term text for an id in the given role.
    pub fn id_to_string(&self, id: u32, role: TermRole) -> core::result::Result<&str, ExtractError> {
        let err = ExtractError { id, role };
        if id == 0 {
            return Err(err);
        }
        let (terms, index) = match role {
            TermRole::Predicate => (&self.predicate_terms, id),
            _ if id <= self.shared_cnt => (&self.shared_terms, id),
            TermRole::Subject => (&self.subject_terms, id - self.shared_cnt),
            TermRole::Object => (&self.object_terms, id - self.shared_cnt - self.subject_cnt),
        };
        terms.get(index as usize).map(String::as_str).ok_or(err)
    }

    /// Stream the `s p o .` input, assign ids and write the term files.
    ///
    /// Roles are only fully known after the whole input has been seen, so ids
    /// are assigned provisionally during the scan and remapped to the
    /// shared-first layout before the encoded stream is returned.
    pub fn encode(dict_dir: &Path, rdf_path: &Path) -> Result<(Self, Pso)> {
        let timer = std::time::Instant::now();
        let mut encoder = Encoder::default();
        let file = File::open(rdf_path).map_err(io_err(rdf_path))?;
        let mut pso = Pso::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(io_err(rdf_path))?;
            let Some((s, p, o)) = split_triple(&line) else {
                if line.trim().is_empty() {
                    continue;
                }
                return Err(Error::MalformedTriple { line: number + 1, text: line });
            };
            let (sid, oid, pid) = encoder.observe(s, p, o);
            pso.entry(pid).or_default().push((sid, oid));
            encoder.triple_cnt += 1;
            if encoder.triple_cnt % 1_000_000 == 0 {
                debug!("encoded {} triples", encoder.triple_cnt);
            }
        }
        let dict = encoder.reassign(dict_dir, &mut pso)?;
        info!(
            "dictionary: {} shared, {} subject, {} object, {} predicate terms, {} triples in {:?}",
            dict.shared_cnt,
            dict.subject_cnt,
            dict.object_cnt,
            dict.predicate_cnt,
            dict.triple_cnt,
            timer.elapsed()
        );
        Ok((dict, pso))
    }

    /// Load a previously written dictionary, reading the shard files concurrently.
    pub fn load(dict_dir: &Path) -> Result<Self> {
        let info_path = dict_dir.join("dict_info");
        let info = std::fs::read_to_string(&info_path).map_err(io_err(&info_path))?;
        let mut counts = [0u32; 5];
        let mut lines = info.lines();
        for (i, count) in counts.iter_mut().enumerate() {
            let text = lines.next().unwrap_or("");
            *count = text
                .trim()
                .parse()
                .map_err(|_| Error::DictInfo { line: i + 1, text: text.to_owned() })?;
        }
        let [subject_cnt, predicate_cnt, object_cnt, shared_cnt, triple_cnt] = counts;

        let predicates_path = dict_dir.join("predicates");
        let (predicate_terms, predicate_ids) =
            load_unsharded(&predicates_path, predicate_cnt as usize)?;
        let [subjects, objects, shared] = thread::scope(|scope| {
            [("subjects", subject_cnt), ("objects", object_cnt), ("shared", shared_cnt)]
                .map(|(name, cnt)| {
                    let dir = dict_dir.join(name);
                    scope.spawn(move || load_sharded(&dir, cnt as usize))
                })
                .map(|handle| handle.join().expect("dictionary shard loader panicked"))
        });
        let (subject_terms, subject_ids) = subjects?;
        let (object_terms, object_ids) = objects?;
        let (shared_terms, shared_ids) = shared?;

        Ok(Dictionary {
            subject_cnt,
            predicate_cnt,
            object_cnt,
            shared_cnt,
            triple_cnt,
            shared_terms,
            subject_terms,
            object_terms,
            predicate_terms,
            shared_ids,
            subject_ids,
            object_ids,
            predicate_ids,
        })
    }
}

/// Split one input line into its three terms.
/// The object may contain whitespace; the trailing `.` and padding are stripped.
fn split_triple(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim_end();
    let line = line.strip_suffix('.').unwrap_or(line).trim_end();
    let (s, rest) = line.split_once(|c: char| c.is_ascii_whitespace())?;
    let (p, o) = rest.trim_start().split_once(|c: char| c.is_ascii_whitespace())?;
    let o = o.trim_start();
    if s.is_empty() || p.is_empty() || o.is_empty() {
        return None;
    }
    Some((s, p, o))
}

/// Build-time state: provisional entity ids plus the role each term was seen in so far.
#[derive(Default)]
struct Encoder {
    subjects: HashMap<String, u32>,
    objects: HashMap<String, u32>,
    shared: HashMap<String, u32>,
    predicates: HashMap<String, u32>,
    next_entity_id: u32,
    triple_cnt: u32,
}

impl Encoder {
    fn observe(&mut self, s: &str, p: &str, o: &str) -> (u32, u32, u32) {
        let sid = Self::entity(&mut self.subjects, &mut self.objects, &mut self.shared, s, &mut self.next_entity_id);
        let oid = Self::entity(&mut self.objects, &mut self.subjects, &mut self.shared, o, &mut self.next_entity_id);
        let next_pid = self.predicates.len() as u32 + 1;
        let pid = *self.predicates.entry(p.to_owned()).or_insert(next_pid);
        (sid, oid, pid)
    }

    /// A term seen in the other role before moves to the shared partition and keeps its id.
    fn entity(
        own: &mut HashMap<String, u32>, other: &mut HashMap<String, u32>,
        shared: &mut HashMap<String, u32>, term: &str, next_id: &mut u32,
    ) -> u32 {
        if let Some(&id) = shared.get(term) {
            return id;
        }
        if let Some(id) = other.remove(term) {
            shared.insert(term.to_owned(), id);
            return id;
        }
        if let Some(&id) = own.get(term) {
            return id;
        }
        *next_id += 1;
        own.insert(term.to_owned(), *next_id);
        *next_id
    }

    /// Assign final ids in the shared-first layout, rewrite the encoded stream
    /// and persist the term files. Terms are processed in provisional-id order
    /// so the same input always produces the same layout.
    fn reassign(self, dict_dir: &Path, pso: &mut Pso) -> Result<Dictionary> {
        for sub in ["subjects", "objects", "shared"] {
            let dir = dict_dir.join(sub);
            std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        }

        let (shared_terms, shared_ids, shared_remap) =
            write_partition(&dict_dir.join("shared"), self.shared)?;
        let (subject_terms, subject_ids, subject_remap) =
            write_partition(&dict_dir.join("subjects"), self.subjects)?;
        let (object_terms, object_ids, object_remap) =
            write_partition(&dict_dir.join("objects"), self.objects)?;

        let shared_cnt = shared_terms.len() as u32 - 1;
        let subject_cnt = subject_terms.len() as u32 - 1;
        let object_cnt = object_terms.len() as u32 - 1;
        let predicate_cnt = self.predicates.len() as u32;

        // predicates keep their ids and go into one file in id order
        let mut predicate_terms = vec![String::new(); predicate_cnt as usize + 1];
        let mut predicate_ids = HashMap::with_capacity(self.predicates.len());
        for (term, id) in self.predicates {
            predicate_terms[id as usize] = term.clone();
            predicate_ids.insert(term, id);
        }
        let predicates_path = dict_dir.join("predicates");
        let mut out = BufWriter::new(File::create(&predicates_path).map_err(io_err(&predicates_path))?);
        for term in &predicate_terms[1..] {
            writeln!(out, "{term}").map_err(io_err(&predicates_path))?;
        }
        out.flush().map_err(io_err(&predicates_path))?;

        // rewrite the encoded pairs from provisional to final ids
        for pairs in pso.values_mut() {
            for (s, o) in pairs.iter_mut() {
                *s = match shared_remap.get(s) {
                    Some(&id) => id,
                    None => shared_cnt + subject_remap[s],
                };
                *o = match shared_remap.get(o) {
                    Some(&id) => id,
                    None => shared_cnt + subject_cnt + object_remap[o],
                };
            }
        }

        let info_path = dict_dir.join("dict_info");
        let mut info = BufWriter::new(File::create(&info_path).map_err(io_err(&info_path))?);
        for count in [subject_cnt, predicate_cnt, object_cnt, shared_cnt, self.triple_cnt] {
            writeln!(info, "{count}").map_err(io_err(&info_path))?;
        }
        info.flush().map_err(io_err(&info_path))?;

        Ok(Dictionary {
            subject_cnt,
            predicate_cnt,
            object_cnt,
            shared_cnt,
            triple_cnt: self.triple_cnt,
            shared_terms,
            subject_terms,
            object_terms,
            predicate_terms,
            shared_ids,
            subject_ids,
            object_ids,
            predicate_ids,
        })
    }
}

type Partition = (Vec<String>, HashMap<String, u32>, HashMap<u32, u32>);

/// Write one entity partition into its six shard files and return the final
/// tables plus the provisional-to-final remap.
fn write_partition(dir: &Path, provisional: HashMap<String, u32>) -> Result<Partition> {
    let mut entries: Vec<(String, u32)> = provisional.into_iter().collect();
    entries.sort_unstable_by_key(|(_, provisional_id)| *provisional_id);

    let mut shards = Vec::with_capacity(SHARD_COUNT as usize);
    for shard in 0..SHARD_COUNT {
        let path = dir.join(shard.to_string());
        shards.push(BufWriter::new(File::create(&path).map_err(io_err(&path))?));
    }

    let mut terms = vec![String::new()];
    let mut ids = HashMap::with_capacity(entries.len());
    let mut remap = HashMap::with_capacity(entries.len());
    for (new_id, (term, provisional_id)) in (1u32..).zip(entries) {
        let shard = (new_id % SHARD_COUNT) as usize;
        writeln!(shards[shard], "{term}").map_err(io_err(dir))?;
        remap.insert(provisional_id, new_id);
        ids.insert(term.clone(), new_id);
        terms.push(term);
    }
    for mut shard in shards {
        shard.flush().map_err(io_err(dir))?;
    }
    Ok((terms, ids, remap))
}

fn load_unsharded(path: &Path, cnt: usize) -> Result<(Vec<String>, HashMap<String, u32>)> {
    let file = File::open(path).map_err(io_err(path))?;
    let mut terms = Vec::with_capacity(cnt + 1);
    terms.push(String::new());
    let mut ids = HashMap::with_capacity(cnt);
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let term = line.map_err(io_err(path))?;
        if i >= cnt {
            return Err(Error::OversizedShard { path: path.to_path_buf() });
        }
        ids.insert(term.clone(), i as u32 + 1);
        terms.push(term);
    }
    Ok((terms, ids))
}

/// Read the six shards of one partition concurrently.
/// Shard `k` holds ids congruent to `k` modulo six in ascending order.
fn load_sharded(dir: &Path, cnt: usize) -> Result<(Vec<String>, HashMap<String, u32>)> {
    let shard_lines = thread::scope(|scope| {
        let handles: Vec<_> = (0..SHARD_COUNT)
            .map(|shard| {
                let path = dir.join(shard.to_string());
                scope.spawn(move || -> Result<Vec<String>> {
                    let file = File::open(&path).map_err(io_err(&path))?;
                    BufReader::new(file).lines().map(|l| l.map_err(io_err(&path))).collect()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("dictionary shard loader panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    let mut terms = vec![String::new(); cnt + 1];
    let mut ids = HashMap::with_capacity(cnt);
    for (shard, lines) in shard_lines.into_iter().enumerate() {
        let first_id = if shard == 0 { SHARD_COUNT } else { shard as u32 };
        for (term, id) in lines.into_iter().zip((first_id..).step_by(SHARD_COUNT as usize)) {
            if id as usize > cnt {
                return Err(Error::OversizedShard { path: dir.join(shard.to_string()) });
            }
            ids.insert(term.clone(), id);
            terms[id as usize] = term;
        }
    }
    Ok((terms, ids))
}
