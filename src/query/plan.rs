//! Lowers a basic graph pattern into a variable-ordered join plan.
use crate::containers::IdList;
use crate::dictionary::TermRole;
use crate::index::IndexRetriever;
use crate::sparql::{Query, Term, TriplePattern};
use log::debug;
use std::collections::HashMap;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, PlanError>;

/// The error type for query planning.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("variable {0} is not bound by any evaluable triple pattern")]
    UnboundVariable(String),
}

/// What a plan item contributes at its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// This level binds an object; probing `subjects_with_object(p, o)` fills
    /// the partner slot of the pattern's subject variable.
    Ps,
    /// This level binds a subject; probing `objects_with_subject(p, s)` fills
    /// the partner slot of the pattern's object variable.
    Po,
    /// Placeholder for the later variable of a two-variable pattern; its range
    /// is filled while the earlier variable's level advances.
    Pending,
}

/// One entry in a level's item list.
#[derive(Debug, Clone)]
pub struct Item {
    pub item_type: ItemType,
    pub predicate: u32,
    /// Pre-fetched predicate set for `Ps`/`Po`; filled at run time for `Pending`.
    pub range: IdList,
    /// Identity of `range` for pre-join cache keys.
    pub range_id: u32,
    /// `(level, item index)` of the partner placeholder this item fills.
    pub partner: Option<(usize, usize)>,
}

/// The join plan: a variable order and, per level, plan items plus the
/// prestored ranges contributed by one-variable patterns.
#[derive(Debug)]
pub struct QueryPlan {
    /// Variable names in level order.
    pub variables: Vec<String>,
    pub levels: Vec<Vec<Item>>,
    pub prestored: Vec<Vec<IdList>>,
    /// Per level, indices of the `Pending` items.
    pub pending: Vec<Vec<usize>>,
    /// Per level, indices of the `Ps`/`Po` items.
    pub probes: Vec<Vec<usize>>,
    pub limit: usize,
    /// A fully-ground pattern was absent from the index; the query has no rows.
    pub unsatisfiable: bool,
    var_level: HashMap<String, usize>,
}

impl QueryPlan {
    pub fn new(index: &IndexRetriever, query: &Query) -> Result<QueryPlan> {
        let order = variable_order(index, &query.patterns);
        let var_level: HashMap<String, usize> =
            order.iter().enumerate().map(|(level, name)| (name.clone(), level)).collect();

        let n = order.len();
        let mut plan = QueryPlan {
            variables: order,
            levels: vec![Vec::new(); n],
            prestored: vec![Vec::new(); n],
            pending: vec![Vec::new(); n],
            probes: vec![Vec::new(); n],
            limit: query.limit,
            unsatisfiable: false,
            var_level,
        };

        let mut range_id = 0u32;
        let mut next_range_id = || {
            range_id += 1;
            range_id
        };

        for pattern in &query.patterns {
            if pattern.predicate.is_variable() {
                // unsupported; the pattern contributes nothing (its variables
                // may still be bound elsewhere)
                continue;
            }
            let pid = index.string_to_id(pattern.predicate.text(), TermRole::Predicate);
            match (&pattern.subject, &pattern.object) {
                (Term::Variable(s), Term::Variable(o)) => {
                    let lev_s = plan.var_level[s];
                    let lev_o = plan.var_level[o];
                    if lev_s < lev_o {
                        // bind subjects first, fill the object slot by probe
                        let slot = plan.push_pending(lev_o, pid);
                        plan.push_probe(
                            lev_s,
                            ItemType::Po,
                            pid,
                            index.subjects_of(pid),
                            next_range_id(),
                            slot,
                        );
                    } else {
                        let slot = plan.push_pending(lev_s, pid);
                        plan.push_probe(
                            lev_o,
                            ItemType::Ps,
                            pid,
                            index.objects_of(pid),
                            next_range_id(),
                            slot,
                        );
                    }
                }
                (Term::Variable(s), object) => {
                    let oid = index.string_to_id(object.text(), TermRole::Object);
                    let lev = plan.var_level[s];
                    next_range_id();
                    plan.prestored[lev].push(index.subjects_with_object(pid, oid));
                }
                (subject, Term::Variable(o)) => {
                    let sid = index.string_to_id(subject.text(), TermRole::Subject);
                    let lev = plan.var_level[o];
                    next_range_id();
                    plan.prestored[lev].push(index.objects_with_subject(pid, sid));
                }
                (subject, object) => {
                    // no variable at all: the pattern is a plain existence check
                    let sid = index.string_to_id(subject.text(), TermRole::Subject);
                    let oid = index.string_to_id(object.text(), TermRole::Object);
                    if !index.objects_with_subject(pid, sid).contains(oid) {
                        plan.unsatisfiable = true;
                    }
                }
            }
        }

        // a variable whose every occurrence sits in a skipped pattern got no
        // prestored range and no item; executing its level would silently
        // empty the whole query, so reject the plan instead
        for (level, name) in plan.variables.iter().enumerate() {
            if plan.levels[level].is_empty() && plan.prestored[level].is_empty() {
                return Err(PlanError::UnboundVariable(name.clone()));
            }
        }
        debug!("variable order {:?}", plan.variables);
        Ok(plan)
    }

    fn push_pending(&mut self, level: usize, predicate: u32) -> (usize, usize) {
        self.levels[level].push(Item {
            item_type: ItemType::Pending,
            predicate,
            range: IdList::empty(),
            range_id: 0,
            partner: None,
        });
        let index = self.levels[level].len() - 1;
        self.pending[level].push(index);
        (level, index)
    }

    fn push_probe(
        &mut self, level: usize, item_type: ItemType, predicate: u32, range: IdList, range_id: u32,
        partner: (usize, usize),
    ) {
        self.levels[level].push(Item { item_type, predicate, range, range_id, partner: Some(partner) });
        self.probes[level].push(self.levels[level].len() - 1);
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Map projected variable names to their level and the dictionary role to
    /// decode with. The role comes from any occurrence in a planned pattern; a
    /// variable bound from both directions only ever holds shared ids, for
    /// which both partitions decode identically.
    pub fn mapping_variables(
        &self, names: &[String], patterns: &[TriplePattern],
    ) -> Result<Vec<(usize, TermRole)>> {
        names
            .iter()
            .map(|name| {
                let level = *self
                    .var_level
                    .get(name)
                    .ok_or_else(|| PlanError::UnboundVariable(name.clone()))?;
                let role = patterns
                    .iter()
                    // skipped patterns bind nothing, so they cannot supply a role
                    .filter(|pattern| !pattern.predicate.is_variable())
                    .find_map(|pattern| {
                        if matches!(&pattern.subject, Term::Variable(v) if v == name) {
                            Some(TermRole::Subject)
                        } else if matches!(&pattern.object, Term::Variable(v) if v == name) {
                            Some(TermRole::Object)
                        } else {
                            None
                        }
                    })
                    .ok_or_else(|| PlanError::UnboundVariable(name.clone()))?;
                Ok((level, role))
            })
            .collect()
    }
}

/// Order variables by descending occurrence count, then descending count of
/// one-variable patterns containing them, then ascending size of the smallest
/// index range any pattern offers them. Remaining ties keep first-appearance
/// order, so planning the same patterns twice gives the same order.
fn variable_order<'p>(index: &IndexRetriever, patterns: &'p [TriplePattern]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut occurrences: HashMap<&'p str, usize> = HashMap::new();
    let mut single: HashMap<&'p str, usize> = HashMap::new();
    let mut min_range: HashMap<&'p str, usize> = HashMap::new();

    for pattern in patterns {
        let vars: Vec<&str> = pattern.variables().collect();
        for &name in &vars {
            if !occurrences.contains_key(name) {
                order.push(name.to_owned());
            }
            *occurrences.entry(name).or_insert(0) += 1;
            if vars.len() == 1 {
                *single.entry(name).or_insert(0) += 1;
            }
        }
        if pattern.predicate.is_variable() {
            continue;
        }
        let pid = index.string_to_id(pattern.predicate.text(), TermRole::Predicate);
        let mut shrink = |name: &'p str, size: usize| {
            min_range
                .entry(name)
                .and_modify(|current| *current = (*current).min(size))
                .or_insert(size);
        };
        match (&pattern.subject, &pattern.object) {
            (Term::Variable(s), Term::Variable(o)) => {
                shrink(s, index.size_subjects_of(pid));
                shrink(o, index.size_objects_of(pid));
            }
            (Term::Variable(s), object) => {
                let oid = index.string_to_id(object.text(), TermRole::Object);
                shrink(s, index.size_subjects_with_object(pid, oid));
            }
            (subject, Term::Variable(o)) => {
                let sid = index.string_to_id(subject.text(), TermRole::Subject);
                shrink(o, index.size_objects_with_subject(pid, sid));
            }
            _ => {}
        }
    }

    order.sort_by(|a, b| {
        let key = |name: &str| {
            (
                std::cmp::Reverse(occurrences.get(name).copied().unwrap_or(0)),
                std::cmp::Reverse(single.get(name).copied().unwrap_or(0)),
                min_range.get(name).copied().unwrap_or(usize::MAX),
            )
        };
        key(a).cmp(&key(b))
    });
    order
}
