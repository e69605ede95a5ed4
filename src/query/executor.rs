//! Backtracking depth-first execution of a query plan.
use super::leapfrog_join;
use super::plan::{Item, ItemType, QueryPlan};
use crate::containers::IdList;
use crate::index::IndexRetriever;
use std::collections::HashMap;

/// Walks the variable levels depth first, intersecting each level's ranges and
/// probing the index to fill two-variable placeholders on the way down.
/// Owns every piece of per-query state; the shared retriever is only read.
pub struct QueryExecutor<'a> {
    index: &'a IndexRetriever,
    plan: &'a QueryPlan,
    /// Level items, copied so placeholder ranges can be filled in place.
    levels: Vec<Vec<Item>>,
    level: usize,
    at_end: bool,
    /// Next unconsumed position in each level's candidate list.
    cursors: Vec<usize>,
    candidates: Vec<Vec<u32>>,
    tuple: Vec<u32>,
    results: Vec<Vec<u32>>,
    /// Intersections precomputed for levels without prestored or pending
    /// ranges, keyed by the participating ranges' identities.
    pre_join: HashMap<Vec<u32>, Vec<u32>>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(index: &'a IndexRetriever, plan: &'a QueryPlan) -> Self {
        let n = plan.num_levels();
        QueryExecutor {
            index,
            plan,
            levels: plan.levels.clone(),
            level: 0,
            at_end: false,
            cursors: vec![0; n],
            candidates: vec![Vec::new(); n],
            tuple: vec![0; n],
            results: Vec::new(),
            pre_join: HashMap::new(),
        }
    }

    /// Run to completion and return the tuples in lexicographic level order.
    pub fn run(mut self) -> Vec<Vec<u32>> {
        let n = self.plan.num_levels();
        if n == 0 || self.plan.unsatisfiable {
            return Vec::new();
        }
        self.compute_pre_join();
        self.descend(0);
        loop {
            if self.at_end {
                if self.level == 0 {
                    break;
                }
                self.retreat();
                self.advance();
            } else if self.level == n - 1 {
                self.results.push(self.tuple.clone());
                if self.results.len() >= self.plan.limit {
                    break;
                }
                self.advance();
            } else {
                self.descend(self.level + 1);
            }
        }
        self.results
    }

    /// Intersect ahead of time wherever a level's candidates cannot depend on
    /// earlier bindings: every item pre-fetched, nothing prestored. Repeated
    /// visits to such a level reuse the intersection instead of recomputing.
    fn compute_pre_join(&mut self) {
        for level in 1..self.plan.num_levels() {
            if !self.plan.pending[level].is_empty() || !self.plan.prestored[level].is_empty() {
                continue;
            }
            let ranges: Vec<IdList> = self.plan.probes[level]
                .iter()
                .map(|&i| self.levels[level][i].range.clone())
                .collect();
            if ranges.len() > 1 {
                self.pre_join.insert(self.cache_key(level), leapfrog_join(&ranges));
            }
        }
    }

    fn cache_key(&self, level: usize) -> Vec<u32> {
        self.plan.probes[level].iter().map(|&i| self.levels[level][i].range_id).collect()
    }

    /// Enter `level`: compute its candidates if empty, then bind the first
    /// acceptable one.
    fn descend(&mut self, level: usize) {
        self.level = level;
        if self.candidates[level].is_empty() {
            self.enumerate();
            if self.at_end {
                return;
            }
        }
        self.advance();
    }

    /// Pop back one level, clearing the abandoned level's state.
    fn retreat(&mut self) {
        self.candidates[self.level].clear();
        self.cursors[self.level] = 0;
        self.level -= 1;
        self.at_end = false;
    }

    /// Compute the current level's candidates: the intersection of its
    /// prestored and filled pending ranges, or of its pre-fetched probe ranges
    /// when it has neither.
    fn enumerate(&mut self) {
        let level = self.level;
        let mut ranges: Vec<IdList> = Vec::new();
        for range in &self.plan.prestored[level] {
            if range.is_empty() {
                self.at_end = true;
                return;
            }
            ranges.push(range.clone());
        }
        for &i in &self.plan.pending[level] {
            ranges.push(self.levels[level][i].range.clone());
        }

        self.candidates[level] = match ranges.len() {
            0 => {
                let key = self.cache_key(level);
                match self.pre_join.get(&key) {
                    Some(cached) => cached.clone(),
                    None => {
                        let ranges: Vec<IdList> = self.plan.probes[level]
                            .iter()
                            .map(|&i| self.levels[level][i].range.clone())
                            .collect();
                        match ranges.len() {
                            1 => ranges[0].to_vec(),
                            _ => leapfrog_join(&ranges),
                        }
                    }
                }
            }
            1 => ranges[0].to_vec(),
            _ => leapfrog_join(&ranges),
        };
        if self.candidates[level].is_empty() {
            self.at_end = true;
        }
    }

    /// Bind the next candidate at the current level. A candidate is accepted
    /// once every probe item found a non-empty range for it; rejected values
    /// are skipped and exhaustion sets `at_end`.
    fn advance(&mut self) {
        loop {
            let level = self.level;
            let at = self.cursors[level];
            let Some(&value) = self.candidates[level].get(at) else {
                self.at_end = true;
                return;
            };
            self.cursors[level] = at + 1;
            if self.plan.probes[level].is_empty() || self.fill_partners(value) {
                self.tuple[level] = value;
                return;
            }
        }
    }

    /// Probe the index for each Ps/Po item at the current level and install
    /// the results into the partner placeholders at later levels. Returns
    /// whether every probe produced at least one id.
    fn fill_partners(&mut self, value: u32) -> bool {
        let mut accepted = true;
        for at in 0..self.levels[self.level].len() {
            let item = &self.levels[self.level][at];
            let range = match item.item_type {
                ItemType::Ps => self.index.subjects_with_object(item.predicate, value),
                ItemType::Po => self.index.objects_with_subject(item.predicate, value),
                ItemType::Pending => continue,
            };
            let Some((partner_level, partner_at)) = item.partner else { continue };
            if range.is_empty() {
                accepted = false;
            }
            self.levels[partner_level][partner_at].range = range;
        }
        accepted
    }
}
