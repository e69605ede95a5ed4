//! Top-level store: build a database from a triples file, open it, run queries.
use crate::dictionary::Dictionary;
use crate::index::{IndexBuilder, IndexRetriever};
use crate::query::results::materialise;
use crate::query::{QueryExecutor, QueryOutput, QueryPlan};
use crate::{dictionary, index, query, sparql};
use log::{debug, info};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// The error type for store operations, covering the taxonomy of §7: I/O and
/// missing databases are fatal to the operation, parse and plan failures leave
/// the store usable, unknown query constants are not errors at all (the query
/// just has no solutions).
#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dictionary error")]
    Dictionary(#[from] dictionary::Error),
    #[error("index error")]
    Index(#[from] index::Error),
    #[error("parse error: {0}")]
    Parse(#[from] sparql::ParseError),
    #[error("plan error: {0}")]
    Plan(#[from] query::PlanError),
    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

/// One opened database. Read-only; safe to share across threads once opened.
pub struct Store {
    retriever: IndexRetriever,
}

impl Store {
    /// Build the database `name` under `data_dir` from a file of
    /// whitespace-separated `s p o .` lines, overwriting any previous build.
    pub fn create(data_dir: &Path, name: &str, rdf_path: &Path, threads: usize) -> Result<()> {
        let timer = std::time::Instant::now();
        let db_dir = data_dir.join(name);
        std::fs::create_dir_all(&db_dir)
            .map_err(|source| Error::Io { path: db_dir.clone(), source })?;
        let (dict, pso) = Dictionary::encode(&db_dir.join("dictionary"), rdf_path)?;
        IndexBuilder::new(db_dir.join("index"), &dict, threads).build(&pso)?;
        info!("created database {name} in {:?}", timer.elapsed());
        Ok(())
    }

    /// Open the database `name` under `data_dir` for querying.
    pub fn open(data_dir: &Path, name: &str) -> Result<Store> {
        Ok(Store { retriever: IndexRetriever::open(&data_dir.join(name))? })
    }

    /// Number of triples in the database, duplicates in the input included.
    pub fn triple_cnt(&self) -> u32 {
        self.retriever.dict().triple_cnt()
    }

    /// Parse, plan, execute and decode one SPARQL query.
    ///
    /// OPTIONAL and FILTER parse but fail here explicitly instead of being
    /// silently mis-evaluated. Patterns with a variable in predicate position
    /// are unsupported: a query consisting only of such patterns is rejected
    /// here, and one that leaves any variable bound by nothing else fails
    /// planning.
    pub fn query(&self, sparql: &str) -> Result<QueryOutput> {
        let timer = std::time::Instant::now();
        let query = sparql::parse(sparql)?;
        if !query.filters.is_empty() {
            return Err(Error::Unsupported("FILTER evaluation"));
        }
        if query.patterns.iter().any(|pattern| pattern.optional) {
            return Err(Error::Unsupported("OPTIONAL evaluation"));
        }
        if !query.patterns.is_empty() && query.patterns.iter().all(|p| p.predicate.is_variable()) {
            return Err(Error::Unsupported("a variable in every predicate position"));
        }

        let plan = QueryPlan::new(&self.retriever, &query)?;
        let plan_time = timer.elapsed();
        let tuples = QueryExecutor::new(&self.retriever, &plan).run();
        let execute_time = timer.elapsed() - plan_time;
        let output = materialise(&self.retriever, &plan, &query, tuples)?;
        debug!(
            "{} result(s), plan {plan_time:?}, execute {execute_time:?}, total {:?}",
            output.len(),
            timer.elapsed()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::init;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    /// Build a throwaway database and open it.
    fn store_from(lines: &[String]) -> color_eyre::Result<(TempDir, Store)> {
        let tmp = tempfile::tempdir()?;
        let input = tmp.path().join("input.nt");
        std::fs::write(&input, lines.join("\n"))?;
        Store::create(tmp.path(), "testdb", &input, 1)?;
        let store = Store::open(tmp.path(), "testdb")?;
        Ok((tmp, store))
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    fn rows(store: &Store, sparql: &str) -> color_eyre::Result<Vec<Vec<String>>> {
        Ok(store.query(sparql)?.rows)
    }

    #[test]
    fn singleton_match() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> ."]))?;
        let out = store.query("SELECT ?x WHERE { ?x <p> <b> . }")?;
        assert_eq!(out.variables, vec!["?x"]);
        assert_eq!(out.rows, vec![vec!["<a>".to_owned()]]);
        Ok(())
    }

    #[test]
    fn two_variable_chain() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> .", "<b> <p> <c> ."]))?;
        let got = rows(&store, "SELECT ?x ?z WHERE { ?x <p> ?y . ?y <p> ?z . }")?;
        assert_eq!(got, vec![vec!["<a>".to_owned(), "<c>".to_owned()]]);
        Ok(())
    }

    #[test]
    fn triangles_with_limit() -> color_eyre::Result<()> {
        init();
        // complete graph on {a, b, c} with self edges: 27 (x, y, z) tuples
        let mut input = Vec::new();
        for x in ["<a>", "<b>", "<c>"] {
            for y in ["<a>", "<b>", "<c>"] {
                input.push(format!("{x} <p> {y} ."));
            }
        }
        let (_tmp, store) = store_from(&input)?;
        let all = rows(&store, "SELECT ?x ?y ?z WHERE { ?x <p> ?y . ?y <p> ?z . ?z <p> ?x . }")?;
        assert_eq!(all.len(), 27);
        let limited =
            rows(&store, "SELECT ?x ?y ?z WHERE { ?x <p> ?y . ?y <p> ?z . ?z <p> ?x . } LIMIT 5")?;
        assert_eq!(limited.len(), 5);
        // LIMIT n returns the first n rows of the unlimited run
        assert_eq!(limited, all[..5].to_vec());
        Ok(())
    }

    #[test]
    fn distinct_drops_duplicate_projections() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> .", "<a> <q> <b> ."]))?;
        let got = rows(&store, "SELECT DISTINCT ?x WHERE { ?x <p> <b> . ?x <q> <b> . }")?;
        assert_eq!(got, vec![vec!["<a>".to_owned()]]);
        Ok(())
    }

    #[test]
    fn unknown_constant_yields_zero_rows() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> ."]))?;
        assert_eq!(rows(&store, "SELECT ?x WHERE { ?x <p> <missing> . }")?, Vec::<Vec<String>>::new());
        assert_eq!(rows(&store, "SELECT ?x WHERE { ?x <nope> <b> . }")?, Vec::<Vec<String>>::new());
        Ok(())
    }

    #[test]
    fn empty_intersection() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> .", "<c> <q> <d> ."]))?;
        let got = rows(&store, "SELECT ?x WHERE { ?x <p> ?y . ?x <q> ?y . }")?;
        assert_eq!(got, Vec::<Vec<String>>::new());
        Ok(())
    }

    #[test]
    fn ground_pattern_filters_everything() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> .", "<c> <p> <d> ."]))?;
        // present ground triple: no effect
        let got = rows(&store, "SELECT ?x WHERE { ?x <p> <d> . <a> <p> <b> . }")?;
        assert_eq!(got, vec![vec!["<c>".to_owned()]]);
        // absent ground triple: the whole query is empty
        let got = rows(&store, "SELECT ?x WHERE { ?x <p> <d> . <a> <p> <d> . }")?;
        assert_eq!(got, Vec::<Vec<String>>::new());
        Ok(())
    }

    /// A level whose items are all pre-fetched ranges (no prestored ranges,
    /// no placeholders) is intersected once up front and reused on every
    /// revisit.
    #[test]
    fn independent_fanouts_use_the_precomputed_intersection() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&[
            "<a1> <p> <x1> .",
            "<a1> <q> <x2> .",
            "<a2> <p> <x3> .",
            "<a2> <q> <x4> .",
            "<b> <p> <x5> .", // has <p> but no <q>
            "<c> <r> <y1> .",
            "<c> <s> <y2> .",
            "<d> <r> <y3> .", // has <r> but no <s>
        ]))?;
        let got = rows(
            &store,
            "SELECT ?u ?v WHERE { ?u <p> ?w1 . ?u <q> ?w2 . ?v <r> ?w3 . ?v <s> ?w4 . }",
        )?;
        let expected: BTreeSet<Vec<String>> = [
            vec!["<a1>".to_owned(), "<c>".to_owned()],
            vec!["<a2>".to_owned(), "<c>".to_owned()],
        ]
        .into_iter()
        .collect();
        assert_eq!(got.into_iter().collect::<BTreeSet<_>>(), expected);
        Ok(())
    }

    #[test]
    fn select_star_and_projection_order() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> ."]))?;
        let out = store.query("SELECT * WHERE { ?s <p> ?o . }")?;
        assert_eq!(out.variables, vec!["?o", "?s"]);
        assert_eq!(out.rows, vec![vec!["<b>".to_owned(), "<a>".to_owned()]]);
        Ok(())
    }

    #[test]
    fn unsupported_features_fail_explicitly() -> color_eyre::Result<()> {
        init();
        let (_tmp, store) = store_from(&lines(&["<a> <p> <b> ."]))?;
        assert!(matches!(
            store.query("SELECT ?x WHERE { ?x <p> ?y . FILTER ( ?y = \"b\" ) }"),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            store.query("SELECT ?x WHERE { ?x <p> ?y . OPTIONAL { ?x <q> ?z } }"),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            store.query("SELECT ?x WHERE { ?x ?p <b> . }"),
            Err(Error::Unsupported(_))
        ));
        // mixed case: one pattern is planned, the other is skipped for its
        // variable predicate and leaves ?p and ?y without any binding
        assert!(matches!(
            store.query("SELECT ?x ?y WHERE { ?x ?p ?y . ?x <p> <b> . }"),
            Err(Error::Plan(query::PlanError::UnboundVariable(_)))
        ));
        assert!(matches!(
            store.query("SELECT ?x WHERE { ?x ?p ?y . ?x <p> <b> . }"),
            Err(Error::Plan(query::PlanError::UnboundVariable(_)))
        ));
        assert!(matches!(
            store.query("SELECT ?z WHERE { ?x <p> ?y . }"),
            Err(Error::Plan(query::PlanError::UnboundVariable(_)))
        ));
        assert!(matches!(store.query("SELECT ?x WHERE"), Err(Error::Parse(_))));
        Ok(())
    }

    #[test]
    fn missing_database_is_fatal() -> color_eyre::Result<()> {
        init();
        let tmp = tempfile::tempdir()?;
        assert!(matches!(
            Store::open(tmp.path(), "absent"),
            Err(Error::Index(index::Error::MissingDatabase(_)))
        ));
        Ok(())
    }

    /// Reference evaluation: enumerate the cross product of all triples over
    /// the patterns and keep consistent assignments.
    fn brute_force(
        triples: &[(String, String, String)], patterns: &[(&str, &str, &str)], projection: &[&str],
    ) -> BTreeSet<Vec<String>> {
        fn term_matches<'q>(
            term: &'q str, value: &str, binding: &mut Vec<(&'q str, String)>,
        ) -> bool {
            if !term.starts_with('?') {
                return term == value;
            }
            match binding.iter().find(|(t, _)| *t == term) {
                Some((_, bound)) => bound == value,
                None => {
                    binding.push((term, value.to_owned()));
                    true
                }
            }
        }
        fn solve<'q>(
            triples: &[(String, String, String)], patterns: &[(&'q str, &'q str, &'q str)],
            binding: &mut Vec<(&'q str, String)>, out: &mut Vec<Vec<(&'q str, String)>>,
        ) {
            let Some(&(s, p, o)) = patterns.first() else {
                out.push(binding.clone());
                return;
            };
            for (ts, tp, to) in triples {
                let depth = binding.len();
                if term_matches(s, ts, binding)
                    && term_matches(p, tp, binding)
                    && term_matches(o, to, binding)
                {
                    solve(triples, &patterns[1..], binding, out);
                }
                binding.truncate(depth);
            }
        }
        let mut assignments = Vec::new();
        solve(triples, patterns, &mut Vec::new(), &mut assignments);
        assignments
            .into_iter()
            .map(|binding| {
                projection
                    .iter()
                    .map(|name| {
                        binding
                            .iter()
                            .find(|(t, _)| t == name)
                            .map(|(_, v)| v.clone())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }

    /// Deterministically generated graphs and BGPs of up to four patterns:
    /// the executor's projected DISTINCT result equals the brute-force one.
    #[test]
    fn executor_matches_brute_force() -> color_eyre::Result<()> {
        init();
        let mut state = 0x9e37_79b9u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        for round in 0..12 {
            let entity_cnt = next() % 6 + 2;
            let predicate_cnt = next() % 3 + 1;
            let triple_cnt = next() % 24 + 4;
            let mut triples: BTreeSet<(String, String, String)> = BTreeSet::new();
            for _ in 0..triple_cnt {
                triples.insert((
                    format!("<e{}>", next() % entity_cnt),
                    format!("<p{}>", next() % predicate_cnt),
                    format!("<e{}>", next() % entity_cnt),
                ));
            }
            let triples: Vec<(String, String, String)> = triples.into_iter().collect();
            let input: Vec<String> =
                triples.iter().map(|(s, p, o)| format!("{s} {p} {o} .")).collect();
            let (_tmp, store) = store_from(&input)?;

            let variable_pool = ["?v0", "?v1", "?v2"];
            let pattern_cnt = next() as usize % 4 + 1;
            let mut patterns: Vec<(String, String, String)> = Vec::new();
            for _ in 0..pattern_cnt {
                let subject = variable_pool[next() as usize % variable_pool.len()].to_owned();
                let predicate = format!("<p{}>", next() % predicate_cnt);
                // mix variable and constant objects
                let object = if next() % 3 == 0 {
                    format!("<e{}>", next() % entity_cnt)
                } else {
                    variable_pool[next() as usize % variable_pool.len()].to_owned()
                };
                if subject == object {
                    continue;
                }
                patterns.push((subject, predicate, object));
            }
            if patterns.is_empty() {
                continue;
            }
            let bgp: String = patterns
                .iter()
                .map(|(s, p, o)| format!("{s} {p} {o} . "))
                .collect();
            let sparql = format!("SELECT DISTINCT * WHERE {{ {bgp}}}");
            let out = store.query(&sparql)?;

            let pattern_refs: Vec<(&str, &str, &str)> =
                patterns.iter().map(|(s, p, o)| (s.as_str(), p.as_str(), o.as_str())).collect();
            let projection: Vec<&str> = out.variables.iter().map(String::as_str).collect();
            let expected = brute_force(&triples, &pattern_refs, &projection);
            let got: BTreeSet<Vec<String>> = out.rows.into_iter().collect();
            assert_eq!(got, expected, "round {round}: {sparql} over {input:?}");
        }
        Ok(())
    }

    /// Rerunning the same query yields the same rows in the same order, and
    /// every LIMIT n is a prefix of the unlimited run.
    #[test]
    fn limit_monotonicity_and_stability() -> color_eyre::Result<()> {
        init();
        let input: Vec<String> =
            (0..30).map(|i| format!("<e{}> <p{}> <e{}> .", i % 6, i % 2, (i + 1) % 6)).collect();
        let (_tmp, store) = store_from(&input)?;
        let sparql = "SELECT ?x ?y ?z WHERE { ?x <p0> ?y . ?y <p1> ?z . }";
        let all = rows(&store, sparql)?;
        assert_eq!(all, rows(&store, sparql)?);
        for n in [1, 2, all.len()] {
            let limited = rows(&store, &format!("{sparql} LIMIT {n}"))?;
            assert_eq!(limited, all[..n.min(all.len())].to_vec(), "LIMIT {n}");
        }
        Ok(())
    }
}
