//! DISTINCT reduction and id decoding of the executor's tuples.
use super::plan::QueryPlan;
use crate::dictionary::ExtractError;
use crate::index::IndexRetriever;
use crate::sparql::{Modifier, Query};

/// Decoded solutions: the projected variable names and one row of term text
/// per solution tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutput {
    pub variables: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl QueryOutput {
    pub fn empty(variables: Vec<String>) -> Self {
        QueryOutput { variables, rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Project and decode the raw tuples.
///
/// The executor emits tuples in lexicographic level order, so `distinct` only
/// has to drop adjacent duplicates of the projected columns.
pub fn materialise(
    index: &IndexRetriever, plan: &QueryPlan, query: &Query, mut tuples: Vec<Vec<u32>>,
) -> core::result::Result<QueryOutput, super::plan::PlanError> {
    let projection = plan.mapping_variables(&query.variables, &query.patterns)?;
    if query.modifier == Modifier::Distinct {
        tuples.dedup_by(|a, b| projection.iter().all(|&(level, _)| a[level] == b[level]));
    }
    let rows = tuples
        .iter()
        .map(|tuple| {
            projection
                .iter()
                .map(|&(level, role)| {
                    index.id_to_string(tuple[level], role).map(str::to_owned).unwrap_or_else(
                        |ExtractError { id, .. }| {
                            // ids come from the index, so this only fires on a
                            // corrupt database; surface it in the output
                            format!("<unknown id {id}>")
                        },
                    )
                })
                .collect()
        })
        .collect();
    Ok(QueryOutput { variables: query.variables.clone(), rows })
}
