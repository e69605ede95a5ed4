//! Query core: planning, leapfrog intersection, execution, materialisation.

pub mod executor;
pub mod leapfrog;
pub mod plan;
pub mod results;

pub use executor::QueryExecutor;
pub use leapfrog::leapfrog_join;
pub use plan::{PlanError, QueryPlan};
pub use results::QueryOutput;
