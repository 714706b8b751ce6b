//! PostgreSQL execution collaborator for dbgate.
//!
//! Selects the production or preproduction endpoint, the read replica or the
//! primary port, runs payloads with `sqlx`, and shells out to `pg_dump`.

mod dump;
mod executor;
mod outcome;

pub use dump::{plan_dump_parts, read_dump_part, DumpPartPlan, DumpRunner, PgDumpRunner};
pub use executor::{PostgresConfig, PostgresEndpoint, PostgresQueryExecutor, QueryExecutor};
pub use outcome::{ExecutionError, QueryOutcome, ResultTable, TargetEnvironment};
